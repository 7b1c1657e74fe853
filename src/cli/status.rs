use crate::models::config::Config;
use crate::output::json;
use anyhow::{anyhow, Result};

pub async fn mark(account: Option<&str>, folder: &str, uids: &[i64], unread: bool) -> Result<()> {
    if uids.is_empty() {
        return Err(anyhow!("At least one --uid is required"));
    }

    let config = Config::load()?;
    let account = super::select_account(&config, account)?;
    let orchestrator = super::orchestrator(&config).await?;

    let report = orchestrator.mark_read(&account, folder, uids, !unread).await?;
    json::print_json(&report)
}

pub async fn read_status(account: Option<&str>) -> Result<()> {
    let config = Config::load()?;
    let account = super::select_account(&config, account)?;
    let orchestrator = super::orchestrator(&config).await?;

    let status = orchestrator.read_status(&account).await?;
    json::print_json(&status)
}
