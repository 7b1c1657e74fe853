use crate::models::config::Config;
use crate::output::json;
use anyhow::Result;

pub async fn sync_account(account: Option<&str>, limit: Option<u32>) -> Result<()> {
    let config = Config::load()?;
    let account = super::select_account(&config, account)?;
    let orchestrator = super::orchestrator(&config).await?;

    let report = orchestrator
        .sync_account(&account, limit.unwrap_or(config.preferences.default_limit))
        .await?;

    json::print_json(&report)
}
