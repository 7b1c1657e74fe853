use crate::core::sync::FolderRequest;
use crate::models::config::Config;
use crate::models::folder;
use crate::output::{json, table, OutputFormat};
use anyhow::Result;

pub async fn show_folder(
    account: Option<&str>,
    folder: &str,
    limit: Option<u32>,
    force_sync: bool,
    output: Option<&str>,
) -> Result<()> {
    let config = Config::load()?;
    let account = super::select_account(&config, account)?;
    let format = super::output_format(&config, output)?;
    let orchestrator = super::orchestrator(&config).await?;

    let view = orchestrator
        .load_folder(
            &account,
            FolderRequest {
                folder: folder.to_string(),
                limit: limit.unwrap_or(config.preferences.default_limit),
                force_sync,
            },
        )
        .await?;

    match format {
        OutputFormat::Json => json::print_json(&view)?,
        OutputFormat::Table => table::print_email_table(
            &account.id,
            &folder::canonicalize(folder),
            &view.emails,
            view.sync_error.as_deref(),
        ),
    }

    Ok(())
}
