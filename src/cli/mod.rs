pub mod account;
pub mod inbox;
pub mod send;
pub mod status;
pub mod sync;

use crate::core::auth::KeychainVault;
use crate::core::cache::CacheStore;
use crate::core::imap::ImapConnector;
use crate::core::sync::Orchestrator;
use crate::models::account::Account;
use crate::models::config::Config;
use crate::output::OutputFormat;
use anyhow::{anyhow, Result};
use std::sync::Arc;

/// Orchestrator wired to real IMAP, the OS keychain and the on-disk cache.
pub async fn orchestrator(config: &Config) -> Result<Orchestrator> {
    let path = match &config.storage.database_path {
        Some(path) => path.clone(),
        None => CacheStore::default_path()?,
    };
    let store = CacheStore::open(&path).await?;

    Ok(Orchestrator::new(
        Arc::new(ImapConnector),
        Arc::new(KeychainVault),
        store,
        config.timeouts,
    ))
}

pub fn select_account(config: &Config, id: Option<&str>) -> Result<Account> {
    config.select_account(id).cloned().ok_or_else(|| match id {
        Some(id) => anyhow!("Account {} not found in config", id),
        None => anyhow!("No default account configured. Add one with 'inboxsync account add'"),
    })
}

pub fn output_format(config: &Config, requested: Option<&str>) -> Result<OutputFormat> {
    OutputFormat::parse(requested.unwrap_or(&config.preferences.default_output))
}
