use crate::models::account::Account;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

/// Lower and upper bounds for any single network budget, in seconds.
const MIN_TIMEOUT_SECS: u64 = 24;
const MAX_TIMEOUT_SECS: u64 = 90;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default = "default_output_format")]
    pub default_output: String,
    #[serde(default = "default_limit")]
    pub default_limit: u32,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_output_format() -> String {
    "json".to_string()
}

fn default_limit() -> u32 {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            default_output: default_output_format(),
            default_limit: default_limit(),
            log_level: default_log_level(),
        }
    }
}

/// Connect and fetch budgets for one call site.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutBudget {
    pub connect_secs: u64,
    pub fetch_secs: u64,
}

impl TimeoutBudget {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS))
    }

    pub fn fetch(&self) -> Duration {
        Duration::from_secs(self.fetch_secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS))
    }
}

fn default_interactive() -> TimeoutBudget {
    TimeoutBudget {
        connect_secs: 25,
        fetch_secs: 30,
    }
}

fn default_background() -> TimeoutBudget {
    TimeoutBudget {
        connect_secs: 90,
        fetch_secs: 45,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timeouts {
    /// Folder view requests, where a user is waiting on the answer.
    #[serde(default = "default_interactive")]
    pub interactive: TimeoutBudget,
    /// Full account syncs and the post-send append.
    #[serde(default = "default_background")]
    pub background: TimeoutBudget,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            interactive: default_interactive(),
            background: default_background(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Storage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub storage: Storage,
}

impl Config {
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("inboxsync");

        fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir.join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&config_path).context("Failed to read config file")?;

        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse config file")
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // Account entries reference vault secrets; keep the file private
        #[cfg(unix)]
        {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&config_path)
                .context("Failed to create config file")?;
            file.write_all(toml_str.as_bytes())
                .context("Failed to write config file")?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&config_path, toml_str).context("Failed to write config file")?;
        }

        Ok(())
    }

    pub fn get_account(&self, id: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.id == id)
    }

    pub fn get_default_account(&self) -> Option<&Account> {
        self.accounts
            .iter()
            .find(|a| a.default)
            .or_else(|| self.accounts.first())
    }

    /// Look up `id` if given, else the default account.
    pub fn select_account(&self, id: Option<&str>) -> Option<&Account> {
        match id {
            Some(id) => self.get_account(id),
            None => self.get_default_account(),
        }
    }

    pub fn add_account(&mut self, mut account: Account) {
        if self.accounts.is_empty() {
            account.default = true;
        }
        if account.default {
            for acc in &mut self.accounts {
                acc.default = false;
            }
        }

        self.accounts.retain(|a| a.id != account.id);
        self.accounts.push(account);
    }

    pub fn remove_account(&mut self, id: &str) -> bool {
        let original_len = self.accounts.len();
        self.accounts.retain(|a| a.id != id);

        if self.accounts.len() < original_len
            && !self.accounts.is_empty()
            && !self.accounts.iter().any(|a| a.default)
        {
            self.accounts[0].default = true;
        }

        self.accounts.len() < original_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: &str) -> Account {
        Account::new(
            id.into(),
            "tenant".into(),
            "user".into(),
            format!("{id}@example.com"),
            "mail.example.com".into(),
        )
    }

    #[test]
    fn test_empty_config_has_call_site_budgets() {
        let config = Config::parse("").unwrap();
        assert!(config.accounts.is_empty());
        assert_eq!(config.timeouts.interactive.connect(), Duration::from_secs(25));
        assert_eq!(config.timeouts.interactive.fetch(), Duration::from_secs(30));
        assert_eq!(config.timeouts.background.connect(), Duration::from_secs(90));
        assert_eq!(config.timeouts.background.fetch(), Duration::from_secs(45));
        assert_eq!(config.preferences.default_limit, 50);
    }

    #[test]
    fn test_budget_is_clamped() {
        let budget = TimeoutBudget {
            connect_secs: 600,
            fetch_secs: 1,
        };
        assert_eq!(budget.connect(), Duration::from_secs(90));
        assert_eq!(budget.fetch(), Duration::from_secs(24));
    }

    #[test]
    fn test_partial_timeouts_section() {
        let config = Config::parse(
            r#"
            [timeouts.interactive]
            connect_secs = 30
            fetch_secs = 40
            "#,
        )
        .unwrap();
        assert_eq!(config.timeouts.interactive.connect(), Duration::from_secs(30));
        assert_eq!(config.timeouts.background, default_background());
    }

    #[test]
    fn test_first_account_becomes_default() {
        let mut config = Config::default();
        config.add_account(account("a"));
        config.add_account(account("b"));
        assert_eq!(config.get_default_account().unwrap().id, "a");
        assert_eq!(config.select_account(Some("b")).unwrap().id, "b");
        assert!(config.select_account(Some("zzz")).is_none());
    }

    #[test]
    fn test_remove_default_promotes_next() {
        let mut config = Config::default();
        config.add_account(account("a"));
        config.add_account(account("b"));
        assert!(config.remove_account("a"));
        assert!(!config.remove_account("a"));
        assert!(config.accounts[0].default);
        assert_eq!(config.get_default_account().unwrap().id, "b");
    }
}
