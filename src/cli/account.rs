use crate::core::auth::{CredentialVault, KeychainVault};
use crate::core::imap::{ImapConnector, MailboxConnector};
use crate::models::account::{Account, SecurityType};
use crate::models::config::Config;
use anyhow::{anyhow, Context, Result};
use secrecy::SecretString;
use std::io::{self, BufRead, Write};

pub struct AddArgs {
    pub id: String,
    pub email: String,
    pub tenant: String,
    pub owner: String,
    pub host: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub imap_host: Option<String>,
    pub imap_port: Option<u16>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub starttls: bool,
    pub strict_tls: bool,
}

impl AddArgs {
    fn into_account(self) -> Account {
        let mut account = Account::new(self.id, self.tenant, self.owner, self.email, self.host);
        if let Some(username) = self.username {
            account.username = username;
        }
        account.display_name = self.display_name;
        if let Some(host) = self.imap_host {
            account.imap_host = host;
        }
        if let Some(host) = self.smtp_host {
            account.smtp_host = host;
        }
        if self.starttls {
            account.imap_security = SecurityType::StartTls;
            account.smtp_security = SecurityType::StartTls;
            account.imap_port = 143;
            account.smtp_port = 587;
        }
        if let Some(port) = self.imap_port {
            account.imap_port = port;
        }
        if let Some(port) = self.smtp_port {
            account.smtp_port = port;
        }
        account.accept_invalid_certs = !self.strict_tls;
        account
    }
}

pub async fn test_account(id: Option<&str>) -> Result<()> {
    let config = Config::load()?;
    let account = super::select_account(&config, id)?;

    println!("Testing connection for {}...", account.id);
    println!("  Email: {}", account.email);
    println!("  IMAP: {}:{}", account.imap_host, account.imap_port);
    println!("  SMTP: {}:{}", account.smtp_host, account.smtp_port);
    println!();

    let secret = KeychainVault.secret(&account.id)?;
    let budget = config.timeouts.interactive;

    match ImapConnector.open(&account, &secret, budget.connect()).await {
        Ok(mut session) => {
            session.close().await;
            println!("✓ Connected and authenticated");
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Connection failed: {}", e);
            eprintln!();
            eprintln!("Troubleshooting:");
            eprintln!("  1. Check host and port with 'inboxsync account list'");
            eprintln!("  2. Verify the secret is stored in the keychain");
            eprintln!("  3. Servers with private CAs need strict TLS left off");
            Err(e.into())
        }
    }
}

pub async fn add_account(args: AddArgs) -> Result<()> {
    let mut config = Config::load()?;

    if config.get_account(&args.id).is_some() {
        return Err(anyhow!("Account {} already exists", args.id));
    }

    print!("Enter mailbox password for {}: ", args.email);
    io::stdout().flush()?;
    let password = rpassword::read_password().context("Failed to read password")?;

    if password.is_empty() {
        return Err(anyhow!("Password cannot be empty"));
    }

    let account = args.into_account();
    KeychainVault.store(&account.id, &SecretString::from(password))?;

    println!("✓ Account {} added", account.id);
    println!("  IMAP: {}:{}", account.imap_host, account.imap_port);
    println!("  SMTP: {}:{}", account.smtp_host, account.smtp_port);
    println!();
    println!("Test connection with: inboxsync account test --account {}", account.id);

    config.add_account(account);
    config.save()?;

    Ok(())
}

pub fn list_accounts() -> Result<()> {
    let config = Config::load()?;

    if config.accounts.is_empty() {
        println!("No accounts configured.");
        println!("Add an account with: inboxsync account add");
        return Ok(());
    }

    println!("Configured accounts:\n");

    for account in &config.accounts {
        let default_marker = if account.default { " (default)" } else { "" };
        let secret_status = if KeychainVault.contains(&account.id) {
            "✓ secret stored"
        } else {
            "✗ secret missing"
        };
        let active_status = if account.active { "active" } else { "inactive" };

        println!("  {} <{}>{}", account.id, account.email, default_marker);
        println!("    Tenant: {}  Owner: {}", account.tenant_id, account.owner_id);
        println!(
            "    IMAP: {}:{} ({})",
            account.imap_host,
            account.imap_port,
            format!("{:?}", account.imap_security).to_lowercase()
        );
        println!(
            "    SMTP: {}:{} ({})",
            account.smtp_host,
            account.smtp_port,
            format!("{:?}", account.smtp_security).to_lowercase()
        );
        println!("    Status: {}, {}", active_status, secret_status);
        println!();
    }

    Ok(())
}

pub fn remove_account(id: &str, yes: bool) -> Result<()> {
    let mut config = Config::load()?;

    if config.get_account(id).is_none() {
        return Err(anyhow!("Account {} not found", id));
    }

    if !yes {
        println!(
            "Remove account {}? This deletes its configuration and keychain secret.",
            id
        );
        println!("Type 'yes' to confirm: ");

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;

        if line.trim().to_lowercase() != "yes" {
            println!("Cancelled");
            return Ok(());
        }
    }

    if !config.remove_account(id) {
        return Err(anyhow!("Failed to remove account from config"));
    }

    if let Err(e) = KeychainVault.delete(id) {
        eprintln!("Warning: Failed to delete secret from keychain: {:#}", e);
    }

    config.save()?;

    println!("✓ Account {} removed", id);

    Ok(())
}
