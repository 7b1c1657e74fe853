use anyhow::{Context, Result};
use keyring::Entry;
use secrecy::{ExposeSecret, SecretString};

const SERVICE_NAME: &str = "inboxsync";

/// Per-account mailbox secrets, decrypted on demand.
pub trait CredentialVault: Send + Sync {
    fn secret(&self, account_id: &str) -> Result<SecretString>;
    fn store(&self, account_id: &str, secret: &SecretString) -> Result<()>;
    fn delete(&self, account_id: &str) -> Result<()>;

    fn contains(&self, account_id: &str) -> bool {
        self.secret(account_id).is_ok()
    }
}

/// Vault backed by the operating system keychain, one entry per account id.
pub struct KeychainVault;

impl KeychainVault {
    fn entry(account_id: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, account_id).context("Failed to create keychain entry")
    }
}

impl CredentialVault for KeychainVault {
    fn secret(&self, account_id: &str) -> Result<SecretString> {
        let password = Self::entry(account_id)?
            .get_password()
            .with_context(|| format!("No secret stored for account {}", account_id))?;

        Ok(SecretString::from(password))
    }

    fn store(&self, account_id: &str, secret: &SecretString) -> Result<()> {
        Self::entry(account_id)?
            .set_password(secret.expose_secret())
            .context("Failed to store secret in keychain")
    }

    fn delete(&self, account_id: &str) -> Result<()> {
        Self::entry(account_id)?
            .delete_password()
            .context("Failed to delete secret from keychain")
    }
}
