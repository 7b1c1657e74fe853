use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SecurityType {
    StartTls,
    Ssl,
}

fn default_true() -> bool {
    true
}

/// A mailbox identity owned by one tenant user. Created by account setup,
/// read-only to the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub tenant_id: String,
    pub owner_id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub username: String,
    pub imap_host: String,
    pub imap_port: u16,
    pub imap_security: SecurityType,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_security: SecurityType,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Accept self-signed or otherwise unverifiable server certificates.
    /// On unless the account config turns it off.
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
    #[serde(default)]
    pub default: bool,
}

/// Ownership triple stamped onto every cached row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxOwner {
    pub tenant_id: String,
    pub account_id: String,
    pub user_id: String,
}

impl Account {
    /// Account on a generic IMAPS/SMTPS host with the conventional ports.
    pub fn new(id: String, tenant_id: String, owner_id: String, email: String, host: String) -> Self {
        Self {
            id,
            tenant_id,
            owner_id,
            username: email.clone(),
            email,
            display_name: None,
            imap_host: host.clone(),
            imap_port: 993,
            imap_security: SecurityType::Ssl,
            smtp_host: host,
            smtp_port: 465,
            smtp_security: SecurityType::Ssl,
            active: true,
            accept_invalid_certs: true,
            default: false,
        }
    }

    pub fn owner(&self) -> MailboxOwner {
        MailboxOwner {
            tenant_id: self.tenant_id.clone(),
            account_id: self.id.clone(),
            user_id: self.owner_id.clone(),
        }
    }

    /// Host part of the sender address, used when minting Message-IDs.
    pub fn mail_domain(&self) -> &str {
        self.email
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .unwrap_or(self.imap_host.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_carries_tenant_and_user() {
        let account = Account::new(
            "acc-1".into(),
            "tenant-9".into(),
            "user-3".into(),
            "sales@example.com".into(),
            "mail.example.com".into(),
        );
        let owner = account.owner();
        assert_eq!(owner.tenant_id, "tenant-9");
        assert_eq!(owner.account_id, "acc-1");
        assert_eq!(owner.user_id, "user-3");
    }

    #[test]
    fn test_mail_domain_from_address() {
        let mut account = Account::new(
            "a".into(),
            "t".into(),
            "u".into(),
            "sales@example.com".into(),
            "imap.host.net".into(),
        );
        assert_eq!(account.mail_domain(), "example.com");
        account.email = "no-at-sign".into();
        assert_eq!(account.mail_domain(), "imap.host.net");
    }

    #[test]
    fn test_missing_flags_default_to_active_and_lenient_tls() {
        let toml = r#"
            id = "a"
            tenant_id = "t"
            owner_id = "u"
            email = "a@example.com"
            username = "a@example.com"
            imap_host = "imap.example.com"
            imap_port = 993
            imap_security = "ssl"
            smtp_host = "smtp.example.com"
            smtp_port = 587
            smtp_security = "starttls"
        "#;
        let account: Account = toml::from_str(toml).unwrap();
        assert!(account.active);
        assert!(account.accept_invalid_certs);
        assert!(!account.default);
        assert_eq!(account.smtp_security, SecurityType::StartTls);
    }
}
