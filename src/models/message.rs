use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    #[serde(default)]
    pub name: Option<String>,
    pub address: String,
}

impl EmailAddress {
    pub fn new(address: String, name: Option<String>) -> Self {
        Self { name, address }
    }

    pub fn format(&self) -> String {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => format!("{} <{}>", name, self.address),
            _ => self.address.clone(),
        }
    }
}

/// A message produced by one fetch pass, before it is merged into the cache.
///
/// `uid` is the sequence number within `folder` at fetch time and is only
/// meaningful together with the folder and account it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub uid: u32,
    pub folder: String,
    pub message_id: Option<String>,
    pub from: EmailAddress,
    pub to: Vec<EmailAddress>,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
    pub date: DateTime<Utc>,
    pub is_read: bool,
    pub attachment_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "inbound" => Some(Direction::Inbound),
            "outbound" => Some(Direction::Outbound),
            _ => None,
        }
    }
}

/// A cached row as served by the unified inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedEmail {
    pub uid: i64,
    pub folder: String,
    pub from: String,
    pub to: Vec<EmailAddress>,
    pub subject: String,
    pub text: String,
    pub html_content: Option<String>,
    pub date: DateTime<Utc>,
    pub attachment_count: i64,
    pub has_attachments: bool,
    pub is_read: bool,
    pub direction: Direction,
}
