//! Keeping sent mail visible after the SMTP hand-off.
//!
//! The sent document is appended to the first Sent spelling that opens
//! read-write, or to INBOX when none does, and is mirrored into the cache
//! regardless of how the append went. Nothing here can fail a send.

use crate::core::cache::OutboundRecord;
use crate::core::fetch::{BODY_PREVIEW_CHARS, NO_SUBJECT, SUBJECT_CHARS};
use crate::core::imap::{AccessMode, MailboxSession, SessionError};
use crate::core::sync::{Orchestrator, SyncError};
use crate::models::account::Account;
use crate::models::folder;
use crate::models::message::EmailAddress;
use crate::utils::text::{strip_tags, truncate_chars};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use lettre::message::{header::ContentType, Mailbox, MultiPart};
use serde::Serialize;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub to: Vec<EmailAddress>,
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
}

impl OutboundMessage {
    /// Plain body, derived from the HTML body when none was given.
    pub fn plain_text(&self) -> String {
        match (&self.text, &self.html) {
            (Some(text), _) => text.clone(),
            (None, Some(html)) => strip_tags(html),
            (None, None) => String::new(),
        }
    }

    fn subject_or_default(&self) -> &str {
        if self.subject.trim().is_empty() {
            NO_SUBJECT
        } else {
            &self.subject
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appended_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirrored_uid: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirror_error: Option<String>,
}

pub fn new_message_id(account: &Account) -> String {
    format!("<{}@{}>", Uuid::new_v4(), account.mail_domain())
}

fn mailbox(address: &EmailAddress) -> Result<Mailbox> {
    let parsed = address
        .address
        .parse()
        .with_context(|| format!("Invalid email address: {}", address.address))?;
    Ok(Mailbox::new(address.name.clone(), parsed))
}

/// Complete single-message document: plain text alone, or
/// multipart/alternative when an HTML body is present.
pub fn build_document(
    account: &Account,
    message: &OutboundMessage,
    message_id: &str,
    sent_at: DateTime<Utc>,
) -> Result<lettre::Message> {
    if message.to.is_empty() {
        bail!("At least one recipient required");
    }

    let from = EmailAddress::new(account.email.clone(), account.display_name.clone());
    let mut builder = lettre::Message::builder()
        .from(mailbox(&from)?)
        .subject(message.subject_or_default())
        .message_id(Some(message_id.to_string()))
        .date(SystemTime::from(sent_at));

    for recipient in &message.to {
        builder = builder.to(mailbox(recipient)?);
    }

    let text = message.plain_text();
    match &message.html {
        Some(html) => builder
            .multipart(MultiPart::alternative_plain_html(text, html.clone()))
            .context("Failed to build multipart message"),
        None => builder
            .header(ContentType::TEXT_PLAIN)
            .body(text)
            .context("Failed to build message"),
    }
}

/// Append to the first Sent spelling that opens read-write, else INBOX.
/// Returns the folder that took the message.
pub async fn append_first_writable(
    session: &mut dyn MailboxSession,
    document: &[u8],
) -> Result<String, SessionError> {
    for candidate in folder::resolve(folder::SENT) {
        match session.select_folder(&candidate, AccessMode::ReadWrite).await {
            Ok(_) => {
                session.append(&candidate, document).await?;
                return Ok(candidate);
            }
            Err(err) => debug!(candidate = %candidate, error = %err, "sent folder candidate unavailable"),
        }
    }

    warn!("no sent folder could be opened; appending to INBOX");
    session.append(folder::INBOX, document).await?;
    Ok(folder::INBOX.to_string())
}

impl Orchestrator {
    /// Store a copy of a message the SMTP server already accepted.
    pub async fn record_sent(
        &self,
        account: &Account,
        message: &OutboundMessage,
        message_id: &str,
        document: Vec<u8>,
        sent_at: DateTime<Utc>,
    ) -> AppendReport {
        let mut report = AppendReport::default();

        match self.append_to_sent(account, document).await {
            Ok(folder) => {
                info!(account = %account.id, folder = %folder, "sent message appended");
                report.appended_to = Some(folder);
            }
            Err(err) => {
                error!(account = %account.id, error = %err, "append of sent message failed");
                report.append_error = Some(err.to_string());
            }
        }

        let record = OutboundRecord {
            folder: folder::SENT.to_string(),
            message_id: message_id.to_string(),
            from: EmailAddress::new(account.email.clone(), account.display_name.clone()),
            to: message.to.clone(),
            subject: truncate_chars(message.subject_or_default(), SUBJECT_CHARS),
            text: truncate_chars(&message.plain_text(), BODY_PREVIEW_CHARS),
            html: message.html.clone(),
            sent_at,
        };
        match self.store().insert_outbound(&account.owner(), &record).await {
            Ok(uid) => report.mirrored_uid = Some(uid),
            Err(err) => {
                let reason = format!("{:#}", err);
                error!(account = %account.id, error = %reason, "mirroring sent message failed");
                report.mirror_error = Some(reason);
            }
        }

        report
    }

    async fn append_to_sent(&self, account: &Account, document: Vec<u8>) -> Result<String, SyncError> {
        let this = self.clone();
        let account = account.clone();

        tokio::spawn(async move {
            let budget = this.timeouts().background;
            let mut session = this.open_session(&account, budget.connect()).await?;
            let result = append_with_timeout(session.as_mut(), &document, budget.fetch()).await;
            session.close().await;
            result.map_err(SyncError::from)
        })
        .await
        .map_err(|e| SyncError::Aborted(e.to_string()))?
    }
}

async fn append_with_timeout(
    session: &mut dyn MailboxSession,
    document: &[u8],
    budget: Duration,
) -> Result<String, SessionError> {
    tokio::time::timeout(budget, append_first_writable(session, document))
        .await
        .map_err(|_| SessionError::Timeout {
            operation: "append",
            after: budget,
        })?
}
