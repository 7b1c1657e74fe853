use crate::core::auth::{CredentialVault, KeychainVault};
use crate::core::outbound::{build_document, new_message_id, AppendReport, OutboundMessage};
use crate::core::smtp::SmtpClient;
use crate::models::config::Config;
use crate::models::message::EmailAddress;
use crate::output::json;
use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use lettre::message::Mailbox;
use serde::Serialize;
use std::fs;
use tracing::info;

pub struct SendArgs {
    pub account: Option<String>,
    pub to: Vec<String>,
    pub subject: String,
    pub text: Option<String>,
    pub text_file: Option<String>,
    pub html: Option<String>,
    pub html_file: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendOutput {
    success: bool,
    message_id: String,
    from: String,
    to: Vec<String>,
    subject: String,
    #[serde(flatten)]
    append: AppendReport,
}

fn read_body(inline: Option<String>, file: Option<String>) -> Result<Option<String>> {
    match (inline, file) {
        (Some(_), Some(_)) => bail!("Give a body inline or from a file, not both"),
        (Some(body), None) => Ok(Some(body)),
        (None, Some(path)) => fs::read_to_string(&path)
            .map(Some)
            .with_context(|| format!("Failed to read body file: {}", path)),
        (None, None) => Ok(None),
    }
}

/// Accepts `addr@example.com` and `Name <addr@example.com>`.
fn parse_recipient(s: &str) -> Result<EmailAddress> {
    let mailbox: Mailbox = s
        .parse()
        .with_context(|| format!("Invalid email address: {}", s))?;
    Ok(EmailAddress::new(mailbox.email.to_string(), mailbox.name))
}

pub async fn send_email(args: SendArgs) -> Result<()> {
    let config = Config::load()?;
    let account = super::select_account(&config, args.account.as_deref())?;
    if !account.active {
        return Err(anyhow!("Account {} is inactive", account.id));
    }

    let text = read_body(args.text, args.text_file)?;
    let html = read_body(args.html, args.html_file)?;
    if text.is_none() && html.is_none() {
        bail!("A body is required: use --text, --text-file, --html or --html-file");
    }

    let to = args
        .to
        .iter()
        .map(|s| parse_recipient(s))
        .collect::<Result<Vec<_>>>()?;
    let message = OutboundMessage {
        to,
        subject: args.subject,
        text,
        html,
    };

    let orchestrator = super::orchestrator(&config).await?;
    let message_id = new_message_id(&account);
    let sent_at = Utc::now();
    let document = build_document(&account, &message, &message_id, sent_at)?;

    let secret = KeychainVault.secret(&account.id)?;
    let timeout = config.timeouts.background.connect();
    let smtp_account = account.clone();
    let smtp_document = document.clone();
    let response = tokio::task::spawn_blocking(move || {
        let client = SmtpClient::connect(&smtp_account, &secret, timeout)?;
        client.send_message(&smtp_document)
    })
    .await
    .context("SMTP task failed")??;
    info!(account = %account.id, code = %response.code(), %message_id, "message accepted by SMTP server");

    let append = orchestrator
        .record_sent(&account, &message, &message_id, document.formatted(), sent_at)
        .await;

    json::print_json(&SendOutput {
        success: true,
        message_id,
        from: account.email.clone(),
        to: message.to.iter().map(EmailAddress::format).collect(),
        subject: message.subject,
        append,
    })
}
