//! Retrieval of the newest messages in one folder.
//!
//! A fetch pass selects the folder read-only, requests the last `limit`
//! sequence numbers in a single FETCH, and parses every returned body on the
//! blocking pool. Each message's server attributes are held until its parsed
//! body is ready, and the pass only completes once the server has finished
//! the response *and* every message it sent has been joined. A message that
//! fails to parse is dropped; any other failure fails the whole pass, so a
//! caller never sees a partial folder.

use crate::core::imap::{
    AccessMode, MailboxSession, MessageAttributes, RawMessage, SeqRange, SessionError,
};
use crate::models::message::{EmailAddress, Message};
use crate::utils::text::{strip_tags, truncate_chars};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub const BODY_PREVIEW_CHARS: usize = 1000;
pub const ADDRESS_CHARS: usize = 255;
pub const SUBJECT_CHARS: usize = 500;
pub const NO_SUBJECT: &str = "(No Subject)";
const UNKNOWN_SENDER: &str = "Unknown";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("fetch of {folder} timed out after {}s", .after.as_secs())]
    Timeout { folder: String, after: Duration },
}

impl FetchError {
    /// The folder could not be opened under this name; try the next spelling.
    pub fn is_folder_missing(&self) -> bool {
        matches!(self, FetchError::Session(SessionError::Folder { .. }))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("message {seq} arrived without a body")]
    MissingBody { seq: u32 },
    #[error("message {seq} is not a parseable MIME document")]
    Malformed { seq: u32 },
    #[error("parser for message {seq} did not finish")]
    Aborted { seq: u32 },
}

/// Content recovered from a message body, before it is joined with the
/// server-side attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBody {
    pub message_id: Option<String>,
    pub from: EmailAddress,
    pub to: Vec<EmailAddress>,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
    pub header_date: Option<DateTime<Utc>>,
    pub attachment_count: usize,
}

/// The newest `min(limit, total)` sequence numbers, or `None` for an empty folder.
pub fn sequence_range(total: u32, limit: u32) -> Option<SeqRange> {
    if total == 0 || limit == 0 {
        return None;
    }
    let count = limit.min(total);
    Some(SeqRange {
        start: (total - count + 1).max(1),
        end: total,
    })
}

/// Sender's header date, else the server's arrival date, else `now`.
pub fn resolve_date(
    header: Option<DateTime<Utc>>,
    internal: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    header.or(internal).unwrap_or(now)
}

fn bounded_address(name: Option<&str>, address: Option<&str>) -> Option<EmailAddress> {
    let address = address?;
    Some(EmailAddress::new(
        truncate_chars(address, ADDRESS_CHARS),
        name.map(|n| truncate_chars(n, ADDRESS_CHARS)),
    ))
}

impl ParsedBody {
    pub fn parse(seq: u32, body: Option<&[u8]>) -> Result<Self, ParseError> {
        let body = body.ok_or(ParseError::MissingBody { seq })?;
        let parsed = mail_parser::MessageParser::default()
            .parse(body)
            .ok_or(ParseError::Malformed { seq })?;

        let from = parsed
            .from()
            .and_then(|addrs| addrs.first())
            .and_then(|addr| bounded_address(addr.name(), addr.address()))
            .unwrap_or_else(|| EmailAddress::new(UNKNOWN_SENDER.to_string(), None));

        let to = parsed
            .to()
            .and_then(|addrs| addrs.as_list())
            .map(|list| {
                list.iter()
                    .filter_map(|addr| bounded_address(addr.name(), addr.address()))
                    .collect()
            })
            .unwrap_or_default();

        let subject = parsed
            .subject()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(NO_SUBJECT);

        let html = parsed.body_html(0).map(|h| h.into_owned());
        let text = match parsed.body_text(0) {
            Some(text) => text.into_owned(),
            None => html.as_deref().map(strip_tags).unwrap_or_default(),
        };

        Ok(Self {
            message_id: parsed.message_id().map(String::from),
            from,
            to,
            subject: truncate_chars(subject, SUBJECT_CHARS),
            text: truncate_chars(&text, BODY_PREVIEW_CHARS),
            html,
            header_date: parsed
                .date()
                .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0)),
            attachment_count: parsed.attachment_count(),
        })
    }

    /// Join with the attributes that arrived for the same sequence number.
    pub fn into_message(
        self,
        seq: u32,
        folder: &str,
        attributes: &MessageAttributes,
        now: DateTime<Utc>,
    ) -> Message {
        Message {
            uid: seq,
            folder: folder.to_string(),
            message_id: self.message_id,
            from: self.from,
            to: self.to,
            subject: self.subject,
            text: self.text,
            html: self.html,
            date: resolve_date(self.header_date, attributes.internal_date, now),
            is_read: attributes.seen,
            attachment_count: self.attachment_count,
        }
    }
}

type Joined = (u32, MessageAttributes, Result<ParsedBody, ParseError>);

/// Fetch and parse the newest `limit` messages of `folder`.
pub async fn fetch(
    session: &mut dyn MailboxSession,
    folder: &str,
    limit: u32,
) -> Result<Vec<Message>, FetchError> {
    let info = session.select_folder(folder, AccessMode::ReadOnly).await?;
    info!(folder, total = info.total, "folder opened");

    let Some(range) = sequence_range(info.total, limit) else {
        return Ok(Vec::new());
    };
    debug!(folder, %range, count = range.len(), "fetching sequence range");

    // The stream is drained before the first join and `join_next` yields
    // `None` only after every spawned parse is joined; that ordering is the
    // completion gate.
    let mut expected = 0usize;
    let mut dropped = 0usize;
    let mut pending: JoinSet<Joined> = JoinSet::new();

    let mut stream = session.fetch_range(range).await?;
    while let Some(item) = stream.next().await {
        let RawMessage {
            seq,
            attributes,
            body,
        } = item?;
        expected += 1;

        pending.spawn(async move {
            let parsed = tokio::task::spawn_blocking(move || ParsedBody::parse(seq, body.as_deref()))
                .await
                .unwrap_or(Err(ParseError::Aborted { seq }));
            (seq, attributes, parsed)
        });
    }
    drop(stream);

    let now = Utc::now();
    let mut messages = Vec::with_capacity(expected);
    while let Some(joined) = pending.join_next().await {
        match joined {
            Ok((seq, attributes, Ok(body))) => {
                messages.push(body.into_message(seq, folder, &attributes, now));
            }
            Ok((seq, _, Err(err))) => {
                dropped += 1;
                warn!(folder, seq, error = %err, "dropping unparseable message");
            }
            Err(err) => {
                dropped += 1;
                warn!(folder, error = %err, "message join task failed");
            }
        }
    }

    debug_assert_eq!(messages.len() + dropped, expected);

    info!(
        folder,
        parsed = messages.len(),
        dropped,
        "fetch pass complete"
    );

    messages.sort_by(|a, b| b.uid.cmp(&a.uid));
    Ok(messages)
}

/// [`fetch`] bounded by `budget`. On expiry nothing is returned.
pub async fn fetch_with_timeout(
    session: &mut dyn MailboxSession,
    folder: &str,
    limit: u32,
    budget: Duration,
) -> Result<Vec<Message>, FetchError> {
    tokio::time::timeout(budget, fetch(session, folder, limit))
        .await
        .map_err(|_| FetchError::Timeout {
            folder: folder.to_string(),
            after: budget,
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{rfc822, FakeMailbox, FakeMessage};
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_sequence_range_is_newest_window() {
        assert_eq!(
            sequence_range(10_000, 25),
            Some(SeqRange {
                start: 9976,
                end: 10_000
            })
        );
        assert_eq!(sequence_range(3, 25), Some(SeqRange { start: 1, end: 3 }));
        assert_eq!(sequence_range(25, 25), Some(SeqRange { start: 1, end: 25 }));
        assert_eq!(sequence_range(0, 25), None);
        assert_eq!(sequence_range(10, 0), None);
    }

    #[test]
    fn test_date_precedence() {
        let now = utc(2030, 1, 1);
        assert_eq!(
            resolve_date(Some(utc(2024, 1, 1)), Some(utc(2024, 1, 5)), now),
            utc(2024, 1, 1)
        );
        assert_eq!(resolve_date(None, Some(utc(2024, 1, 5)), now), utc(2024, 1, 5));
        assert_eq!(resolve_date(None, None, now), now);
    }

    #[test]
    fn test_parse_defaults_and_truncation() {
        let long_body = "x".repeat(5000);
        let long_subject = "s".repeat(800);
        let raw = format!(
            "From: \"Ada\" <ada@example.com>\r\nTo: bob@example.com, Cy <cy@example.com>\r\nSubject: {}\r\n\r\n{}\r\n",
            long_subject, long_body
        );
        let body = ParsedBody::parse(1, Some(raw.as_bytes())).unwrap();
        assert_eq!(body.from.format(), "Ada <ada@example.com>");
        assert_eq!(body.to.len(), 2);
        assert_eq!(body.subject.chars().count(), SUBJECT_CHARS);
        assert_eq!(body.text.chars().count(), BODY_PREVIEW_CHARS);
        assert!(body.header_date.is_none());

        let bare = "From: a@example.com\r\n\r\nhello\r\n";
        let body = ParsedBody::parse(2, Some(bare.as_bytes())).unwrap();
        assert_eq!(body.subject, NO_SUBJECT);
    }

    #[test]
    fn test_parse_missing_body() {
        assert_eq!(
            ParsedBody::parse(4, None),
            Err(ParseError::MissingBody { seq: 4 })
        );
    }

    #[test]
    fn test_html_only_message_gets_text_preview() {
        let raw = "From: a@example.com\r\nSubject: promo\r\nContent-Type: text/html\r\n\r\n<p>Big <b>sale</b></p>\r\n";
        let body = ParsedBody::parse(1, Some(raw.as_bytes())).unwrap();
        assert!(body.html.as_deref().unwrap().contains("<b>sale</b>"));
        assert!(body.text.contains("sale"));
        assert!(!body.text.contains("<b>"));
    }

    #[tokio::test]
    async fn test_fetch_requests_bounded_range() {
        let mailbox = FakeMailbox::new().with_folder("INBOX", 10_000);
        let mut session = mailbox.session();

        let messages = fetch(&mut session, "INBOX", 25).await.unwrap();

        assert_eq!(messages.len(), 25);
        assert_eq!(messages[0].uid, 10_000);
        assert_eq!(messages[24].uid, 9976);
        assert_eq!(
            mailbox.log().ranges,
            vec![(
                "INBOX".to_string(),
                SeqRange {
                    start: 9976,
                    end: 10_000
                }
            )]
        );
    }

    #[tokio::test]
    async fn test_fetch_empty_folder_skips_fetch() {
        let mailbox = FakeMailbox::new().with_folder("INBOX", 0);
        let mut session = mailbox.session();

        let messages = fetch(&mut session, "INBOX", 25).await.unwrap();

        assert!(messages.is_empty());
        assert!(mailbox.log().ranges.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_uses_header_then_internal_date() {
        let mailbox = FakeMailbox::new()
            .with_folder("INBOX", 2)
            .with_message(
                "INBOX",
                1,
                FakeMessage::new(rfc822("dated", Some("Mon, 01 Jan 2024 00:00:00 +0000")))
                    .internal_date(utc(2024, 1, 5)),
            )
            .with_message(
                "INBOX",
                2,
                FakeMessage::new(rfc822("undated", None)).internal_date(utc(2024, 1, 5)),
            );
        let mut session = mailbox.session();

        let messages = fetch(&mut session, "INBOX", 10).await.unwrap();

        let dated = messages.iter().find(|m| m.subject == "dated").unwrap();
        let undated = messages.iter().find(|m| m.subject == "undated").unwrap();
        assert_eq!(dated.date, utc(2024, 1, 1));
        assert_eq!(undated.date, utc(2024, 1, 5));
    }

    #[tokio::test]
    async fn test_malformed_message_is_dropped_not_fatal() {
        let mailbox = FakeMailbox::new()
            .with_folder("INBOX", 3)
            .with_message("INBOX", 2, FakeMessage::without_body());
        let mut session = mailbox.session();

        let messages = fetch(&mut session, "INBOX", 10).await.unwrap();

        let uids: Vec<u32> = messages.iter().map(|m| m.uid).collect();
        assert_eq!(uids, vec![3, 1]);
    }

    #[tokio::test]
    async fn test_every_streamed_message_is_returned_or_dropped() {
        let mut mailbox = FakeMailbox::new().with_folder("INBOX", 40);
        for seq in [3, 17, 40] {
            mailbox = mailbox.with_message("INBOX", seq, FakeMessage::without_body());
        }
        let mut session = mailbox.session();

        let messages = fetch(&mut session, "INBOX", 40).await.unwrap();

        assert_eq!(messages.len(), 37);
        assert_eq!(messages[0].uid, 39);
        assert!(messages.windows(2).all(|w| w[0].uid > w[1].uid));
        assert!(messages.iter().all(|m| ![3, 17, 40].contains(&m.uid)));
    }

    #[tokio::test]
    async fn test_seen_flag_becomes_read() {
        let mailbox = FakeMailbox::new().with_folder("INBOX", 1).with_message(
            "INBOX",
            1,
            FakeMessage::new(rfc822("read me", None)).seen(),
        );
        let mut session = mailbox.session();

        let messages = fetch(&mut session, "INBOX", 10).await.unwrap();
        assert!(messages[0].is_read);
    }

    #[tokio::test]
    async fn test_stream_error_fails_whole_pass() {
        let mailbox = FakeMailbox::new()
            .with_folder("INBOX", 5)
            .failing_fetch("INBOX");
        let mut session = mailbox.session();

        let err = fetch(&mut session, "INBOX", 10).await.unwrap_err();
        assert!(matches!(err, FetchError::Session(SessionError::Fetch(_))));
        assert!(!err.is_folder_missing());
    }

    #[tokio::test]
    async fn test_missing_folder_is_flagged_for_fallback() {
        let mailbox = FakeMailbox::new();
        let mut session = mailbox.session();

        let err = fetch(&mut session, "Sent", 10).await.unwrap_err();
        assert!(err.is_folder_missing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_nothing() {
        let mailbox = FakeMailbox::new()
            .with_folder("INBOX", 5)
            .stalling_fetch("INBOX");
        let mut session = mailbox.session();

        let err = fetch_with_timeout(&mut session, "INBOX", 10, Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }));
    }
}
