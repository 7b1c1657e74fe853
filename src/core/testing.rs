//! Scripted in-process mailbox server for exercising sessions, syncs and
//! appends without a network.

use crate::core::imap::{
    AccessMode, MailboxConnector, MailboxInfo, MailboxSession, MessageAttributes, RawMessage,
    SeqRange, SessionError,
};
use crate::models::account::Account;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Minimal RFC 5322 document; `date` is an RFC 2822 header value.
pub fn rfc822(subject: &str, date: Option<&str>) -> Vec<u8> {
    let mut doc = String::from("From: \"Sender\" <sender@example.com>\r\nTo: owner@example.com\r\n");
    doc.push_str(&format!("Subject: {}\r\n", subject));
    if let Some(date) = date {
        doc.push_str(&format!("Date: {}\r\n", date));
    }
    doc.push_str("\r\nHello from the fake server.\r\n");
    doc.into_bytes()
}

fn generated_date(seq: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(i64::from(seq))
}

#[derive(Debug, Clone)]
pub struct FakeMessage {
    body: Option<Vec<u8>>,
    seen: bool,
    internal_date: Option<DateTime<Utc>>,
}

impl FakeMessage {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body: Some(body),
            seen: false,
            internal_date: None,
        }
    }

    pub fn without_body() -> Self {
        Self {
            body: None,
            seen: false,
            internal_date: None,
        }
    }

    pub fn seen(mut self) -> Self {
        self.seen = true;
        self
    }

    pub fn internal_date(mut self, date: DateTime<Utc>) -> Self {
        self.internal_date = Some(date);
        self
    }

    fn generated(seq: u32) -> Self {
        let date = generated_date(seq);
        Self::new(rfc822(&format!("Message {}", seq), Some(&date.to_rfc2822()))).internal_date(date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchBehavior {
    Normal,
    FailMidStream,
    Stall,
}

#[derive(Debug)]
struct FakeFolder {
    total: u32,
    messages: HashMap<u32, FakeMessage>,
    fetch: FetchBehavior,
    append_fails: bool,
}

/// Everything the fake server was asked to do.
#[derive(Debug, Clone, Default)]
pub struct SessionLog {
    pub opens: usize,
    pub closes: usize,
    pub selects: Vec<(String, AccessMode)>,
    pub ranges: Vec<(String, SeqRange)>,
    pub appends: Vec<(String, Vec<u8>)>,
    pub seen_updates: Vec<(String, Vec<u32>, bool)>,
}

#[derive(Debug, Default)]
struct FakeState {
    folders: HashMap<String, FakeFolder>,
    refuse_connect: bool,
    log: SessionLog,
}

#[derive(Clone, Default)]
pub struct FakeMailbox {
    state: Arc<Mutex<FakeState>>,
}

impl FakeMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn edit_folder(self, folder: &str, edit: impl FnOnce(&mut FakeFolder)) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let entry = state
                .folders
                .entry(folder.to_string())
                .or_insert_with(|| FakeFolder {
                    total: 0,
                    messages: HashMap::new(),
                    fetch: FetchBehavior::Normal,
                    append_fails: false,
                });
            edit(entry);
        }
        self
    }

    /// Folder holding `total` messages; unscripted ones are generated.
    pub fn with_folder(self, folder: &str, total: u32) -> Self {
        self.edit_folder(folder, |f| f.total = total)
    }

    pub fn with_message(self, folder: &str, seq: u32, message: FakeMessage) -> Self {
        self.edit_folder(folder, |f| {
            f.total = f.total.max(seq);
            f.messages.insert(seq, message);
        })
    }

    pub fn failing_fetch(self, folder: &str) -> Self {
        self.edit_folder(folder, |f| f.fetch = FetchBehavior::FailMidStream)
    }

    pub fn stalling_fetch(self, folder: &str) -> Self {
        self.edit_folder(folder, |f| f.fetch = FetchBehavior::Stall)
    }

    pub fn failing_append(self, folder: &str) -> Self {
        self.edit_folder(folder, |f| f.append_fails = true)
    }

    pub fn refusing_connections(self) -> Self {
        self.state.lock().unwrap().refuse_connect = true;
        self
    }

    /// Grow a folder between passes, as new mail arriving would.
    pub fn deliver(&self, folder: &str, count: u32) {
        let mut state = self.state.lock().unwrap();
        if let Some(f) = state.folders.get_mut(folder) {
            f.total += count;
        }
    }

    pub fn session(&self) -> FakeSession {
        FakeSession {
            state: Arc::clone(&self.state),
            selected: None,
        }
    }

    pub fn log(&self) -> SessionLog {
        self.state.lock().unwrap().log.clone()
    }
}

#[async_trait]
impl MailboxConnector for FakeMailbox {
    async fn open(
        &self,
        _account: &Account,
        _secret: &SecretString,
        _connect_timeout: Duration,
    ) -> Result<Box<dyn MailboxSession>, SessionError> {
        let mut state = self.state.lock().unwrap();
        state.log.opens += 1;
        if state.refuse_connect {
            return Err(SessionError::Connection(
                "cannot reach imap.example.com:993: connection refused".into(),
            ));
        }
        drop(state);
        Ok(Box::new(self.session()))
    }
}

pub struct FakeSession {
    state: Arc<Mutex<FakeState>>,
    selected: Option<String>,
}

#[async_trait]
impl MailboxSession for FakeSession {
    async fn select_folder(
        &mut self,
        folder: &str,
        mode: AccessMode,
    ) -> Result<MailboxInfo, SessionError> {
        let mut state = self.state.lock().unwrap();
        state.log.selects.push((folder.to_string(), mode));
        match state.folders.get(folder) {
            Some(f) => {
                self.selected = Some(folder.to_string());
                Ok(MailboxInfo { total: f.total })
            }
            None => {
                self.selected = None;
                Err(SessionError::Folder {
                    folder: folder.to_string(),
                    reason: "Mailbox doesn't exist".into(),
                })
            }
        }
    }

    async fn fetch_range(
        &mut self,
        range: SeqRange,
    ) -> Result<BoxStream<'_, Result<RawMessage, SessionError>>, SessionError> {
        let folder = self
            .selected
            .clone()
            .ok_or_else(|| SessionError::Fetch("no folder selected".into()))?;

        let mut state = self.state.lock().unwrap();
        state.log.ranges.push((folder.clone(), range));
        let f = state
            .folders
            .get(&folder)
            .ok_or_else(|| SessionError::Fetch("folder vanished".into()))?;

        if f.fetch == FetchBehavior::Stall {
            return Ok(stream::pending::<Result<RawMessage, SessionError>>().boxed());
        }

        let mut items: Vec<Result<RawMessage, SessionError>> = (range.start..=range.end)
            .map(|seq| {
                let message = f
                    .messages
                    .get(&seq)
                    .cloned()
                    .unwrap_or_else(|| FakeMessage::generated(seq));
                Ok(RawMessage {
                    seq,
                    attributes: MessageAttributes {
                        seen: message.seen,
                        internal_date: message.internal_date,
                    },
                    body: message.body,
                })
            })
            .collect();

        if f.fetch == FetchBehavior::FailMidStream {
            items.truncate(1);
            items.push(Err(SessionError::Fetch("connection reset by peer".into())));
        }

        Ok(stream::iter(items).boxed())
    }

    async fn append(&mut self, folder: &str, document: &[u8]) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap();
        let fails = state.folders.get(folder).map_or(true, |f| f.append_fails);
        if fails {
            return Err(SessionError::Append {
                folder: folder.to_string(),
                reason: "NO [TRYCREATE] append refused".into(),
            });
        }
        state.log.appends.push((folder.to_string(), document.to_vec()));
        if let Some(f) = state.folders.get_mut(folder) {
            f.total += 1;
        }
        Ok(())
    }

    async fn set_seen(&mut self, seqs: &[u32], seen: bool) -> Result<(), SessionError> {
        let folder = self
            .selected
            .clone()
            .ok_or_else(|| SessionError::Store("no folder selected".into()))?;
        self.state
            .lock()
            .unwrap()
            .log
            .seen_updates
            .push((folder, seqs.to_vec(), seen));
        Ok(())
    }

    async fn close(&mut self) {
        self.state.lock().unwrap().log.closes += 1;
    }
}
