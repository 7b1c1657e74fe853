use crate::models::account::{Account, SecurityType};
use async_imap::types::{Fetch, Flag};
use async_imap::Session;
use async_native_tls::{TlsConnector, TlsStream};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, warn};

/// Attributes plus whole-message body, fetched in one request per range.
const FETCH_ITEMS: &str = "(FLAGS INTERNALDATE BODY.PEEK[])";

/// Upper bound on LOGOUT so a wedged server cannot hold a request open.
const LOGOUT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("cannot open folder {folder}: {reason}")]
    Folder { folder: String, reason: String },
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("append to {folder} failed: {reason}")]
    Append { folder: String, reason: String },
    #[error("flag update failed: {0}")]
    Store(String),
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxInfo {
    pub total: u32,
}

/// Inclusive sequence-number range, rendered as an IMAP sequence set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqRange {
    pub start: u32,
    pub end: u32,
}

impl SeqRange {
    pub fn len(&self) -> usize {
        (self.end - self.start + 1) as usize
    }
}

impl fmt::Display for SeqRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAttributes {
    pub seen: bool,
    pub internal_date: Option<DateTime<Utc>>,
}

/// One FETCH response: server attributes and the undecoded RFC 5322 body.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub seq: u32,
    pub attributes: MessageAttributes,
    pub body: Option<Vec<u8>>,
}

impl RawMessage {
    fn from_fetch(fetch: &Fetch) -> Self {
        Self {
            seq: fetch.message,
            attributes: MessageAttributes {
                seen: fetch.flags().any(|f| matches!(f, Flag::Seen)),
                internal_date: fetch.internal_date().map(|d| d.with_timezone(&Utc)),
            },
            body: fetch.body().map(<[u8]>::to_vec),
        }
    }
}

/// One authenticated connection to one account. Never shared between
/// requests; the owner must call [`MailboxSession::close`] on every path.
#[async_trait]
pub trait MailboxSession: Send {
    async fn select_folder(
        &mut self,
        folder: &str,
        mode: AccessMode,
    ) -> Result<MailboxInfo, SessionError>;

    async fn fetch_range(
        &mut self,
        range: SeqRange,
    ) -> Result<BoxStream<'_, Result<RawMessage, SessionError>>, SessionError>;

    /// Append a complete message to `folder`, marked `\Seen`.
    async fn append(&mut self, folder: &str, document: &[u8]) -> Result<(), SessionError>;

    /// Add or remove `\Seen` on sequence numbers in the selected folder.
    async fn set_seen(&mut self, seqs: &[u32], seen: bool) -> Result<(), SessionError>;

    async fn close(&mut self);
}

#[async_trait]
pub trait MailboxConnector: Send + Sync {
    async fn open(
        &self,
        account: &Account,
        secret: &SecretString,
        connect_timeout: Duration,
    ) -> Result<Box<dyn MailboxSession>, SessionError>;
}

/// Connector for real IMAP servers over TLS.
pub struct ImapConnector;

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn open(
        &self,
        account: &Account,
        secret: &SecretString,
        connect_timeout: Duration,
    ) -> Result<Box<dyn MailboxSession>, SessionError> {
        let session = tokio::time::timeout(connect_timeout, ImapSession::connect(account, secret))
            .await
            .map_err(|_| SessionError::Timeout {
                operation: "connect",
                after: connect_timeout,
            })??;

        Ok(Box::new(session))
    }
}

pub struct ImapSession {
    session: Session<TlsStream<Compat<TcpStream>>>,
}

fn connection_error(context: &str, err: impl fmt::Display) -> SessionError {
    SessionError::Connection(format!("{}: {}", context, err))
}

impl ImapSession {
    pub async fn connect(account: &Account, secret: &SecretString) -> Result<Self, SessionError> {
        let addr = format!("{}:{}", account.imap_host, account.imap_port);
        let tls_connector =
            TlsConnector::new().danger_accept_invalid_certs(account.accept_invalid_certs);

        let tcp_stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| connection_error(&format!("cannot reach {}", addr), e))?
            .compat();

        let client = match account.imap_security {
            SecurityType::StartTls => {
                let mut client = async_imap::Client::new(tcp_stream);
                client
                    .run_command_and_check_ok("STARTTLS", None)
                    .await
                    .map_err(|e| connection_error("STARTTLS rejected", e))?;

                let tls_stream = tls_connector
                    .connect(&account.imap_host, client.into_inner())
                    .await
                    .map_err(|e| connection_error("TLS upgrade failed", e))?;

                async_imap::Client::new(tls_stream)
            }
            SecurityType::Ssl => {
                let tls_stream = tls_connector
                    .connect(&account.imap_host, tcp_stream)
                    .await
                    .map_err(|e| connection_error("TLS handshake failed", e))?;

                async_imap::Client::new(tls_stream)
            }
        };

        let session = client
            .login(&account.username, secret.expose_secret())
            .await
            .map_err(|e| connection_error("authentication failed", e.0))?;

        debug!(account = %account.id, host = %account.imap_host, "IMAP session established");

        Ok(Self { session })
    }
}

#[async_trait]
impl MailboxSession for ImapSession {
    async fn select_folder(
        &mut self,
        folder: &str,
        mode: AccessMode,
    ) -> Result<MailboxInfo, SessionError> {
        let mailbox = match mode {
            AccessMode::ReadOnly => self.session.examine(folder).await,
            AccessMode::ReadWrite => self.session.select(folder).await,
        }
        .map_err(|e| SessionError::Folder {
            folder: folder.to_string(),
            reason: e.to_string(),
        })?;

        Ok(MailboxInfo {
            total: mailbox.exists,
        })
    }

    async fn fetch_range(
        &mut self,
        range: SeqRange,
    ) -> Result<BoxStream<'_, Result<RawMessage, SessionError>>, SessionError> {
        let stream = self
            .session
            .fetch(range.to_string(), FETCH_ITEMS)
            .await
            .map_err(|e| SessionError::Fetch(e.to_string()))?;

        Ok(stream
            .map(|item| {
                item.map(|fetch| RawMessage::from_fetch(&fetch))
                    .map_err(|e| SessionError::Fetch(e.to_string()))
            })
            .boxed())
    }

    async fn append(&mut self, folder: &str, document: &[u8]) -> Result<(), SessionError> {
        self.session
            .append(folder, Some("(\\Seen)"), None, document)
            .await
            .map_err(|e| SessionError::Append {
                folder: folder.to_string(),
                reason: e.to_string(),
            })
    }

    async fn set_seen(&mut self, seqs: &[u32], seen: bool) -> Result<(), SessionError> {
        if seqs.is_empty() {
            return Ok(());
        }

        let seq_set = seqs
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let command = if seen {
            "+FLAGS (\\Seen)"
        } else {
            "-FLAGS (\\Seen)"
        };

        self.session
            .store(&seq_set, command)
            .await
            .map_err(|e| SessionError::Store(e.to_string()))?
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| SessionError::Store(e.to_string()))?;

        Ok(())
    }

    async fn close(&mut self) {
        match tokio::time::timeout(LOGOUT_TIMEOUT, self.session.logout()).await {
            Ok(Ok(())) => debug!("IMAP session closed"),
            Ok(Err(e)) => warn!(error = %e, "IMAP logout failed; dropping connection"),
            Err(_) => warn!("IMAP logout timed out; dropping connection"),
        }
    }
}
