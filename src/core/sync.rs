//! Folder view and account sync use cases.
//!
//! A folder view is served from the cache whenever the cache already holds
//! rows for that folder and the caller did not force a sync. Otherwise one
//! session is opened, the logical folder's candidates are fetched in order
//! until one opens, the result is rewritten to the logical name and merged,
//! and the cache is served with any sync failure attached.

use crate::core::auth::CredentialVault;
use crate::core::cache::CacheStore;
use crate::core::fetch::{fetch_with_timeout, FetchError};
use crate::core::imap::{MailboxConnector, MailboxSession, SessionError};
use crate::models::account::Account;
use crate::models::config::{TimeoutBudget, Timeouts};
use crate::models::folder;
use crate::models::message::{CachedEmail, Message};
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    ServeFromCache,
    ForceEmptyCache,
    ForceExplicit,
}

impl SyncDecision {
    /// An empty cache is never trusted as synced.
    pub fn decide(force_sync: bool, cached_rows: i64) -> Self {
        if force_sync {
            SyncDecision::ForceExplicit
        } else if cached_rows == 0 {
            SyncDecision::ForceEmptyCache
        } else {
            SyncDecision::ServeFromCache
        }
    }

    pub fn needs_sync(&self) -> bool {
        !matches!(self, SyncDecision::ServeFromCache)
    }
}

#[derive(Debug, Clone)]
pub struct FolderRequest {
    pub folder: String,
    pub limit: u32,
    pub force_sync: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderView {
    pub emails: Vec<CachedEmail>,
    pub count: usize,
    pub served_from_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountSyncReport {
    pub account: String,
    pub inbox: usize,
    pub sent: usize,
    pub total: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("account {0} is inactive")]
    Inactive(String),
    #[error("credentials unavailable: {0:#}")]
    Credentials(anyhow::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("no folder found for {logical} (tried {}): {last}", .tried.join(", "))]
    NoCandidate {
        logical: String,
        tried: Vec<String>,
        last: String,
    },
    #[error("cache update failed: {0:#}")]
    Cache(anyhow::Error),
    #[error("sync task aborted: {0}")]
    Aborted(String),
}

impl SyncError {
    /// A FETCH was abandoned mid-response, so the session may still carry its
    /// untagged replies and must not be reused.
    pub fn leaves_session_dirty(&self) -> bool {
        matches!(self, SyncError::Fetch(err) if !err.is_folder_missing())
    }
}

/// Rewrite every message to the logical folder name.
pub fn normalize_folder(mut messages: Vec<Message>, logical: &str) -> Vec<Message> {
    for message in &mut messages {
        if message.folder != logical {
            message.folder = logical.to_string();
        }
    }
    messages
}

/// Fetch the first candidate spelling of `logical` that opens. Only a
/// missing folder moves on to the next candidate.
pub async fn fetch_first_candidate(
    session: &mut dyn MailboxSession,
    logical: &str,
    limit: u32,
    fetch_timeout: Duration,
) -> Result<(String, Vec<Message>), SyncError> {
    let candidates = folder::resolve(logical);
    let mut last = String::new();

    for candidate in &candidates {
        match fetch_with_timeout(session, candidate, limit, fetch_timeout).await {
            Ok(messages) => {
                if candidate != logical {
                    debug!(logical, remote = %candidate, "resolved folder alias");
                }
                return Ok((candidate.clone(), messages));
            }
            Err(err) if err.is_folder_missing() => {
                debug!(candidate = %candidate, error = %err, "folder candidate unavailable");
                last = err.to_string();
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(SyncError::NoCandidate {
        logical: logical.to_string(),
        tried: candidates,
        last,
    })
}

#[derive(Clone)]
pub struct Orchestrator {
    connector: Arc<dyn MailboxConnector>,
    vault: Arc<dyn CredentialVault>,
    store: CacheStore,
    timeouts: Timeouts,
}

impl Orchestrator {
    pub fn new(
        connector: Arc<dyn MailboxConnector>,
        vault: Arc<dyn CredentialVault>,
        store: CacheStore,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            connector,
            vault,
            store,
            timeouts,
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Serve one folder of one account, syncing first when the cache cannot
    /// be trusted or the caller asked for it. Sync failures are reported in
    /// the view; only a failing cache read is an error.
    pub async fn load_folder(&self, account: &Account, request: FolderRequest) -> Result<FolderView> {
        let logical = folder::canonicalize(&request.folder);
        let owner = account.owner();

        let cached = self.store.count_cached(&owner, &logical).await?;
        let decision = SyncDecision::decide(request.force_sync, cached);
        debug!(account = %account.id, folder = %logical, cached, ?decision, "sync decision");

        let mut synced = false;
        let mut sync_error = None;
        if decision.needs_sync() {
            match self
                .sync_folder(account, &logical, request.limit, self.timeouts.interactive)
                .await
            {
                Ok(merged) => {
                    info!(account = %account.id, folder = %logical, merged, "folder synced");
                    synced = true;
                }
                Err(err) => {
                    warn!(account = %account.id, folder = %logical, error = %err, "sync failed; serving cache");
                    sync_error = Some(err.to_string());
                }
            }
        }

        let emails = self.store.list_folder(&owner, &logical, request.limit).await?;
        Ok(FolderView {
            count: emails.len(),
            emails,
            served_from_cache: !synced,
            sync_error,
        })
    }

    /// One sync pass of one logical folder. The pass runs on its own task so
    /// a caller that stops waiting does not strand the session.
    pub async fn sync_folder(
        &self,
        account: &Account,
        logical: &str,
        limit: u32,
        budget: TimeoutBudget,
    ) -> Result<usize, SyncError> {
        let this = self.clone();
        let account = account.clone();
        let logical = logical.to_string();

        tokio::spawn(async move {
            let mut session = this.open_session(&account, budget.connect()).await?;
            let result = this
                .sync_in_session(session.as_mut(), &account, &logical, limit, budget.fetch())
                .await;
            session.close().await;
            result
        })
        .await
        .map_err(|e| SyncError::Aborted(e.to_string()))?
    }

    /// Sync INBOX and Sent over one session with the background budget.
    pub async fn sync_account(&self, account: &Account, limit: u32) -> Result<AccountSyncReport, SyncError> {
        let this = self.clone();
        let account = account.clone();

        tokio::spawn(async move {
            let budget = this.timeouts.background;
            let mut session = Some(this.open_session(&account, budget.connect()).await?);

            let mut report = AccountSyncReport {
                account: account.id.clone(),
                inbox: 0,
                sent: 0,
                total: 0,
                errors: Vec::new(),
            };

            for logical in [folder::INBOX, folder::SENT] {
                if session.is_none() {
                    match this.open_session(&account, budget.connect()).await {
                        Ok(fresh) => {
                            debug!(account = %account.id, folder = logical, "reopened session");
                            session = Some(fresh);
                        }
                        Err(err) => {
                            warn!(account = %account.id, folder = logical, error = %err, "reconnect failed");
                            report.errors.push(format!("{}: {}", logical, err));
                            continue;
                        }
                    }
                }
                let Some(active) = session.as_mut() else {
                    continue;
                };

                let result = this
                    .sync_in_session(active.as_mut(), &account, logical, limit, budget.fetch())
                    .await;
                match result {
                    Ok(merged) if logical == folder::INBOX => report.inbox = merged,
                    Ok(merged) => report.sent = merged,
                    Err(err) => {
                        warn!(account = %account.id, folder = logical, error = %err, "folder sync failed");
                        if err.leaves_session_dirty() {
                            if let Some(mut dirty) = session.take() {
                                dirty.close().await;
                            }
                        }
                        report.errors.push(format!("{}: {}", logical, err));
                    }
                }
            }
            if let Some(mut session) = session {
                session.close().await;
            }

            report.total = report.inbox + report.sent;
            if report.errors.len() < 2 {
                this.store
                    .record_sync(&account.id, Utc::now())
                    .await
                    .map_err(SyncError::Cache)?;
            }

            info!(
                account = %account.id,
                inbox = report.inbox,
                sent = report.sent,
                errors = report.errors.len(),
                "account sync complete"
            );
            Ok(report)
        })
        .await
        .map_err(|e| SyncError::Aborted(e.to_string()))?
    }

    /// Authenticated session for an active account. The caller owns the
    /// session and must close it.
    pub(crate) async fn open_session(
        &self,
        account: &Account,
        connect_timeout: Duration,
    ) -> Result<Box<dyn MailboxSession>, SyncError> {
        if !account.active {
            return Err(SyncError::Inactive(account.id.clone()));
        }
        let secret = self
            .vault
            .secret(&account.id)
            .map_err(SyncError::Credentials)?;

        Ok(self.connector.open(account, &secret, connect_timeout).await?)
    }

    async fn sync_in_session(
        &self,
        session: &mut dyn MailboxSession,
        account: &Account,
        logical: &str,
        limit: u32,
        fetch_timeout: Duration,
    ) -> Result<usize, SyncError> {
        let (_, messages) = fetch_first_candidate(session, logical, limit, fetch_timeout).await?;
        let messages = normalize_folder(messages, logical);

        self.store
            .upsert_batch(&account.owner(), &messages)
            .await
            .map_err(SyncError::Cache)
    }
}
