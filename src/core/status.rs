use crate::core::imap::{AccessMode, MailboxSession, SessionError};
use crate::core::sync::{Orchestrator, SyncError};
use crate::models::account::Account;
use crate::models::folder;
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReport {
    pub account: String,
    pub folder: String,
    pub uids: Vec<i64>,
    pub is_read: bool,
    pub updated: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_folder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadStatus {
    pub read: BTreeMap<String, bool>,
    pub count: usize,
}

/// Server sequence numbers among `uids`. Mirrored sent rows carry
/// non-positive uids and exist only in the cache.
fn remote_sequence_numbers(uids: &[i64]) -> Vec<u32> {
    uids.iter()
        .filter_map(|uid| u32::try_from(*uid).ok())
        .filter(|seq| *seq > 0)
        .collect()
}

/// Set `\Seen` in the first spelling of `logical` that opens read-write.
pub async fn set_seen_first_writable(
    session: &mut dyn MailboxSession,
    logical: &str,
    seqs: &[u32],
    seen: bool,
) -> Result<String, SyncError> {
    let candidates = folder::resolve(logical);
    let mut last = String::new();

    for candidate in &candidates {
        match session.select_folder(candidate, AccessMode::ReadWrite).await {
            Ok(_) => {
                session.set_seen(seqs, seen).await?;
                return Ok(candidate.clone());
            }
            Err(err) => {
                debug!(candidate = %candidate, error = %err, "folder candidate unavailable");
                last = err.to_string();
            }
        }
    }

    Err(SyncError::NoCandidate {
        logical: logical.to_string(),
        tried: candidates,
        last,
    })
}

impl Orchestrator {
    /// Update the cached read flag, then mirror it to the server if possible.
    /// Only a cache failure is an error.
    pub async fn mark_read(
        &self,
        account: &Account,
        folder: &str,
        uids: &[i64],
        read: bool,
    ) -> Result<MarkReport> {
        let logical = folder::canonicalize(folder);
        let updated = self
            .store()
            .set_read(&account.owner(), &logical, uids, read)
            .await?;

        let mut report = MarkReport {
            account: account.id.clone(),
            folder: logical.clone(),
            uids: uids.to_vec(),
            is_read: read,
            updated,
            remote_folder: None,
            remote_error: None,
        };

        let seqs = remote_sequence_numbers(uids);
        if seqs.is_empty() {
            return Ok(report);
        }

        match self.set_seen_remote(account, &logical, seqs, read).await {
            Ok(remote) => {
                info!(account = %account.id, folder = %remote, read, "read status pushed to server");
                report.remote_folder = Some(remote);
            }
            Err(err) => {
                warn!(account = %account.id, folder = %logical, error = %err, "remote read status update failed");
                report.remote_error = Some(err.to_string());
            }
        }

        Ok(report)
    }

    /// `"{uid}-{folder}"` for every cached row marked read.
    pub async fn read_status(&self, account: &Account) -> Result<ReadStatus> {
        let read: BTreeMap<String, bool> = self
            .store()
            .read_map(&account.owner())
            .await?
            .into_iter()
            .map(|(uid, folder)| (format!("{}-{}", uid, folder), true))
            .collect();

        Ok(ReadStatus {
            count: read.len(),
            read,
        })
    }

    async fn set_seen_remote(
        &self,
        account: &Account,
        logical: &str,
        seqs: Vec<u32>,
        seen: bool,
    ) -> Result<String, SyncError> {
        let this = self.clone();
        let account = account.clone();
        let logical = logical.to_string();

        tokio::spawn(async move {
            let budget = this.timeouts().interactive;
            let mut session = this.open_session(&account, budget.connect()).await?;
            let result =
                set_seen_with_timeout(session.as_mut(), &logical, &seqs, seen, budget.fetch()).await;
            session.close().await;
            result
        })
        .await
        .map_err(|e| SyncError::Aborted(e.to_string()))?
    }
}

async fn set_seen_with_timeout(
    session: &mut dyn MailboxSession,
    logical: &str,
    seqs: &[u32],
    seen: bool,
    budget: Duration,
) -> Result<String, SyncError> {
    tokio::time::timeout(budget, set_seen_first_writable(session, logical, seqs, seen))
        .await
        .map_err(|_| {
            SyncError::Session(SessionError::Timeout {
                operation: "flag update",
                after: budget,
            })
        })?
}
