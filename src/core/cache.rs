#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::models::account::MailboxOwner;
use crate::models::message::{CachedEmail, Direction, EmailAddress, Message};
use crate::utils::batch::rows_per_statement;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{migrate::MigrateDatabase, FromRow, QueryBuilder, Sqlite};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Bound columns per row in the batch upsert.
const UPSERT_COLUMNS: usize = 16;

const UPSERT_PREFIX: &str = "INSERT INTO cached_emails (tenant_id, account_id, user_id, uid, folder, \
     direction, from_name, from_address, recipient_to, subject, body_text, body_html, received_at, \
     attachment_count, is_read, message_id) ";

const UPSERT_CONFLICT: &str = " ON CONFLICT(tenant_id, account_id, uid, folder) DO UPDATE SET \
     from_name = excluded.from_name, \
     from_address = excluded.from_address, \
     recipient_to = excluded.recipient_to, \
     subject = excluded.subject, \
     body_text = excluded.body_text, \
     body_html = excluded.body_html, \
     received_at = excluded.received_at, \
     attachment_count = excluded.attachment_count, \
     is_read = excluded.is_read, \
     message_id = COALESCE(excluded.message_id, message_id)";

/// A sent message mirrored into the cache without a round trip to the server.
#[derive(Debug, Clone)]
pub struct OutboundRecord {
    pub folder: String,
    pub message_id: String,
    pub from: EmailAddress,
    pub to: Vec<EmailAddress>,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct CachedRow {
    uid: i64,
    folder: String,
    direction: String,
    from_name: Option<String>,
    from_address: String,
    recipient_to: String,
    subject: String,
    body_text: String,
    body_html: Option<String>,
    received_at: String,
    attachment_count: i64,
    is_read: bool,
}

impl TryFrom<CachedRow> for CachedEmail {
    type Error = anyhow::Error;

    fn try_from(row: CachedRow) -> Result<Self> {
        let date = DateTime::parse_from_rfc3339(&row.received_at)
            .with_context(|| format!("Invalid received_at on cached row {}", row.uid))?
            .with_timezone(&Utc);
        let to: Vec<EmailAddress> = serde_json::from_str(&row.recipient_to)
            .with_context(|| format!("Invalid recipient_to on cached row {}", row.uid))?;

        Ok(CachedEmail {
            uid: row.uid,
            folder: row.folder,
            from: EmailAddress::new(row.from_address, row.from_name).format(),
            to,
            subject: row.subject,
            text: row.body_text,
            html_content: row.body_html,
            date,
            attachment_count: row.attachment_count,
            has_attachments: row.attachment_count > 0,
            is_read: row.is_read,
            direction: Direction::from_str(&row.direction).unwrap_or(Direction::Inbound),
        })
    }
}

fn timestamp(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Durable projection of synced and sent mail, and the unified-inbox read path.
#[derive(Clone)]
pub struct CacheStore {
    pool: SqlitePool,
}

impl CacheStore {
    pub fn default_path() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to get local data directory")?
            .join("inboxsync");

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        #[cfg(unix)]
        {
            let permissions = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(&data_dir, permissions)
                .context("Failed to set directory permissions")?;
        }

        Ok(data_dir.join("cache.db"))
    }

    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create cache directory")?;
        }
        let db_url = format!("sqlite://{}", path.display());

        if !Sqlite::database_exists(&db_url).await.unwrap_or(false) {
            Sqlite::create_database(&db_url)
                .await
                .context("Failed to create cache database")?;
        }

        let pool = SqlitePool::connect(&db_url)
            .await
            .context("Failed to connect to cache database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Private database for tests and dry runs. One connection, so every
    /// query sees the same memory database.
    pub async fn in_memory() -> Result<Self> {
        // The database lives and dies with its only connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .test_before_acquire(false)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        let migration_001 = include_str!("../../migrations/001_cached_emails.sql");
        sqlx::query(migration_001)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    pub async fn count_cached(&self, owner: &MailboxOwner, folder: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM cached_emails
            WHERE tenant_id = ?1 AND account_id = ?2 AND folder = ?3
            "#,
        )
        .bind(&owner.tenant_id)
        .bind(&owner.account_id)
        .bind(folder)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count cached emails")?;

        Ok(count)
    }

    /// Merge one fetch pass. Either every message lands or none do.
    pub async fn upsert_batch(&self, owner: &MailboxOwner, messages: &[Message]) -> Result<usize> {
        if messages.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin cache transaction")?;

        for chunk in messages.chunks(rows_per_statement(UPSERT_COLUMNS)) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(UPSERT_PREFIX);
            builder.push_values(chunk, |mut row, message| {
                let recipients =
                    serde_json::to_string(&message.to).unwrap_or_else(|_| "[]".to_string());
                row.push_bind(owner.tenant_id.as_str())
                    .push_bind(owner.account_id.as_str())
                    .push_bind(owner.user_id.as_str())
                    .push_bind(i64::from(message.uid))
                    .push_bind(message.folder.as_str())
                    .push_bind(Direction::Inbound.as_str())
                    .push_bind(message.from.name.as_deref())
                    .push_bind(message.from.address.as_str())
                    .push_bind(recipients)
                    .push_bind(message.subject.as_str())
                    .push_bind(message.text.as_str())
                    .push_bind(message.html.as_deref())
                    .push_bind(timestamp(&message.date))
                    .push_bind(message.attachment_count as i64)
                    .push_bind(message.is_read)
                    .push_bind(message.message_id.as_deref());
            });
            builder.push(UPSERT_CONFLICT);

            builder
                .build()
                .execute(&mut *tx)
                .await
                .context("Failed to upsert cached emails")?;
        }

        tx.commit()
            .await
            .context("Failed to commit cached emails")?;

        debug!(account = %owner.account_id, rows = messages.len(), "merged fetch pass into cache");
        Ok(messages.len())
    }

    /// Newest first, at most `limit` rows.
    pub async fn list_folder(
        &self,
        owner: &MailboxOwner,
        folder: &str,
        limit: u32,
    ) -> Result<Vec<CachedEmail>> {
        let rows: Vec<CachedRow> = sqlx::query_as(
            r#"
            SELECT uid, folder, direction, from_name, from_address, recipient_to, subject,
                   body_text, body_html, received_at, attachment_count, is_read
            FROM cached_emails
            WHERE tenant_id = ?1 AND account_id = ?2 AND folder = ?3
            ORDER BY received_at DESC, uid DESC
            LIMIT ?4
            "#,
        )
        .bind(&owner.tenant_id)
        .bind(&owner.account_id)
        .bind(folder)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list cached emails")?;

        rows.into_iter().map(CachedEmail::try_from).collect()
    }

    /// Insert a sent message with a synthetic uid below every uid already
    /// stored for the folder, never positive. Returns the allocated uid.
    pub async fn insert_outbound(&self, owner: &MailboxOwner, record: &OutboundRecord) -> Result<i64> {
        let recipients = serde_json::to_string(&record.to).context("Failed to encode recipients")?;

        let (uid,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO cached_emails (tenant_id, account_id, user_id, uid, folder, direction,
                from_name, from_address, recipient_to, subject, body_text, body_html,
                received_at, attachment_count, is_read, message_id)
            SELECT ?1, ?2, ?3, MIN(COALESCE(MIN(uid), 0), 0) - 1, ?4, 'outbound',
                ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, TRUE, ?12
            FROM cached_emails
            WHERE tenant_id = ?1 AND account_id = ?2 AND folder = ?4
            RETURNING uid
            "#,
        )
        .bind(&owner.tenant_id)
        .bind(&owner.account_id)
        .bind(&owner.user_id)
        .bind(&record.folder)
        .bind(record.from.name.as_deref())
        .bind(&record.from.address)
        .bind(recipients)
        .bind(&record.subject)
        .bind(&record.text)
        .bind(record.html.as_deref())
        .bind(timestamp(&record.sent_at))
        .bind(&record.message_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to mirror sent message into cache")?;

        Ok(uid)
    }

    /// Returns the number of rows changed.
    pub async fn set_read(
        &self,
        owner: &MailboxOwner,
        folder: &str,
        uids: &[i64],
        read: bool,
    ) -> Result<u64> {
        if uids.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE cached_emails SET is_read = ");
        builder
            .push_bind(read)
            .push(" WHERE tenant_id = ")
            .push_bind(owner.tenant_id.as_str())
            .push(" AND account_id = ")
            .push_bind(owner.account_id.as_str())
            .push(" AND folder = ")
            .push_bind(folder)
            .push(" AND uid IN (");
        let mut separated = builder.separated(", ");
        for uid in uids {
            separated.push_bind(*uid);
        }
        separated.push_unseparated(")");

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .context("Failed to update read status")?;

        Ok(result.rows_affected())
    }

    /// `(uid, folder)` of every row marked read for the account.
    pub async fn read_map(&self, owner: &MailboxOwner) -> Result<Vec<(i64, String)>> {
        sqlx::query_as(
            r#"
            SELECT uid, folder
            FROM cached_emails
            WHERE tenant_id = ?1 AND account_id = ?2 AND is_read = TRUE
            ORDER BY folder, uid
            "#,
        )
        .bind(&owner.tenant_id)
        .bind(&owner.account_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load read status")
    }

    pub async fn record_sync(&self, account_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_sync_state (account_id, last_sync)
            VALUES (?1, ?2)
            ON CONFLICT(account_id) DO UPDATE SET last_sync = excluded.last_sync
            "#,
        )
        .bind(account_id)
        .bind(timestamp(&at))
        .execute(&self.pool)
        .await
        .context("Failed to record sync time")?;

        Ok(())
    }

    pub async fn last_sync(&self, account_id: &str) -> Result<Option<DateTime<Utc>>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT last_sync FROM account_sync_state WHERE account_id = ?1")
                .bind(account_id)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to read sync time")?;

        row.map(|(ts,)| {
            DateTime::parse_from_rfc3339(&ts)
                .map(|d| d.with_timezone(&Utc))
                .context("Invalid last_sync timestamp")
        })
        .transpose()
    }
}
