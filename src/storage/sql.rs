// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite-backed local store.
//!
//! One database file holds the device-local replica:
//!
//! ```sql
//! CREATE TABLE goals (
//!   id TEXT PRIMARY KEY,
//!   name TEXT NOT NULL,
//!   target_value INTEGER NOT NULL,
//!   current_value INTEGER NOT NULL,
//!   is_complete INTEGER NOT NULL,     -- derived, kept for queryability
//!   creation_date_us INTEGER NOT NULL,
//!   updated_at_us INTEGER NOT NULL
//! );
//! CREATE TABLE sync_state (key TEXT PRIMARY KEY, value TEXT NOT NULL);  -- 'cursor'
//! CREATE TABLE outbox (
//!   goal_id TEXT PRIMARY KEY,
//!   seq INTEGER NOT NULL,
//!   kind TEXT NOT NULL,               -- create | update | delete
//!   payload TEXT,                     -- GoalDto JSON, NULL for delete
//!   attempts INTEGER NOT NULL,
//!   enqueued_at_us INTEGER NOT NULL
//! );
//! ```
//!
//! Timestamps are stored as microseconds since the epoch; the cursor is
//! stored as RFC 3339 text. `is_complete` is written but never trusted on
//! read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Once;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::goal::{utc_now, Goal};
use crate::remote::wire::{format_timestamp, parse_timestamp, GoalDto};
use crate::resilience::outbox::{collapse, LocalChange, MutationKind, PendingMutation};
use crate::resilience::retry::{retry, RetryConfig};
use super::traits::{CursorStore, GoalStore, OutboxStore, StorageError};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

const CURSOR_KEY: &str = "cursor";

pub struct SqlStore {
    pool: AnyPool,
    /// Serializes outbox read-modify-write so collapse sees the latest entry
    outbox_lock: Mutex<()>,
    next_seq: AtomicU64,
}

impl SqlStore {
    /// Open (creating if needed) the store with startup-mode retry.
    ///
    /// `connection_string` is an SQLite URL such as
    /// `sqlite://goal_sync.db?mode=rwc`.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        if !connection_string.starts_with("sqlite:") {
            return Err(StorageError::Backend(format!(
                "unsupported store URL '{}': only sqlite is supported",
                connection_string
            )));
        }

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(4)
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                // Per-connection setting, so every pooled connection gets it
                .after_connect(|conn, _meta| {
                    Box::pin(async move {
                        sqlx::query("PRAGMA synchronous = NORMAL").execute(&mut *conn).await?;
                        Ok(())
                    })
                })
                .connect(connection_string)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        let store = Self {
            pool,
            outbox_lock: Mutex::new(()),
            next_seq: AtomicU64::new(1),
        };
        store.enable_wal_mode().await?;
        store.init_schema().await?;

        let max_seq: i64 = sqlx::query("SELECT COALESCE(MAX(seq), 0) AS max_seq FROM outbox")
            .fetch_one(&store.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
            .try_get("max_seq")
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        store.next_seq.store(max_seq as u64 + 1, Ordering::SeqCst);

        Ok(store)
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    /// WAL journal: readers don't block the single writer. The journal mode
    /// is stored in the database file, so one connection is enough.
    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS goals (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                target_value INTEGER NOT NULL,
                current_value INTEGER NOT NULL,
                is_complete INTEGER NOT NULL,
                creation_date_us INTEGER NOT NULL,
                updated_at_us INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS sync_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS outbox (
                goal_id TEXT PRIMARY KEY,
                seq INTEGER NOT NULL,
                kind TEXT NOT NULL,
                payload TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                enqueued_at_us INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_outbox_seq ON outbox (seq)",
        ];

        for sql in statements {
            retry("sql_init_schema", &RetryConfig::startup(), || async {
                sqlx::query(sql)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))
            })
            .await?;
        }

        Ok(())
    }

    fn goal_from_row(row: &AnyRow) -> Result<Goal, StorageError> {
        let id: String = get(row, "id")?;
        let key = id.clone();
        let id = Uuid::parse_str(&id).map_err(|e| corruption(&key, e))?;

        Ok(Goal::restore(
            id,
            get(row, "name")?,
            get(row, "target_value")?,
            get(row, "current_value")?,
            micros_to_ts(&key, get(row, "creation_date_us")?)?,
            micros_to_ts(&key, get(row, "updated_at_us")?)?,
        ))
    }

    fn pending_from_row(row: &AnyRow) -> Result<PendingMutation, StorageError> {
        let goal_id: String = get(row, "goal_id")?;
        let key = format!("outbox/{}", goal_id);
        let goal_id = Uuid::parse_str(&goal_id).map_err(|e| corruption(&key, e))?;

        let kind: String = get(row, "kind")?;
        let kind = MutationKind::parse(&kind)
            .ok_or_else(|| corruption(&key, format!("unknown mutation kind '{}'", kind)))?;

        let payload: Option<String> = get(row, "payload")?;
        let snapshot = match payload {
            Some(json) => Some(serde_json::from_str::<GoalDto>(&json).map_err(|e| corruption(&key, e))?),
            None => None,
        };

        let seq: i64 = get(row, "seq")?;
        let attempts: i64 = get(row, "attempts")?;

        Ok(PendingMutation {
            goal_id,
            seq: seq as u64,
            kind,
            snapshot,
            attempts: attempts as u32,
            enqueued_at: micros_to_ts(&key, get(row, "enqueued_at_us")?)?,
        })
    }
}

fn get<'r, T>(row: &'r AnyRow, column: &str) -> Result<T, StorageError>
where
    T: sqlx::Decode<'r, sqlx::Any> + sqlx::Type<sqlx::Any>,
{
    row.try_get(column)
        .map_err(|e| StorageError::Backend(format!("column '{}': {}", column, e)))
}

fn corruption(key: &str, reason: impl std::fmt::Display) -> StorageError {
    StorageError::Corruption {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn micros_to_ts(key: &str, micros: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| corruption(key, format!("timestamp out of range: {}", micros)))
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

#[async_trait]
impl GoalStore for SqlStore {
    async fn get_goal(&self, id: Uuid) -> Result<Option<Goal>, StorageError> {
        let id = id.to_string();
        let row = retry("sql_get_goal", &RetryConfig::query(), || async {
            sqlx::query(
                "SELECT id, name, target_value, current_value, creation_date_us, updated_at_us \
                 FROM goals WHERE id = ?",
            )
            .bind(&id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)
        })
        .await?;

        row.as_ref().map(Self::goal_from_row).transpose()
    }

    async fn put_goal(&self, goal: &Goal) -> Result<(), StorageError> {
        let id = goal.id().to_string();
        retry("sql_put_goal", &RetryConfig::query(), || async {
            sqlx::query(
                "INSERT INTO goals (id, name, target_value, current_value, is_complete, creation_date_us, updated_at_us)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    target_value = excluded.target_value,
                    current_value = excluded.current_value,
                    is_complete = excluded.is_complete,
                    updated_at_us = excluded.updated_at_us",
            )
            .bind(&id)
            .bind(goal.name())
            .bind(goal.target_value())
            .bind(goal.current_value())
            .bind(i64::from(goal.is_complete()))
            .bind(goal.creation_date().timestamp_micros())
            .bind(goal.updated_at().timestamp_micros())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
            Ok(())
        })
        .await
    }

    async fn delete_goal(&self, id: Uuid) -> Result<bool, StorageError> {
        let id = id.to_string();
        retry("sql_delete_goal", &RetryConfig::query(), || async {
            let result = sqlx::query("DELETE FROM goals WHERE id = ?")
                .bind(&id)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn list_goals(&self) -> Result<Vec<Goal>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, name, target_value, current_value, creation_date_us, updated_at_us \
             FROM goals ORDER BY creation_date_us, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(Self::goal_from_row).collect()
    }
}

#[async_trait]
impl CursorStore for SqlStore {
    async fn load_cursor(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        let row = sqlx::query("SELECT value FROM sync_state WHERE key = ?")
            .bind(CURSOR_KEY)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let raw: String = get(&row, "value")?;
        match parse_timestamp(&raw) {
            Ok(cursor) => Ok(Some(cursor)),
            Err(e) => {
                warn!(value = %raw, error = %e, "Stored sync cursor is unreadable, treating as never synced");
                Ok(None)
            }
        }
    }

    async fn save_cursor(&self, cursor: DateTime<Utc>) -> Result<(), StorageError> {
        let value = format_timestamp(&cursor);
        retry("sql_save_cursor", &RetryConfig::query(), || async {
            sqlx::query(
                "INSERT INTO sync_state (key, value) VALUES (?, ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )
            .bind(CURSOR_KEY)
            .bind(&value)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
            Ok(())
        })
        .await?;
        debug!(cursor = %value, "Sync cursor saved");
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for SqlStore {
    async fn enqueue(&self, change: &LocalChange) -> Result<PendingMutation, StorageError> {
        let _guard = self.outbox_lock.lock().await;
        let existing = self.pending_for(change.goal_id()).await?;

        let entry = PendingMutation {
            goal_id: change.goal_id(),
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            kind: collapse(existing.as_ref().map(|e| e.kind), change.kind()),
            snapshot: change.snapshot(),
            attempts: existing.as_ref().map_or(0, |e| e.attempts),
            enqueued_at: existing.as_ref().map_or_else(utc_now, |e| e.enqueued_at),
        };

        let payload = entry
            .snapshot
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StorageError::Backend(format!("failed to encode outbox payload: {}", e)))?;

        sqlx::query(
            "INSERT INTO outbox (goal_id, seq, kind, payload, attempts, enqueued_at_us)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(goal_id) DO UPDATE SET
                seq = excluded.seq,
                kind = excluded.kind,
                payload = excluded.payload,
                attempts = excluded.attempts,
                enqueued_at_us = excluded.enqueued_at_us",
        )
        .bind(entry.goal_id.to_string())
        .bind(entry.seq as i64)
        .bind(entry.kind.as_str())
        .bind(payload)
        .bind(i64::from(entry.attempts))
        .bind(entry.enqueued_at.timestamp_micros())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(entry)
    }

    async fn pending_for(&self, id: Uuid) -> Result<Option<PendingMutation>, StorageError> {
        let row = sqlx::query(
            "SELECT goal_id, seq, kind, payload, attempts, enqueued_at_us FROM outbox WHERE goal_id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref().map(Self::pending_from_row).transpose()
    }

    async fn next_batch(&self, limit: usize) -> Result<Vec<PendingMutation>, StorageError> {
        let rows = sqlx::query(
            "SELECT goal_id, seq, kind, payload, attempts, enqueued_at_us FROM outbox ORDER BY seq LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(Self::pending_from_row).collect()
    }

    async fn ack(&self, id: Uuid, seq: u64) -> Result<bool, StorageError> {
        let _guard = self.outbox_lock.lock().await;
        let result = sqlx::query("DELETE FROM outbox WHERE goal_id = ? AND seq = ?")
            .bind(id.to_string())
            .bind(seq as i64)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_attempt(&self, id: Uuid, seq: u64) -> Result<(), StorageError> {
        let _guard = self.outbox_lock.lock().await;
        sqlx::query("UPDATE outbox SET attempts = attempts + 1 WHERE goal_id = ? AND seq = ?")
            .bind(id.to_string())
            .bind(seq as i64)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn pending_count(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM outbox")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?
            .try_get("n")
            .map_err(backend)?;
        Ok(count as u64)
    }
}
