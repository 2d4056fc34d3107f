use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::goal::Goal;
use crate::resilience::outbox::{LocalChange, PendingMutation};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Corrupt record '{key}': {reason}")]
    Corruption { key: String, reason: String },
}

/// Durable local collection of goal records.
///
/// Owns no sync logic. Callers serialize writes through the engine.
#[async_trait]
pub trait GoalStore: Send + Sync {
    async fn get_goal(&self, id: Uuid) -> Result<Option<Goal>, StorageError>;
    async fn put_goal(&self, goal: &Goal) -> Result<(), StorageError>;
    /// Returns whether a record was removed.
    async fn delete_goal(&self, id: Uuid) -> Result<bool, StorageError>;
    /// All goals ordered by creation date.
    async fn list_goals(&self) -> Result<Vec<Goal>, StorageError>;
}

/// The single durable slot holding the pull cursor.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// `None` when never synced or when the stored value is unreadable.
    async fn load_cursor(&self) -> Result<Option<DateTime<Utc>>, StorageError>;
    async fn save_cursor(&self, cursor: DateTime<Utc>) -> Result<(), StorageError>;
}

/// Persistent queue behind [`crate::resilience::outbox`].
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Enqueue a change, collapsing it into any pending entry for the same
    /// goal. Returns the stored entry with its fresh `seq`.
    async fn enqueue(&self, change: &LocalChange) -> Result<PendingMutation, StorageError>;
    async fn pending_for(&self, id: Uuid) -> Result<Option<PendingMutation>, StorageError>;
    /// Oldest entries first (ascending `seq`).
    async fn next_batch(&self, limit: usize) -> Result<Vec<PendingMutation>, StorageError>;
    /// Remove the entry only if its `seq` still matches. Returns whether it did.
    async fn ack(&self, id: Uuid, seq: u64) -> Result<bool, StorageError>;
    async fn record_attempt(&self, id: Uuid, seq: u64) -> Result<(), StorageError>;
    async fn pending_count(&self) -> Result<u64, StorageError>;
}

/// Everything the engine needs from the device-local side.
pub trait LocalStore: GoalStore + CursorStore + OutboxStore {}

impl<T: GoalStore + CursorStore + OutboxStore> LocalStore for T {}
