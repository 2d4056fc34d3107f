use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::SyncError;
use super::wire::{ChangeSet, GoalDto};

/// The remote source of truth as seen by the engine.
///
/// Implementations must honor:
/// - create/update/delete are idempotent when keyed by `id` (a retried
///   create for an existing id must not duplicate it)
/// - `fetch_changes_since(cursor)` returns only snapshots with
///   `updated_at > cursor` (strictly), ascending by `updated_at`
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn create_goal(&self, goal: &GoalDto) -> Result<(), SyncError>;
    async fn update_goal(&self, goal: &GoalDto) -> Result<(), SyncError>;
    async fn delete_goal(&self, id: Uuid) -> Result<(), SyncError>;
    async fn fetch_changes_since(&self, cursor: DateTime<Utc>) -> Result<ChangeSet, SyncError>;

    /// Name used for the circuit breaker and log fields.
    fn name(&self) -> &str {
        "remote"
    }
}
