use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use uuid::Uuid;

use crate::error::SyncError;
use crate::goal::utc_now;
use super::traits::RemoteClient;
use super::wire::{ChangeSet, GoalDto};

/// Per-operation call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteCalls {
    pub creates: u64,
    pub updates: u64,
    pub deletes: u64,
    pub fetches: u64,
}

/// In-process remote that honors the [`RemoteClient`] contract.
///
/// Stores snapshots verbatim, answers `fetch_changes_since` with a strict
/// `>` bound in ascending `updated_at` order, and supports failure
/// injection for exercising the engine's error paths.
pub struct InMemoryRemote {
    goals: DashMap<Uuid, GoalDto>,
    server_time: Mutex<Option<DateTime<Utc>>>,
    offline: AtomicBool,
    fail_next: AtomicU64,
    reject_status: Mutex<Option<u16>>,
    strict_creates: AtomicBool,
    creates: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    fetches: AtomicU64,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self {
            goals: DashMap::new(),
            server_time: Mutex::new(None),
            offline: AtomicBool::new(false),
            fail_next: AtomicU64::new(0),
            reject_status: Mutex::new(None),
            strict_creates: AtomicBool::new(false),
            creates: AtomicU64::new(0),
            updates: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
        }
    }

    /// Write a snapshot as another device would.
    pub fn insert_remote(&self, goal: GoalDto) {
        self.goals.insert(goal.id, goal);
    }

    /// Remove a record as another device would.
    pub fn remove_remote(&self, id: Uuid) {
        self.goals.remove(&id);
    }

    #[must_use]
    pub fn get_remote(&self, id: Uuid) -> Option<GoalDto> {
        self.goals.get(&id).map(|g| g.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.goals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }

    /// Every call fails with a transport error while offline.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `n` calls with a 503.
    pub fn fail_next(&self, n: u64) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Reject every create/update/delete with the given status (e.g. 400).
    pub fn reject_pushes_with(&self, status: Option<u16>) {
        *self.reject_status.lock() = status;
    }

    /// Answer a create for an id that already exists with 409 instead of
    /// upserting, as servers with a unique key do.
    pub fn set_strict_creates(&self, strict: bool) {
        self.strict_creates.store(strict, Ordering::SeqCst);
    }

    /// Pin the clock reported as `server_timestamp`; `None` uses wall time.
    pub fn set_server_time(&self, ts: Option<DateTime<Utc>>) {
        *self.server_time.lock() = ts;
    }

    #[must_use]
    pub fn calls(&self) -> RemoteCalls {
        RemoteCalls {
            creates: self.creates.load(Ordering::SeqCst),
            updates: self.updates.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
            fetches: self.fetches.load(Ordering::SeqCst),
        }
    }

    fn check_available(&self) -> Result<(), SyncError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Transport("connection refused".into()));
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SyncError::Server {
                status: 503,
                message: "injected failure".into(),
            });
        }
        Ok(())
    }

    fn check_push_allowed(&self) -> Result<(), SyncError> {
        self.check_available()?;
        if let Some(status) = *self.reject_status.lock() {
            return Err(SyncError::Server {
                status,
                message: "rejected".into(),
            });
        }
        Ok(())
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteClient for InMemoryRemote {
    async fn create_goal(&self, goal: &GoalDto) -> Result<(), SyncError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.check_push_allowed()?;
        if self.strict_creates.load(Ordering::SeqCst) && self.goals.contains_key(&goal.id) {
            return Err(SyncError::Server {
                status: 409,
                message: format!("goal {} already exists", goal.id),
            });
        }
        // Upsert: a retried create must not duplicate
        self.goals.insert(goal.id, goal.clone());
        Ok(())
    }

    async fn update_goal(&self, goal: &GoalDto) -> Result<(), SyncError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.check_push_allowed()?;
        match self.goals.get_mut(&goal.id) {
            Some(mut existing) => {
                *existing = goal.clone();
                Ok(())
            }
            None => Err(SyncError::Server {
                status: 404,
                message: format!("goal {} not found", goal.id),
            }),
        }
    }

    async fn delete_goal(&self, id: Uuid) -> Result<(), SyncError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check_push_allowed()?;
        match self.goals.remove(&id) {
            Some(_) => Ok(()),
            None => Err(SyncError::Server {
                status: 404,
                message: format!("goal {} not found", id),
            }),
        }
    }

    async fn fetch_changes_since(&self, cursor: DateTime<Utc>) -> Result<ChangeSet, SyncError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let mut goals: Vec<GoalDto> = self
            .goals
            .iter()
            .filter(|g| g.updated_at > cursor)
            .map(|g| g.value().clone())
            .collect();
        goals.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));

        let server_timestamp = (*self.server_time.lock()).unwrap_or_else(utc_now);
        Ok(ChangeSet { goals, server_timestamp })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn dto(name: &str, updated_at: DateTime<Utc>) -> GoalDto {
        GoalDto {
            id: Uuid::new_v4(),
            name: name.into(),
            target_value: 5,
            current_value: 1,
            updated_at,
        }
    }

    #[tokio::test]
    async fn test_fetch_is_strictly_greater_and_ordered() {
        let remote = InMemoryRemote::new();
        remote.insert_remote(dto("c", t(30)));
        remote.insert_remote(dto("boundary", t(10)));
        remote.insert_remote(dto("b", t(20)));
        remote.insert_remote(dto("old", t(5)));

        let changes = remote.fetch_changes_since(t(10)).await.unwrap();
        let names: Vec<_> = changes.goals.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let remote = InMemoryRemote::new();
        let goal = dto("a", t(1));

        remote.create_goal(&goal).await.unwrap();
        remote.create_goal(&goal).await.unwrap();

        assert_eq!(remote.len(), 1);
        assert_eq!(remote.calls().creates, 2);
    }

    #[tokio::test]
    async fn test_update_missing_is_404() {
        let remote = InMemoryRemote::new();
        let err = remote.update_goal(&dto("a", t(1))).await.unwrap_err();
        assert!(matches!(err, SyncError::Server { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_offline_is_transport_error() {
        let remote = InMemoryRemote::new();
        remote.set_offline(true);

        let err = remote.fetch_changes_since(t(0)).await.unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));

        remote.set_offline(false);
        assert!(remote.fetch_changes_since(t(0)).await.is_ok());
    }

    #[tokio::test]
    async fn test_fail_next_counts_down() {
        let remote = InMemoryRemote::new();
        remote.fail_next(2);

        assert!(remote.fetch_changes_since(t(0)).await.is_err());
        assert!(remote.fetch_changes_since(t(0)).await.is_err());
        assert!(remote.fetch_changes_since(t(0)).await.is_ok());
    }

    #[tokio::test]
    async fn test_pinned_server_time() {
        let remote = InMemoryRemote::new();
        remote.set_server_time(Some(t(99)));
        let changes = remote.fetch_changes_since(t(0)).await.unwrap();
        assert_eq!(changes.server_timestamp, t(99));
    }

    #[tokio::test]
    async fn test_rejected_pushes() {
        let remote = InMemoryRemote::new();
        remote.reject_pushes_with(Some(400));

        let err = remote.create_goal(&dto("a", t(1))).await.unwrap_err();
        assert!(matches!(err, SyncError::Server { status: 400, .. }));
        assert!(remote.is_empty());
    }
}
