use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::goal::{utc_now, Goal};
use crate::resilience::outbox::{collapse, LocalChange, PendingMutation};
use super::traits::{CursorStore, GoalStore, OutboxStore, StorageError};

/// Volatile local store. Useful for tests and for hosts that rebuild
/// state from the remote on every launch.
pub struct InMemoryStore {
    goals: DashMap<Uuid, Goal>,
    cursor: RwLock<Option<DateTime<Utc>>>,
    outbox: Mutex<HashMap<Uuid, PendingMutation>>,
    next_seq: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            goals: DashMap::new(),
            cursor: RwLock::new(None),
            outbox: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Number of goals stored
    pub fn len(&self) -> usize {
        self.goals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }

    /// Clear goals, cursor and outbox
    pub fn clear(&self) {
        self.goals.clear();
        *self.cursor.write() = None;
        self.outbox.lock().clear();
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GoalStore for InMemoryStore {
    async fn get_goal(&self, id: Uuid) -> Result<Option<Goal>, StorageError> {
        Ok(self.goals.get(&id).map(|r| r.value().clone()))
    }

    async fn put_goal(&self, goal: &Goal) -> Result<(), StorageError> {
        self.goals.insert(goal.id(), goal.clone());
        Ok(())
    }

    async fn delete_goal(&self, id: Uuid) -> Result<bool, StorageError> {
        Ok(self.goals.remove(&id).is_some())
    }

    async fn list_goals(&self) -> Result<Vec<Goal>, StorageError> {
        let mut goals: Vec<Goal> = self.goals.iter().map(|r| r.value().clone()).collect();
        goals.sort_by(|a, b| a.creation_date().cmp(&b.creation_date()).then(a.id().cmp(&b.id())));
        Ok(goals)
    }
}

#[async_trait]
impl CursorStore for InMemoryStore {
    async fn load_cursor(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(*self.cursor.read())
    }

    async fn save_cursor(&self, cursor: DateTime<Utc>) -> Result<(), StorageError> {
        *self.cursor.write() = Some(cursor);
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn enqueue(&self, change: &LocalChange) -> Result<PendingMutation, StorageError> {
        let id = change.goal_id();
        let mut outbox = self.outbox.lock();
        let existing = outbox.get(&id);

        let entry = PendingMutation {
            goal_id: id,
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            kind: collapse(existing.map(|e| e.kind), change.kind()),
            snapshot: change.snapshot(),
            attempts: existing.map_or(0, |e| e.attempts),
            enqueued_at: existing.map_or_else(utc_now, |e| e.enqueued_at),
        };
        outbox.insert(id, entry.clone());
        Ok(entry)
    }

    async fn pending_for(&self, id: Uuid) -> Result<Option<PendingMutation>, StorageError> {
        Ok(self.outbox.lock().get(&id).cloned())
    }

    async fn next_batch(&self, limit: usize) -> Result<Vec<PendingMutation>, StorageError> {
        let mut entries: Vec<PendingMutation> = self.outbox.lock().values().cloned().collect();
        entries.sort_by_key(|e| e.seq);
        entries.truncate(limit);
        Ok(entries)
    }

    async fn ack(&self, id: Uuid, seq: u64) -> Result<bool, StorageError> {
        let mut outbox = self.outbox.lock();
        match outbox.get(&id) {
            Some(entry) if entry.seq == seq => {
                outbox.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_attempt(&self, id: Uuid, seq: u64) -> Result<(), StorageError> {
        if let Some(entry) = self.outbox.lock().get_mut(&id) {
            if entry.seq == seq {
                entry.attempts = entry.attempts.saturating_add(1);
            }
        }
        Ok(())
    }

    async fn pending_count(&self) -> Result<u64, StorageError> {
        Ok(self.outbox.lock().len() as u64)
    }
}
