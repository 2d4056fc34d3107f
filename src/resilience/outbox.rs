//! Durable outbound queue of local mutations awaiting delivery.
//!
//! Every local create/update/delete enqueues a [`LocalChange`] in the same
//! critical section as the local write. The queue holds at most one entry
//! per goal id: a newer change for the same id collapses into the pending
//! one (see [`collapse`]). Entries are drained to the remote in `seq` order
//! by the engine; an entry is acked only if its `seq` is unchanged, so a
//! mutation enqueued while an older one is in flight is never dropped.
//!
//! The queue itself lives in the local store ([`OutboxStore`]) so pending
//! pushes survive restarts. [`Outbox`] keeps the in-process counters and
//! the single-drainer guard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use uuid::Uuid;

use crate::goal::Goal;
use crate::remote::wire::GoalDto;

/// A local mutation to propagate to the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalChange {
    Create(Goal),
    Update(Goal),
    Delete(Uuid),
}

impl LocalChange {
    #[must_use]
    pub fn goal_id(&self) -> Uuid {
        match self {
            Self::Create(goal) | Self::Update(goal) => goal.id(),
            Self::Delete(id) => *id,
        }
    }

    #[must_use]
    pub fn kind(&self) -> MutationKind {
        match self {
            Self::Create(_) => MutationKind::Create,
            Self::Update(_) => MutationKind::Update,
            Self::Delete(_) => MutationKind::Delete,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<GoalDto> {
        match self {
            Self::Create(goal) | Self::Update(goal) => Some(goal.to_dto()),
            Self::Delete(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl MutationKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued mutation as stored in the outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
    pub goal_id: Uuid,
    /// Enqueue sequence; changes on every collapse
    pub seq: u64,
    pub kind: MutationKind,
    /// Latest snapshot for create/update, `None` for delete
    pub snapshot: Option<GoalDto>,
    /// Failed transient delivery attempts so far
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// Kind stored when `incoming` is enqueued over an `existing` entry.
///
/// A create that was never delivered stays a create so the remote learns
/// of the record; a delete wins over anything before it; a change after a
/// pending delete replaces it.
#[must_use]
pub fn collapse(existing: Option<MutationKind>, incoming: MutationKind) -> MutationKind {
    use MutationKind::*;
    match (existing, incoming) {
        (Some(Create), Update) => Create,
        (_, Delete) => Delete,
        (_, kind) => kind,
    }
}

/// Drain statistics for observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxStats {
    pub total_enqueued: u64,
    pub total_delivered: u64,
    pub total_rejected: u64,
    pub draining: bool,
}

/// In-process companion of the persistent queue.
pub struct Outbox {
    total_enqueued: AtomicU64,
    total_delivered: AtomicU64,
    total_rejected: AtomicU64,
    draining: AtomicBool,
}

impl Outbox {
    pub fn new() -> Self {
        Self {
            total_enqueued: AtomicU64::new(0),
            total_delivered: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
            draining: AtomicBool::new(false),
        }
    }

    /// Claim the drainer role. `None` if a drain is already running.
    pub fn begin_drain(&self) -> Option<DrainGuard<'_>> {
        if self.draining.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(DrainGuard(&self.draining))
    }

    pub fn record_enqueued(&self) {
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.total_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.total_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn stats(&self) -> OutboxStats {
        OutboxStats {
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_delivered: self.total_delivered.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            draining: self.draining.load(Ordering::Acquire),
        }
    }
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that releases the drainer role.
pub struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
