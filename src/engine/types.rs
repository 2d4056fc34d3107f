//! Public types for the sync engine.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::resilience::outbox::MutationKind;

/// Engine lifecycle state.
///
/// Use [`super::SyncEngine::state()`] to check current state or
/// [`super::SyncEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Just created, not yet started
    Created,
    /// Checking the local store, loading cursor and outbox depth
    Starting,
    /// Ready to accept mutations and sync calls
    Ready,
    /// Background run loop active
    Running,
    /// Graceful shutdown in progress
    ShuttingDown,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Starting => write!(f, "Starting"),
            Self::Ready => write!(f, "Ready"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

/// What happened to one remote snapshot during a pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    /// Local was newer or equal
    Ignored,
    /// A local delete for this id is still waiting to be pushed
    SkippedTombstone,
}

impl MergeOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inserted => "insert",
            Self::Updated => "update",
            Self::Ignored => "ignore",
            Self::SkippedTombstone => "skipped_tombstone",
        }
    }
}

/// Result of a successful pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullReport {
    /// Snapshots returned by the remote
    pub received: usize,
    pub inserted: usize,
    pub updated: usize,
    pub ignored: usize,
    pub skipped_tombstones: usize,
    /// Pending pushes discarded because the remote already had newer data
    pub superseded_pushes: usize,
    pub previous_cursor: DateTime<Utc>,
    /// The server timestamp the cursor now holds
    pub cursor: DateTime<Utc>,
}

impl PullReport {
    pub(super) fn new(previous_cursor: DateTime<Utc>, received: usize) -> Self {
        Self {
            received,
            inserted: 0,
            updated: 0,
            ignored: 0,
            skipped_tombstones: 0,
            superseded_pushes: 0,
            previous_cursor,
            cursor: previous_cursor,
        }
    }

    pub(super) fn tally(&mut self, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::Inserted => self.inserted += 1,
            MergeOutcome::Updated => self.updated += 1,
            MergeOutcome::Ignored => self.ignored += 1,
            MergeOutcome::SkippedTombstone => self.skipped_tombstones += 1,
        }
    }

    /// Number of local records written by this pull.
    #[must_use]
    pub fn applied(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Result of an outbox drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries the remote accepted and that were removed from the outbox
    pub delivered: usize,
    /// Entries the remote accepted but that had been replaced by a newer
    /// mutation in the meantime (the newer one stays queued)
    pub superseded: usize,
    /// Entries permanently rejected and dropped
    pub rejected: usize,
    /// Another drain was already running; nothing was attempted
    pub already_running: bool,
}

impl DrainReport {
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.delivered + self.superseded + self.rejected
    }
}

/// Notifications for user-facing sync reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    PullCompleted(PullReport),
    PullFailed {
        error: String,
    },
    /// Transient push failure; the entry stays queued and is retried
    PushFailed {
        goal_id: Uuid,
        kind: MutationKind,
        attempts: u32,
        error: String,
    },
    /// Permanent push failure; the entry was dropped from the outbox
    PushRejected {
        goal_id: Uuid,
        kind: MutationKind,
        error: String,
    },
}
