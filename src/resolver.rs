//! Last-write-wins conflict resolution.
//!
//! [`resolve`] is pure: it decides, for a local record (if any) and a remote
//! snapshot with the same id, what the local store should end up holding.
//! The caller must evaluate it against the record as it is at write time,
//! inside the store's write critical section.

use crate::goal::Goal;
use crate::remote::wire::GoalDto;

/// Outcome of comparing a local record with a remote snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeAction {
    /// No local record exists; store this one.
    Insert(Goal),
    /// The remote is strictly newer; replace the local record with this one.
    Update(Goal),
    /// Local is newer or equal; keep it.
    Ignore,
}

impl MergeAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert(_) => "insert",
            Self::Update(_) => "update",
            Self::Ignore => "ignore",
        }
    }

    /// The record to write, if any.
    #[must_use]
    pub fn goal(&self) -> Option<&Goal> {
        match self {
            Self::Insert(goal) | Self::Update(goal) => Some(goal),
            Self::Ignore => None,
        }
    }
}

/// Remote wins iff `remote.updated_at > local.updated_at`. Ties go to local.
///
/// The resulting record never copies a completion flag from the wire;
/// `is_complete` is always recomputed from the merged values.
#[must_use]
pub fn resolve(local: Option<&Goal>, remote: &GoalDto) -> MergeAction {
    match local {
        None => MergeAction::Insert(Goal::from_snapshot(remote)),
        Some(local) if remote.updated_at > local.updated_at() => {
            MergeAction::Update(local.merge_snapshot(remote))
        }
        Some(_) => MergeAction::Ignore,
    }
}
