//! The goal record, the unit of synchronization.
//!
//! All mutation goes through [`Goal::apply_edit`] and [`Goal::increment`],
//! which return a new record with `updated_at` advanced and `is_complete`
//! recomputed in the same step. Fields are private so the derived
//! invariants cannot be broken from outside:
//!
//! - `1 <= target_value`
//! - `0 <= current_value <= target_value` (clamped, never an error)
//! - `is_complete == (current_value >= target_value)`
//!
//! # Example
//!
//! ```
//! use goal_sync::{Goal, GoalEdit};
//! use goal_sync::goal::utc_now;
//!
//! let goal = Goal::new("Read 12 books", 12, utc_now()).unwrap();
//! let goal = goal.increment(20, utc_now());
//! assert_eq!(goal.current_value(), 12);
//! assert!(goal.is_complete());
//!
//! let goal = goal.apply_edit(&GoalEdit::default().target_value(24), utc_now()).unwrap();
//! assert!(!goal.is_complete());
//! ```

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::SyncError;
use crate::remote::wire::GoalDto;

/// Current wall clock at the microsecond precision the wire and store keep.
#[must_use]
pub fn utc_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Goal {
    id: Uuid,
    name: String,
    target_value: i64,
    current_value: i64,
    creation_date: DateTime<Utc>,
    is_complete: bool,
    updated_at: DateTime<Utc>,
}

/// Field changes for [`Goal::apply_edit`]. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoalEdit {
    pub name: Option<String>,
    pub target_value: Option<i64>,
    pub current_value: Option<i64>,
}

impl GoalEdit {
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn target_value(mut self, target: i64) -> Self {
        self.target_value = Some(target);
        self
    }

    #[must_use]
    pub fn current_value(mut self, current: i64) -> Self {
        self.current_value = Some(current);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.target_value.is_none() && self.current_value.is_none()
    }
}

impl Goal {
    /// Create a fresh goal with `current_value = 0`.
    pub fn new(name: impl Into<String>, target_value: i64, now: DateTime<Utc>) -> Result<Self, SyncError> {
        let name = validate_name(name.into())?;
        let target_value = validate_target(target_value)?;
        let now = now.trunc_subsecs(6);
        Ok(Self::assemble(Uuid::new_v4(), name, target_value, 0, now, now))
    }

    /// Rebuild a goal read back from a local store.
    ///
    /// Out-of-range values are clamped rather than rejected, a blank name
    /// becomes [`UNNAMED_GOAL`], and `is_complete` is always recomputed.
    #[must_use]
    pub fn restore(
        id: Uuid,
        name: String,
        target_value: i64,
        current_value: i64,
        creation_date: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let name = name_or(&name, UNNAMED_GOAL);
        let target_value = target_value.max(1);
        Self::assemble(id, name, target_value, current_value, creation_date, updated_at)
    }

    /// Materialize a remote-origin goal that has no local counterpart.
    ///
    /// The wire format carries no creation date, so the snapshot's
    /// `updated_at` (the earliest moment this replica knows of) is used.
    #[must_use]
    pub fn from_snapshot(snapshot: &GoalDto) -> Self {
        Self::restore(
            snapshot.id,
            snapshot.name.clone(),
            snapshot.target_value,
            snapshot.current_value,
            snapshot.updated_at,
            snapshot.updated_at,
        )
    }

    /// Overwrite every mutable field with the snapshot's values.
    /// `id` and `creation_date` are kept, and so is the local name when the
    /// snapshot's is blank.
    #[must_use]
    pub fn merge_snapshot(&self, snapshot: &GoalDto) -> Self {
        Self::restore(
            self.id,
            name_or(&snapshot.name, &self.name),
            snapshot.target_value,
            snapshot.current_value,
            self.creation_date,
            snapshot.updated_at,
        )
    }

    /// Apply a user edit as a single state transition.
    ///
    /// Returns the record unchanged (same `updated_at`) when the edit
    /// changes nothing.
    pub fn apply_edit(&self, edit: &GoalEdit, now: DateTime<Utc>) -> Result<Self, SyncError> {
        let name = match &edit.name {
            Some(name) => validate_name(name.clone())?,
            None => self.name.clone(),
        };
        let target_value = match edit.target_value {
            Some(target) => validate_target(target)?,
            None => self.target_value,
        };
        let current_value = edit.current_value.unwrap_or(self.current_value);

        let next = Self::assemble(self.id, name, target_value, current_value, self.creation_date, self.updated_at);
        if next.same_content(self) {
            return Ok(self.clone());
        }
        Ok(next.touched(self.updated_at, now))
    }

    /// Add `delta` (which may be negative) to the current value, clamped
    /// to `[0, target_value]`.
    #[must_use]
    pub fn increment(&self, delta: i64, now: DateTime<Utc>) -> Self {
        let current_value = self.current_value.saturating_add(delta);
        let next = Self::assemble(
            self.id,
            self.name.clone(),
            self.target_value,
            current_value,
            self.creation_date,
            self.updated_at,
        );
        if next.same_content(self) {
            return self.clone();
        }
        next.touched(self.updated_at, now)
    }

    /// Wire representation sent on push.
    #[must_use]
    pub fn to_dto(&self) -> GoalDto {
        GoalDto {
            id: self.id,
            name: self.name.clone(),
            target_value: self.target_value,
            current_value: self.current_value,
            updated_at: self.updated_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_value(&self) -> i64 {
        self.target_value
    }

    pub fn current_value(&self) -> i64 {
        self.current_value
    }

    pub fn creation_date(&self) -> DateTime<Utc> {
        self.creation_date
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Fraction complete in `[0.0, 1.0]`.
    #[must_use]
    pub fn progress(&self) -> f64 {
        self.current_value as f64 / self.target_value as f64
    }

    fn assemble(
        id: Uuid,
        name: String,
        target_value: i64,
        current_value: i64,
        creation_date: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let current_value = current_value.clamp(0, target_value);
        Self {
            id,
            name,
            target_value,
            current_value,
            creation_date,
            is_complete: current_value >= target_value,
            updated_at,
        }
    }

    fn same_content(&self, other: &Self) -> bool {
        self.name == other.name
            && self.target_value == other.target_value
            && self.current_value == other.current_value
    }

    /// Stamp a mutation. Strictly after the previous stamp even if the
    /// wall clock stepped backwards or a pulled snapshot came from a
    /// clock running ahead.
    fn touched(mut self, previous: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        self.updated_at = now.trunc_subsecs(6).max(previous + Duration::microseconds(1));
        self
    }
}

/// Stands in for a blank name arriving from the wire or an old store.
pub const UNNAMED_GOAL: &str = "Untitled goal";

fn name_or(name: &str, fallback: &str) -> String {
    match name.trim() {
        "" => fallback.to_string(),
        trimmed => trimmed.to_string(),
    }
}

fn validate_name(name: String) -> Result<String, SyncError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SyncError::Validation("goal name must not be empty".into()));
    }
    Ok(trimmed.to_string())
}

fn validate_target(target: i64) -> Result<i64, SyncError> {
    if target < 1 {
        return Err(SyncError::Validation(format!(
            "target value must be at least 1, got {}",
            target
        )));
    }
    Ok(target)
}
