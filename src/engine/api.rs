//! Mutation hooks and reads.
//!
//! Every mutation runs the same three steps under the write lock:
//! compute the new record with the explicit mutation API on [`Goal`],
//! write it to the local store, then queue the change in the outbox.
//! The remote is never on this path; the drainer is only woken.

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::SyncError;
use crate::goal::{utc_now, Goal, GoalEdit};
use crate::resilience::outbox::{LocalChange, PendingMutation};

use super::SyncEngine;

impl SyncEngine {
    // ═══════════════════════════════════════════════════════════════════════════
    // API: Mutation hooks
    // ═══════════════════════════════════════════════════════════════════════════

    /// Create a goal locally and queue it for push.
    ///
    /// Fails with [`SyncError::Validation`] for an empty name or a target
    /// below 1; nothing is written in that case.
    pub async fn create_goal(&self, name: impl Into<String>, target_value: i64) -> Result<Goal, SyncError> {
        let goal = Goal::new(name, target_value, utc_now())?;

        {
            let _write = self.write_lock.lock().await;
            self.local.put_goal(&goal).await?;
            self.enqueue_locked(LocalChange::Create(goal.clone())).await?;
        }

        info!(goal_id = %goal.id(), name = %goal.name(), "Goal created");
        self.drain_notify.notify_one();
        Ok(goal)
    }

    /// Apply a field edit as one state transition.
    ///
    /// An edit that changes nothing returns the record as is and queues nothing.
    pub async fn edit_goal(&self, id: Uuid, edit: GoalEdit) -> Result<Goal, SyncError> {
        self.mutate(id, "edit", |goal| goal.apply_edit(&edit, utc_now())).await
    }

    /// Add `delta` (negative to undo) to the current value, clamped to the target.
    pub async fn increment_goal(&self, id: Uuid, delta: i64) -> Result<Goal, SyncError> {
        self.mutate(id, "increment", |goal| Ok(goal.increment(delta, utc_now()))).await
    }

    /// Delete a goal locally and queue the remote delete.
    ///
    /// Returns `false` (and queues nothing) if the id is unknown locally.
    pub async fn delete_goal(&self, id: Uuid) -> Result<bool, SyncError> {
        {
            let _write = self.write_lock.lock().await;
            if !self.local.delete_goal(id).await? {
                debug!(goal_id = %id, "Delete of unknown goal ignored");
                return Ok(false);
            }
            self.enqueue_locked(LocalChange::Delete(id)).await?;
        }

        info!(goal_id = %id, "Goal deleted");
        self.drain_notify.notify_one();
        Ok(true)
    }

    /// Queue a change the caller already applied to the local store.
    ///
    /// Delivery happens on the next drain; this never waits on the remote.
    pub async fn push(&self, change: LocalChange) -> Result<PendingMutation, SyncError> {
        let pending = {
            let _write = self.write_lock.lock().await;
            self.enqueue_locked(change).await?
        };
        self.drain_notify.notify_one();
        Ok(pending)
    }

    pub async fn goal(&self, id: Uuid) -> Result<Option<Goal>, SyncError> {
        Ok(self.local.get_goal(id).await?)
    }

    /// All local goals in creation order.
    pub async fn goals(&self) -> Result<Vec<Goal>, SyncError> {
        Ok(self.local.list_goals().await?)
    }

    async fn mutate<F>(&self, id: Uuid, operation: &'static str, f: F) -> Result<Goal, SyncError>
    where
        F: FnOnce(&Goal) -> Result<Goal, SyncError>,
    {
        let updated = {
            let _write = self.write_lock.lock().await;
            let current = self.local.get_goal(id).await?.ok_or(SyncError::NotFound(id))?;
            let updated = f(&current)?;

            if updated.updated_at() == current.updated_at() {
                debug!(goal_id = %id, operation, "Mutation changed nothing");
                return Ok(updated);
            }

            self.local.put_goal(&updated).await?;
            self.enqueue_locked(LocalChange::Update(updated.clone())).await?;
            updated
        };

        debug!(
            goal_id = %id,
            operation,
            current_value = updated.current_value(),
            target_value = updated.target_value(),
            is_complete = updated.is_complete(),
            "Goal updated"
        );
        self.drain_notify.notify_one();
        Ok(updated)
    }

    /// Caller must hold `write_lock`.
    async fn enqueue_locked(&self, change: LocalChange) -> Result<PendingMutation, SyncError> {
        let pending = self.local.enqueue(&change).await?;
        self.outbox.record_enqueued();
        crate::metrics::record_local_mutation(change.kind().as_str());
        debug!(goal_id = %pending.goal_id, kind = %pending.kind, seq = pending.seq, "Mutation queued");
        Ok(pending)
    }
}
