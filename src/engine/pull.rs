//! Pull: fetch remote changes since the cursor and merge them.

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SyncError;
use crate::remote::wire::GoalDto;
use crate::resilience::outbox::MutationKind;
use crate::resolver::{resolve, MergeAction};

use super::{never_synced, MergeOutcome, PullReport, SyncEngine, SyncEvent};

impl SyncEngine {
    /// Fetch every remote change newer than the cursor and merge it.
    ///
    /// Snapshots are merged in the order received, each under the write
    /// lock with the resolver evaluated against the record as stored at
    /// that moment. The cursor moves to the server's timestamp only after
    /// all of them are merged; on any failure it is left alone and the
    /// whole interval is fetched again next time.
    #[tracing::instrument(skip(self))]
    pub async fn pull(&self) -> Result<PullReport, SyncError> {
        match self.pull_inner().await {
            Ok(report) => {
                crate::metrics::record_pull(true);
                crate::metrics::record_pull_size(report.received);
                info!(
                    received = report.received,
                    inserted = report.inserted,
                    updated = report.updated,
                    ignored = report.ignored,
                    skipped_tombstones = report.skipped_tombstones,
                    cursor = %report.cursor,
                    "Pull complete"
                );
                self.emit(SyncEvent::PullCompleted(report.clone()));
                Ok(report)
            }
            Err(e) => {
                crate::metrics::record_pull(false);
                warn!(error = %e, "Pull failed, cursor unchanged");
                self.emit(SyncEvent::PullFailed { error: e.to_string() });
                Err(e)
            }
        }
    }

    async fn pull_inner(&self) -> Result<PullReport, SyncError> {
        let _exchange = self.exchange_lock.lock().await;

        let cursor = self.local.load_cursor().await?.unwrap_or_else(never_synced);
        let changes = self
            .remote_call("fetch", || self.remote.fetch_changes_since(cursor))
            .await?;

        let mut report = PullReport::new(cursor, changes.goals.len());
        for snapshot in &changes.goals {
            let outcome = self.merge_remote(snapshot, &mut report).await?;
            crate::metrics::record_merge(outcome.as_str());
            report.tally(outcome);
        }

        if changes.server_timestamp < cursor {
            warn!(
                previous = %cursor,
                server_timestamp = %changes.server_timestamp,
                "Server timestamp is behind the cursor, adopting it anyway"
            );
        }
        self.local.save_cursor(changes.server_timestamp).await?;
        report.cursor = changes.server_timestamp;

        Ok(report)
    }

    /// Read the remote's current copy of one goal.
    ///
    /// The change feed is the only read the remote offers, so this fetches
    /// from the beginning without touching the cursor.
    pub(super) async fn fetch_remote_copy(&self, id: Uuid) -> Result<Option<GoalDto>, SyncError> {
        let changes = self
            .remote_call("fetch", || self.remote.fetch_changes_since(never_synced()))
            .await?;
        Ok(changes.goals.into_iter().find(|goal| goal.id == id))
    }

    /// Merge one snapshot. Idempotent: a second application of the same
    /// snapshot finds local equal and ignores it.
    pub(super) async fn merge_remote(&self, snapshot: &GoalDto, report: &mut PullReport) -> Result<MergeOutcome, SyncError> {
        let _write = self.write_lock.lock().await;

        let pending = self.local.pending_for(snapshot.id).await?;
        if matches!(&pending, Some(p) if p.kind == MutationKind::Delete) {
            debug!(goal_id = %snapshot.id, "Pending local delete, skipping remote snapshot");
            return Ok(MergeOutcome::SkippedTombstone);
        }

        let local = self.local.get_goal(snapshot.id).await?;
        let action = resolve(local.as_ref(), snapshot);

        let outcome = match &action {
            MergeAction::Insert(goal) => {
                self.local.put_goal(goal).await?;
                MergeOutcome::Inserted
            }
            MergeAction::Update(goal) => {
                self.local.put_goal(goal).await?;
                MergeOutcome::Updated
            }
            MergeAction::Ignore => MergeOutcome::Ignored,
        };
        debug!(goal_id = %snapshot.id, action = action.as_str(), remote_updated_at = %snapshot.updated_at, "Merged remote snapshot");

        // A queued push older than what we just applied would regress the remote
        if let (Some(pending), Some(_)) = (pending, action.goal()) {
            let stale = pending
                .snapshot
                .as_ref()
                .is_some_and(|queued| queued.updated_at <= snapshot.updated_at);
            if stale && self.local.ack(pending.goal_id, pending.seq).await? {
                debug!(goal_id = %snapshot.id, kind = %pending.kind, "Discarded superseded pending push");
                report.superseded_pushes += 1;
            }
        }

        Ok(outcome)
    }
}
