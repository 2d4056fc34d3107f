//! Outbox drain: deliver queued local mutations to the remote.

use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::remote::wire::GoalDto;
use crate::resilience::outbox::{MutationKind, PendingMutation};
use crate::storage::traits::StorageError;

use super::{never_synced, DrainReport, PullReport, SyncEngine, SyncEvent};

impl SyncEngine {
    /// Deliver pending mutations in `seq` order until the outbox is empty.
    ///
    /// - accepted: the entry is acked (removed only if no newer mutation
    ///   replaced it meanwhile)
    /// - transient failure: the attempt is recorded, draining stops and the
    ///   error is returned so the caller can back off
    /// - permanent failure: the entry is dropped and `PushRejected` is emitted
    ///
    /// Only one drain runs at a time; a concurrent call returns immediately
    /// with `already_running` set.
    #[tracing::instrument(skip(self))]
    pub async fn drain_outbox(&self) -> Result<DrainReport, SyncError> {
        let Some(_drain) = self.outbox.begin_drain() else {
            debug!("Drain already in progress");
            return Ok(DrainReport { already_running: true, ..Default::default() });
        };

        let batch_size = self.config.read().drain_batch_size();
        let mut report = DrainReport::default();

        let result = async {
            loop {
                let batch = self.local.next_batch(batch_size).await?;
                if batch.is_empty() {
                    return Ok::<(), SyncError>(());
                }
                for entry in batch {
                    self.drain_entry(&entry, &mut report).await?;
                }
            }
        }
        .await;

        self.refresh_outbox_depth().await;
        crate::metrics::record_outbox_drain(report.delivered, result.is_ok());
        if report.attempted() > 0 {
            info!(
                delivered = report.delivered,
                superseded = report.superseded,
                rejected = report.rejected,
                "Outbox drained"
            );
        }

        result.map(|()| report)
    }

    async fn drain_entry(&self, entry: &PendingMutation, report: &mut DrainReport) -> Result<(), SyncError> {
        let _exchange = self.exchange_lock.lock().await;

        // A pull may have discarded or replaced this entry since the batch was read
        match self.local.pending_for(entry.goal_id).await? {
            Some(current) if current.seq == entry.seq => {}
            _ => {
                debug!(goal_id = %entry.goal_id, seq = entry.seq, "Outbox entry changed before delivery");
                return Ok(());
            }
        }

        match self.deliver(entry).await {
            Ok(()) => {
                crate::metrics::record_push(entry.kind.as_str(), "success");
                if self.local.ack(entry.goal_id, entry.seq).await? {
                    self.outbox.record_delivered();
                    report.delivered += 1;
                } else {
                    report.superseded += 1;
                }
                debug!(goal_id = %entry.goal_id, kind = %entry.kind, "Push delivered");
                Ok(())
            }
            Err(e) if e.is_transient() => {
                crate::metrics::record_push(entry.kind.as_str(), "error");
                self.local.record_attempt(entry.goal_id, entry.seq).await?;
                let attempts = entry.attempts.saturating_add(1);
                warn!(
                    goal_id = %entry.goal_id,
                    kind = %entry.kind,
                    attempts,
                    error = %e,
                    "Push failed, will retry"
                );
                self.emit(SyncEvent::PushFailed {
                    goal_id: entry.goal_id,
                    kind: entry.kind,
                    attempts,
                    error: e.to_string(),
                });
                Err(e)
            }
            Err(e) => {
                // The local record is gone; keep the remote copy it refused to drop
                let remote_copy = if entry.kind == MutationKind::Delete {
                    match self.fetch_remote_copy(entry.goal_id).await {
                        Ok(copy) => copy,
                        Err(fetch_err) if fetch_err.is_transient() => {
                            self.local.record_attempt(entry.goal_id, entry.seq).await?;
                            warn!(
                                goal_id = %entry.goal_id,
                                error = %fetch_err,
                                "Delete refused and remote copy unavailable, will retry"
                            );
                            return Err(fetch_err);
                        }
                        Err(fetch_err) => {
                            error!(goal_id = %entry.goal_id, error = %fetch_err, "Could not fetch remote copy after refused delete");
                            None
                        }
                    }
                } else {
                    None
                };

                crate::metrics::record_push(entry.kind.as_str(), "rejected");
                self.local.ack(entry.goal_id, entry.seq).await?;
                self.outbox.record_rejected();
                report.rejected += 1;
                error!(
                    goal_id = %entry.goal_id,
                    kind = %entry.kind,
                    error = %e,
                    "Push rejected by remote, dropping it"
                );
                self.emit(SyncEvent::PushRejected {
                    goal_id: entry.goal_id,
                    kind: entry.kind,
                    error: e.to_string(),
                });

                if let Some(snapshot) = remote_copy {
                    let mut scratch = PullReport::new(never_synced(), 1);
                    let outcome = self.merge_remote(&snapshot, &mut scratch).await?;
                    info!(goal_id = %entry.goal_id, outcome = outcome.as_str(), "Restored remote copy after refused delete");
                }
                Ok(())
            }
        }
    }

    async fn deliver(&self, entry: &PendingMutation) -> Result<(), SyncError> {
        match entry.kind {
            MutationKind::Create => {
                let goal = snapshot_of(entry)?;
                match self.remote_call("create", || self.remote.create_goal(goal)).await {
                    // An earlier attempt landed but its response was lost
                    Err(e) if e.is_conflict_status() => {
                        debug!(goal_id = %entry.goal_id, "Remote already has goal, resending create as update");
                        self.remote_call("update", || self.remote.update_goal(goal)).await
                    }
                    other => other,
                }
            }
            MutationKind::Update => {
                let goal = snapshot_of(entry)?;
                match self.remote_call("update", || self.remote.update_goal(goal)).await {
                    Err(e) if e.is_not_found_status() => {
                        debug!(goal_id = %entry.goal_id, "Remote has no such goal, resending update as create");
                        self.remote_call("create", || self.remote.create_goal(goal)).await
                    }
                    other => other,
                }
            }
            MutationKind::Delete => {
                match self.remote_call("delete", || self.remote.delete_goal(entry.goal_id)).await {
                    Err(e) if e.is_not_found_status() => {
                        debug!(goal_id = %entry.goal_id, "Remote already lacks deleted goal");
                        Ok(())
                    }
                    other => other,
                }
            }
        }
    }
}

fn snapshot_of(entry: &PendingMutation) -> Result<&GoalDto, SyncError> {
    entry.snapshot.as_ref().ok_or_else(|| {
        SyncError::Storage(StorageError::Corruption {
            key: format!("outbox/{}", entry.goal_id),
            reason: format!("{} entry has no snapshot", entry.kind),
        })
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::engine::tests::engine_with;
    use crate::goal::GoalEdit;
    use crate::remote::InMemoryRemote;
    use crate::storage::traits::OutboxStore;
    use super::*;

    #[tokio::test]
    async fn test_drain_delivers_and_empties() {
        let remote = Arc::new(InMemoryRemote::new());
        let (engine, store) = engine_with(remote.clone());

        let a = engine.create_goal("A", 3).await.unwrap();
        let b = engine.create_goal("B", 4).await.unwrap();
        engine.increment_goal(a.id(), 1).await.unwrap();

        let report = engine.drain_outbox().await.unwrap();

        assert_eq!(report.delivered, 2);
        assert_eq!(store.pending_count().await.unwrap(), 0);
        assert_eq!(remote.get_remote(a.id()).unwrap().current_value, 1);
        assert!(remote.get_remote(b.id()).is_some());
        assert_eq!(remote.calls().creates, 2);
        assert_eq!(remote.calls().updates, 0);
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_entry() {
        let remote = Arc::new(InMemoryRemote::new());
        let (engine, store) = engine_with(remote.clone());
        let mut events = engine.subscribe();
        let goal = engine.create_goal("A", 3).await.unwrap();

        remote.set_offline(true);
        let err = engine.drain_outbox().await.unwrap_err();

        assert!(err.is_transient());
        let pending = store.pending_for(goal.id()).await.unwrap().unwrap();
        assert_eq!(pending.attempts, 1);
        assert!(matches!(
            events.try_recv(),
            Ok(SyncEvent::PushFailed { attempts: 1, kind: MutationKind::Create, .. })
        ));

        remote.set_offline(false);
        let report = engine.drain_outbox().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert!(remote.get_remote(goal.id()).is_some());
    }

    #[tokio::test]
    async fn test_permanent_failure_drops_entry() {
        let remote = Arc::new(InMemoryRemote::new());
        let (engine, store) = engine_with(remote.clone());
        let mut events = engine.subscribe();
        let goal = engine.create_goal("A", 3).await.unwrap();

        remote.reject_pushes_with(Some(422));
        let report = engine.drain_outbox().await.unwrap();

        assert_eq!(report.rejected, 1);
        assert_eq!(store.pending_count().await.unwrap(), 0);
        // Local write is never rolled back
        assert!(engine.goal(goal.id()).await.unwrap().is_some());
        assert!(matches!(events.try_recv(), Ok(SyncEvent::PushRejected { .. })));
        assert_eq!(engine.outbox_stats().total_rejected, 1);
    }

    #[tokio::test]
    async fn test_update_for_missing_remote_is_resent_as_create() {
        let remote = Arc::new(InMemoryRemote::new());
        let (engine, _) = engine_with(remote.clone());
        let goal = engine.create_goal("A", 3).await.unwrap();
        engine.drain_outbox().await.unwrap();

        remote.remove_remote(goal.id());
        engine
            .edit_goal(goal.id(), GoalEdit::default().name("A2"))
            .await
            .unwrap();
        let report = engine.drain_outbox().await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(remote.get_remote(goal.id()).unwrap().name, "A2");
        assert_eq!(remote.calls().updates, 1);
        assert_eq!(remote.calls().creates, 2);
    }

    #[tokio::test]
    async fn test_delete_of_missing_remote_counts_as_delivered() {
        let remote = Arc::new(InMemoryRemote::new());
        let (engine, store) = engine_with(remote.clone());
        let goal = engine.create_goal("A", 3).await.unwrap();
        engine.drain_outbox().await.unwrap();

        remote.remove_remote(goal.id());
        engine.delete_goal(goal.id()).await.unwrap();
        let report = engine.drain_outbox().await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_then_delete_before_drain_sends_delete_only() {
        let remote = Arc::new(InMemoryRemote::new());
        let (engine, _) = engine_with(remote.clone());
        let goal = engine.create_goal("A", 3).await.unwrap();
        engine.delete_goal(goal.id()).await.unwrap();

        let report = engine.drain_outbox().await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(remote.calls().creates, 0);
        assert_eq!(remote.calls().deletes, 1);
        assert!(remote.is_empty());
    }

    #[tokio::test]
    async fn test_create_conflict_is_resent_as_update() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.set_strict_creates(true);
        let (engine, store) = engine_with(remote.clone());
        let goal = engine.create_goal("Pushups", 10).await.unwrap();

        // The first POST landed but its response never came back
        remote.insert_remote(goal.to_dto());
        engine.increment_goal(goal.id(), 3).await.unwrap();
        assert_eq!(store.pending_for(goal.id()).await.unwrap().unwrap().kind, MutationKind::Create);

        let report = engine.drain_outbox().await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.rejected, 0);
        assert_eq!(remote.get_remote(goal.id()).unwrap().current_value, 3);
        assert_eq!(remote.calls().updates, 1);
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_refused_delete_restores_remote_copy() {
        let remote = Arc::new(InMemoryRemote::new());
        let (engine, store) = engine_with(remote.clone());
        let mut events = engine.subscribe();
        let goal = engine.create_goal("Shared", 4).await.unwrap();
        engine.drain_outbox().await.unwrap();

        engine.delete_goal(goal.id()).await.unwrap();
        remote.reject_pushes_with(Some(403));
        let report = engine.drain_outbox().await.unwrap();

        assert_eq!(report.rejected, 1);
        assert_eq!(store.pending_count().await.unwrap(), 0);
        let restored = engine.goal(goal.id()).await.unwrap().unwrap();
        assert_eq!(restored.to_dto(), remote.get_remote(goal.id()).unwrap());
        assert!(matches!(
            events.try_recv(),
            Ok(SyncEvent::PushRejected { kind: MutationKind::Delete, .. })
        ));
    }
}
