//! End-to-end sync scenarios.
//!
//! Two engines sharing one in-memory remote stand in for two devices.
//! SQLite-backed tests use a temp directory and reopen the store to
//! check what survives a restart.
//!
//! Run with: `cargo test --test sync_engine`

use std::sync::Arc;

use chrono::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use uuid::Uuid;

use goal_sync::goal::utc_now;
use goal_sync::{
    CursorStore, EngineState, Goal, GoalDto, GoalEdit, GoalStore, InMemoryRemote, InMemoryStore,
    LocalStore, MutationKind, OutboxStore, SqlStore, SyncEngine, SyncEngineConfig, SyncEvent,
};

// =============================================================================
// Helpers
// =============================================================================

fn device(remote: &Arc<InMemoryRemote>) -> SyncEngine {
    device_with_store(remote, Arc::new(InMemoryStore::new()))
}

fn device_with_store(remote: &Arc<InMemoryRemote>, store: Arc<dyn LocalStore>) -> SyncEngine {
    let config = SyncEngineConfig::default();
    let (_tx, rx) = watch::channel(config.clone());
    SyncEngine::new(config, rx, store, remote.clone())
}

async fn sqlite_store(dir: &TempDir) -> Arc<SqlStore> {
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("goals.db").display());
    Arc::new(SqlStore::new(&url).await.unwrap())
}

// =============================================================================
// Testable scenarios from the merge contract
// =============================================================================

#[tokio::test]
async fn test_newer_remote_progress_is_applied() {
    let remote = Arc::new(InMemoryRemote::new());
    let store = Arc::new(InMemoryStore::new());
    let engine = device_with_store(&remote, store.clone());

    let t0 = utc_now() - Duration::minutes(10);
    let a = Goal::restore(Uuid::new_v4(), "A".into(), 5, 2, t0, t0);
    store.put_goal(&a).await.unwrap();
    remote.insert_remote(GoalDto {
        current_value: 4,
        updated_at: t0 + Duration::seconds(1),
        ..a.to_dto()
    });

    engine.pull().await.unwrap();

    let merged = engine.goal(a.id()).await.unwrap().unwrap();
    assert_eq!(merged.current_value(), 4);
    assert!(!merged.is_complete());
}

#[tokio::test]
async fn test_older_remote_leaves_completed_goal() {
    let remote = Arc::new(InMemoryRemote::new());
    let store = Arc::new(InMemoryStore::new());
    let engine = device_with_store(&remote, store.clone());

    let t0 = utc_now();
    let b = Goal::restore(Uuid::new_v4(), "B".into(), 3, 3, t0, t0);
    assert!(b.is_complete());
    store.put_goal(&b).await.unwrap();
    remote.insert_remote(GoalDto {
        current_value: 1,
        updated_at: t0 - Duration::microseconds(1),
        ..b.to_dto()
    });

    engine.pull().await.unwrap();

    assert_eq!(engine.goal(b.id()).await.unwrap().unwrap(), b);
}

#[tokio::test]
async fn test_unknown_remote_goal_is_inserted_with_recomputed_completion() {
    let remote = Arc::new(InMemoryRemote::new());
    let engine = device(&remote);
    let c = GoalDto {
        id: Uuid::new_v4(),
        name: "C".into(),
        target_value: 10,
        current_value: 10,
        updated_at: utc_now(),
    };
    remote.insert_remote(c.clone());

    let report = engine.pull().await.unwrap();

    assert_eq!(report.inserted, 1);
    let inserted = engine.goal(c.id).await.unwrap().unwrap();
    assert_eq!(inserted.to_dto(), c);
    assert!(inserted.is_complete());
}

// =============================================================================
// Two devices
// =============================================================================

#[tokio::test]
async fn test_two_devices_converge() {
    let remote = Arc::new(InMemoryRemote::new());
    let phone = device(&remote);
    let laptop = device(&remote);

    let goal = phone.create_goal("Run 50km", 50).await.unwrap();
    phone.increment_goal(goal.id(), 5).await.unwrap();
    phone.sync_now().await.unwrap();

    let report = laptop.sync_now().await.unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(laptop.goal(goal.id()).await.unwrap().unwrap().current_value(), 5);

    laptop
        .edit_goal(goal.id(), GoalEdit::default().name("Run 60km").target_value(60))
        .await
        .unwrap();
    laptop.sync_now().await.unwrap();
    phone.sync_now().await.unwrap();

    let on_phone = phone.goal(goal.id()).await.unwrap().unwrap();
    let on_laptop = laptop.goal(goal.id()).await.unwrap().unwrap();
    assert_eq!(on_phone.to_dto(), on_laptop.to_dto());
    assert_eq!(on_phone.name(), "Run 60km");
    assert_eq!(remote.get_remote(goal.id()).unwrap(), on_phone.to_dto());
}

#[tokio::test]
async fn test_concurrent_edits_last_writer_wins() {
    let remote = Arc::new(InMemoryRemote::new());
    let phone = device(&remote);
    let laptop = device(&remote);

    let goal = phone.create_goal("Pages", 100).await.unwrap();
    phone.sync_now().await.unwrap();
    laptop.sync_now().await.unwrap();

    // Both edit offline; the laptop writes second
    phone.increment_goal(goal.id(), 10).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    laptop.increment_goal(goal.id(), 30).await.unwrap();

    phone.drain_outbox().await.unwrap();
    laptop.drain_outbox().await.unwrap();
    phone.pull().await.unwrap();
    laptop.pull().await.unwrap();

    let on_phone = phone.goal(goal.id()).await.unwrap().unwrap();
    let on_laptop = laptop.goal(goal.id()).await.unwrap().unwrap();
    assert_eq!(on_laptop.current_value(), 30);
    assert_eq!(on_phone.current_value(), 30);
}

#[tokio::test]
async fn test_pending_delete_is_not_resurrected_by_newer_remote_edit() {
    let remote = Arc::new(InMemoryRemote::new());
    let phone = device(&remote);
    let laptop = device(&remote);

    let goal = phone.create_goal("Temporary", 5).await.unwrap();
    phone.sync_now().await.unwrap();
    laptop.sync_now().await.unwrap();

    // Phone deletes without pushing; laptop then edits and pushes
    phone.delete_goal(goal.id()).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    laptop.increment_goal(goal.id(), 1).await.unwrap();
    laptop.drain_outbox().await.unwrap();

    let report = phone.pull().await.unwrap();
    assert_eq!(report.skipped_tombstones, 1);
    assert!(phone.goal(goal.id()).await.unwrap().is_none());

    phone.drain_outbox().await.unwrap();
    assert!(remote.get_remote(goal.id()).is_none());
    assert_eq!(phone.pending_pushes().await.unwrap(), 0);
}

#[tokio::test]
async fn test_refused_delete_brings_back_skipped_remote_edit() {
    let remote = Arc::new(InMemoryRemote::new());
    let phone = device(&remote);
    let laptop = device(&remote);

    let goal = phone.create_goal("Shared", 5).await.unwrap();
    phone.sync_now().await.unwrap();
    laptop.sync_now().await.unwrap();

    phone.delete_goal(goal.id()).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    laptop.increment_goal(goal.id(), 2).await.unwrap();
    laptop.drain_outbox().await.unwrap();

    // The pull skips the laptop's edit and moves the cursor past it
    let report = phone.pull().await.unwrap();
    assert_eq!(report.skipped_tombstones, 1);

    remote.reject_pushes_with(Some(403));
    let drained = phone.drain_outbox().await.unwrap();
    assert_eq!(drained.rejected, 1);
    assert_eq!(phone.pending_pushes().await.unwrap(), 0);

    let expected = remote.get_remote(goal.id()).unwrap();
    let restored = phone.goal(goal.id()).await.unwrap().unwrap();
    assert_eq!(restored.to_dto(), expected);
    assert_eq!(restored.current_value(), 2);

    remote.reject_pushes_with(None);
    phone.sync_now().await.unwrap();
    let after_sync = phone.goal(goal.id()).await.unwrap().unwrap();
    assert_eq!(after_sync.to_dto(), expected);
}

#[tokio::test]
async fn test_events_report_sync_outcomes() {
    let remote = Arc::new(InMemoryRemote::new());
    let engine = device(&remote);
    let mut events = engine.subscribe();

    engine.create_goal("Observed", 2).await.unwrap();
    remote.reject_pushes_with(Some(400));
    engine.sync_now().await.unwrap();

    let mut saw_rejected = false;
    let mut saw_pull = false;
    while let Ok(event) = events.try_recv() {
        match event {
            SyncEvent::PushRejected { kind, .. } => {
                assert_eq!(kind, MutationKind::Create);
                saw_rejected = true;
            }
            SyncEvent::PullCompleted(report) => {
                assert_eq!(report.received, 0);
                saw_pull = true;
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert!(saw_rejected && saw_pull);
}

// =============================================================================
// Durability across restarts (SQLite)
// =============================================================================

#[tokio::test]
async fn test_outbox_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(InMemoryRemote::new());
    remote.set_offline(true);

    let goal_id = {
        let engine = device_with_store(&remote, sqlite_store(&dir).await);
        engine.start().await.unwrap();
        let goal = engine.create_goal("Offline goal", 3).await.unwrap();
        engine.increment_goal(goal.id(), 2).await.unwrap();
        assert!(engine.drain_outbox().await.is_err());
        goal.id()
    };

    remote.set_offline(false);
    let store = sqlite_store(&dir).await;
    assert_eq!(store.pending_count().await.unwrap(), 1);
    let engine = device_with_store(&remote, store);
    engine.start().await.unwrap();

    let report = engine.drain_outbox().await.unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(remote.get_remote(goal_id).unwrap().current_value, 2);
}

#[tokio::test]
async fn test_cursor_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(InMemoryRemote::new());
    let server_time = utc_now();
    remote.set_server_time(Some(server_time));

    {
        let engine = device_with_store(&remote, sqlite_store(&dir).await);
        engine.pull().await.unwrap();
    }

    let store = sqlite_store(&dir).await;
    assert_eq!(store.load_cursor().await.unwrap(), Some(server_time));

    let engine = device_with_store(&remote, store);
    engine.pull().await.unwrap();
    assert_eq!(engine.cursor().await.unwrap(), server_time);
}

#[tokio::test]
async fn test_engine_state_machine() {
    let remote = Arc::new(InMemoryRemote::new());
    let engine = Arc::new(device(&remote));
    assert_eq!(engine.state(), EngineState::Created);

    engine.start().await.unwrap();
    assert_eq!(engine.state(), EngineState::Ready);

    let mut states = engine.state_receiver();
    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run().await })
    };
    states
        .wait_for(|s| *s == EngineState::Running)
        .await
        .unwrap();

    engine.shutdown().await;
    runner.await.unwrap();
    assert_eq!(engine.state(), EngineState::ShuttingDown);
}
