// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync engine coordinator.
//!
//! The [`SyncEngine`] owns the two replicas' meeting point:
//! - the local store (goals, sync cursor, outbox), written only through the
//!   engine's serialized write path
//! - an injected [`RemoteClient`], reached through a circuit breaker
//!
//! Local mutations are applied and queued in one critical section, then
//! delivered by the outbox drainer. Pulls fetch everything newer than the
//! cursor and merge each snapshot with last-write-wins.
//!
//! # Lifecycle
//!
//! ```text
//! Created → Starting → Ready → Running → ShuttingDown
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use goal_sync::{SyncEngine, SyncEngineConfig, EngineState, InMemoryRemote, InMemoryStore};
//! use tokio::sync::watch;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = SyncEngineConfig::default();
//! let (_tx, rx) = watch::channel(config.clone());
//! let engine = SyncEngine::new(
//!     config,
//!     rx,
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(InMemoryRemote::new()),
//! );
//!
//! assert_eq!(engine.state(), EngineState::Created);
//! engine.start().await.expect("start failed");
//!
//! let goal = engine.create_goal("Run 100km", 100).await.unwrap();
//! engine.increment_goal(goal.id(), 5).await.unwrap();
//! engine.sync_now().await.unwrap();
//! # }
//! ```

mod types;
mod api;
mod pull;
mod push;
mod lifecycle;

pub use types::{EngineState, MergeOutcome, PullReport, DrainReport, SyncEvent};

use std::future::Future;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{broadcast, watch, Mutex, Notify};

use crate::config::SyncEngineConfig;
use crate::error::SyncError;
use crate::metrics::LatencyTimer;
use crate::remote::RemoteClient;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitConfig};
use crate::resilience::outbox::{Outbox, OutboxStats};
use crate::storage::traits::LocalStore;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Cursor value meaning "never synced".
#[must_use]
pub fn never_synced() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

/// Main sync engine coordinator.
///
/// # Thread Safety
///
/// The engine is `Send + Sync`; share it behind an `Arc` and call
/// [`run()`](Self::run) from a spawned task. Every method takes `&self`.
pub struct SyncEngine {
    /// Configuration (can be updated at runtime via watch channel)
    /// Uses RwLock for interior mutability so run() can take &self
    pub(super) config: RwLock<SyncEngineConfig>,

    /// Runtime config updates (Mutex for interior mutability in run loop)
    pub(super) config_rx: Mutex<watch::Receiver<SyncEngineConfig>>,

    /// Engine state (broadcast to watchers)
    pub(super) state: watch::Sender<EngineState>,

    /// Engine state receiver (for internal use)
    pub(super) state_rx: watch::Receiver<EngineState>,

    pub(super) local: Arc<dyn LocalStore>,

    pub(super) remote: Arc<dyn RemoteClient>,

    /// Guards every remote call
    pub(super) circuit: CircuitBreaker,

    /// Serialized write path for the local store. Held for each user
    /// mutation and for each per-record merge of a pull.
    pub(super) write_lock: Mutex<()>,

    /// Held by a pull for its whole duration and by the drainer around each
    /// single delivery, so a pull never discards an entry that is on the wire.
    pub(super) exchange_lock: Mutex<()>,

    pub(super) outbox: Outbox,

    /// Wakes the run loop when a mutation is queued
    pub(super) drain_notify: Notify,

    pub(super) events: broadcast::Sender<SyncEvent>,

    pub(super) shutdown: watch::Sender<bool>,
}

impl SyncEngine {
    /// Create a new sync engine over an injected local store and remote.
    ///
    /// The engine starts in `Created` state. Call [`start()`](Self::start)
    /// to check the store and transition to `Ready`.
    pub fn new(
        config: SyncEngineConfig,
        config_rx: watch::Receiver<SyncEngineConfig>,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteClient>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        let circuit = CircuitBreaker::new(
            format!("remote_{}", remote.name()),
            CircuitConfig::from_engine_config(&config),
        );

        Self {
            config: RwLock::new(config),
            config_rx: Mutex::new(config_rx),
            state: state_tx,
            state_rx,
            local,
            remote,
            circuit,
            write_lock: Mutex::new(()),
            exchange_lock: Mutex::new(()),
            outbox: Outbox::new(),
            drain_notify: Notify::new(),
            events,
            shutdown,
        }
    }

    /// Get current engine state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Check if engine is ready to accept requests.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.state(), EngineState::Ready | EngineState::Running)
    }

    /// Subscribe to pull/push notifications.
    ///
    /// Slow subscribers miss events (`RecvError::Lagged`); nothing blocks on them.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the current configuration.
    #[must_use]
    pub fn config(&self) -> SyncEngineConfig {
        self.config.read().clone()
    }

    /// The persisted sync cursor, or the epoch if never synced.
    pub async fn cursor(&self) -> Result<DateTime<Utc>, SyncError> {
        Ok(self.local.load_cursor().await?.unwrap_or_else(never_synced))
    }

    /// Number of mutations waiting in the outbox.
    pub async fn pending_pushes(&self) -> Result<u64, SyncError> {
        Ok(self.local.pending_count().await?)
    }

    #[must_use]
    pub fn outbox_stats(&self) -> OutboxStats {
        self.outbox.stats()
    }

    #[must_use]
    pub fn remote_circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    pub(super) fn set_state(&self, state: EngineState) {
        let _ = self.state.send(state);
        crate::metrics::set_engine_state(&state.to_string());
    }

    pub(super) fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Run a remote call through the circuit breaker with latency and
    /// outcome accounting.
    pub(super) async fn remote_call<F, Fut, T>(&self, operation: &'static str, f: F) -> Result<T, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let _timer = LatencyTimer::new(operation);
        let result = self.circuit.call(f).await;
        let status = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        crate::metrics::record_remote_call(operation, status);
        result
    }

    pub(super) async fn refresh_outbox_depth(&self) {
        if let Ok(depth) = self.local.pending_count().await {
            crate::metrics::set_outbox_depth(depth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryRemote;
    use crate::storage::InMemoryStore;

    pub(super) fn engine_with(remote: Arc<InMemoryRemote>) -> (SyncEngine, Arc<InMemoryStore>) {
        let config = SyncEngineConfig::default();
        let (_tx, rx) = watch::channel(config.clone());
        let store = Arc::new(InMemoryStore::new());
        let engine = SyncEngine::new(config, rx, store.clone(), remote);
        (engine, store)
    }

    #[test]
    fn test_new_engine_is_created() {
        let (engine, _) = engine_with(Arc::new(InMemoryRemote::new()));
        assert_eq!(engine.state(), EngineState::Created);
        assert!(!engine.is_ready());
        assert_eq!(engine.remote_circuit().name(), "remote_memory");
    }

    #[tokio::test]
    async fn test_cursor_defaults_to_epoch() {
        let (engine, _) = engine_with(Arc::new(InMemoryRemote::new()));
        assert_eq!(engine.cursor().await.unwrap(), never_synced());
        assert_eq!(never_synced().timestamp(), 0);
    }

    #[tokio::test]
    async fn test_remote_call_maps_through_circuit() {
        let remote = Arc::new(InMemoryRemote::new());
        let (engine, _) = engine_with(remote.clone());

        remote.set_offline(true);
        let result = engine
            .remote_call("fetch", || remote.fetch_changes_since(never_synced()))
            .await;

        assert!(matches!(result, Err(SyncError::Transport(_))));
        assert_eq!(engine.remote_circuit().failures(), 1);
    }
}
