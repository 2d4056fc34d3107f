//! # Goal Sync
//!
//! An offline-first, bidirectional sync engine for goal records.
//!
//! Two replicas of the same goals are mutated independently: the local
//! store on the device and the remote store behind an HTTP API. The engine
//! converges them without making either a cache of the other.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Mutation hooks                          │
//! │  • create_goal / edit_goal / increment_goal / delete_goal   │
//! │  • Goal::apply_edit sets updated_at + is_complete together  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │  (one serialized write path)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Local store (SQLite / memory)               │
//! │  • goals            • sync cursor        • outbox           │
//! └─────────────────────────────────────────────────────────────┘
//!          │ drain (seq order, backoff)        ▲ merge (LWW)
//!          ▼                                   │
//! ┌─────────────────────────────────────────────────────────────┐
//! │             Remote client (circuit breaker guarded)         │
//! │  • POST/PUT/DELETE /goals     • GET /sync?last_sync_...     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use goal_sync::{SyncEngine, SyncEngineConfig};
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), goal_sync::SyncError> {
//!     let config = SyncEngineConfig {
//!         remote_url: Some("http://localhost:5001".into()),
//!         ..Default::default()
//!     };
//!
//!     let (_tx, rx) = watch::channel(config.clone());
//!     let engine = Arc::new(SyncEngine::connect(config, rx).await?);
//!     engine.start().await?;
//!
//!     // Background push/pull
//!     let runner = engine.clone();
//!     tokio::spawn(async move { runner.run().await });
//!
//!     // Local writes return immediately, online or not
//!     let goal = engine.create_goal("Read 12 books", 12).await?;
//!     engine.increment_goal(goal.id(), 1).await?;
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Last-write-wins merge**: whole-record, by `updated_at`, ties keep local
//! - **Server-clock cursor**: pulls resume from the server's timestamp, not ours
//! - **Durable outbox**: one pending entry per goal, collapsed, retried with backoff
//! - **Tombstones**: a pending delete keeps pulls from resurrecting the record
//! - **Circuit breaker**: fails fast while the remote is down
//! - **Injected collaborators**: any [`LocalStore`] and [`RemoteClient`]
//!
//! ## Modules
//!
//! - [`engine`]: The [`SyncEngine`] orchestrating push and pull
//! - [`goal`]: The goal record and its mutation API
//! - [`resolver`]: The conflict resolver
//! - [`remote`]: Remote client contract, HTTP and in-memory implementations
//! - [`storage`]: Local store contract, SQLite and in-memory implementations
//! - [`resilience`]: Outbox model, circuit breaker, retry

pub mod config;
pub mod error;
pub mod goal;
pub mod resolver;
pub mod remote;
pub mod storage;
pub mod resilience;
pub mod engine;
pub mod metrics;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use config::SyncEngineConfig;
pub use error::SyncError;
pub use goal::{Goal, GoalEdit};
pub use resolver::{resolve, MergeAction};
pub use engine::{SyncEngine, EngineState, MergeOutcome, PullReport, DrainReport, SyncEvent};
pub use remote::{RemoteClient, ChangeSet, GoalDto, HttpRemoteClient, HttpRemoteConfig, InMemoryRemote};
pub use storage::{CursorStore, GoalStore, LocalStore, OutboxStore, StorageError, InMemoryStore, SqlStore};
pub use resilience::outbox::{LocalChange, MutationKind, PendingMutation, OutboxStats};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitConfig};
pub use resilience::retry::{RetryConfig, Backoff};
pub use metrics::LatencyTimer;
