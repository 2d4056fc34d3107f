//! Configuration for the sync engine.
//!
//! # Example
//!
//! ```
//! use goal_sync::SyncEngineConfig;
//!
//! // Minimal config (uses defaults, no remote)
//! let config = SyncEngineConfig::default();
//! assert_eq!(config.pull_interval_secs, 60);
//!
//! // Full config
//! let config = SyncEngineConfig {
//!     remote_url: Some("https://goals.example.com/api".into()),
//!     api_key: Some("secret".into()),
//!     store_url: Some("sqlite:///var/lib/goals/goals.db?mode=rwc".into()),
//!     pull_interval_secs: 300,
//!     ..Default::default()
//! };
//! ```

use serde::Deserialize;
use std::time::Duration;

use crate::resilience::retry::RetryConfig;

pub const DEFAULT_STORE_URL: &str = "sqlite://goal_sync.db?mode=rwc";

/// Configuration for the sync engine.
///
/// All fields have sensible defaults. [`SyncEngine::connect`](crate::SyncEngine::connect)
/// needs at least `remote_url`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyncEngineConfig {
    /// Base URL of the remote API (e.g., "http://localhost:5001")
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Sent as a bearer token on every request
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout for remote calls
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// SQLite connection string for the local store
    #[serde(default)]
    pub store_url: Option<String>,

    /// Periodic pull interval in seconds (0 = disabled)
    #[serde(default = "default_pull_interval_secs")]
    pub pull_interval_secs: u64,

    /// Outbox drain batch size
    #[serde(default = "default_outbox_drain_batch_size")]
    pub outbox_drain_batch_size: usize,

    /// Push backoff schedule
    #[serde(default = "default_push_backoff_initial_ms")]
    pub push_backoff_initial_ms: u64,
    #[serde(default = "default_push_backoff_max_secs")]
    pub push_backoff_max_secs: u64,

    /// Remote circuit breaker
    #[serde(default = "default_circuit_failure_rate")]
    pub circuit_failure_rate: f32,
    #[serde(default = "default_circuit_window")]
    pub circuit_window: usize,
    #[serde(default = "default_circuit_open_secs")]
    pub circuit_open_secs: u64,
}

fn default_request_timeout_secs() -> u64 { 10 }
fn default_pull_interval_secs() -> u64 { 60 }
fn default_outbox_drain_batch_size() -> usize { 50 }
fn default_push_backoff_initial_ms() -> u64 { 500 }
fn default_push_backoff_max_secs() -> u64 { 300 } // 5 minutes
fn default_circuit_failure_rate() -> f32 { 0.5 }
fn default_circuit_window() -> usize { 10 }
fn default_circuit_open_secs() -> u64 { 30 }

impl Default for SyncEngineConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
            store_url: None,
            pull_interval_secs: default_pull_interval_secs(),
            outbox_drain_batch_size: default_outbox_drain_batch_size(),
            push_backoff_initial_ms: default_push_backoff_initial_ms(),
            push_backoff_max_secs: default_push_backoff_max_secs(),
            circuit_failure_rate: default_circuit_failure_rate(),
            circuit_window: default_circuit_window(),
            circuit_open_secs: default_circuit_open_secs(),
        }
    }
}

impl SyncEngineConfig {
    #[must_use]
    pub fn store_url(&self) -> &str {
        self.store_url.as_deref().unwrap_or(DEFAULT_STORE_URL)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// `None` when periodic pulls are disabled.
    #[must_use]
    pub fn pull_interval(&self) -> Option<Duration> {
        (self.pull_interval_secs > 0).then(|| Duration::from_secs(self.pull_interval_secs))
    }

    #[must_use]
    pub fn drain_batch_size(&self) -> usize {
        self.outbox_drain_batch_size.max(1)
    }

    #[must_use]
    pub fn push_retry(&self) -> RetryConfig {
        RetryConfig::push(
            Duration::from_millis(self.push_backoff_initial_ms.max(1)),
            Duration::from_secs(self.push_backoff_max_secs),
        )
    }
}
