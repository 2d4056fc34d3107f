// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit breaker pattern using recloser crate.
//!
//! Guards calls to the remote API. When the recent failure rate crosses the
//! threshold the breaker opens and calls fail fast with
//! [`SyncError::CircuitOpen`] instead of waiting on timeouts.
//!
//! Only transient failures (transport errors, timeouts, 408/429/5xx) count
//! against the breaker. A 400 or 404 means the server is up and answering.
//!
//! States:
//! - Closed: Normal operation, requests pass through
//! - Open: Remote unhealthy, requests fail-fast without attempting
//! - HalfOpen: Testing if remote recovered, limited requests allowed

use recloser::{Recloser, AsyncRecloser, Error as RecloserError};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::SyncEngineConfig;
use crate::error::SyncError;

/// Configuration for a circuit breaker
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitConfig {
    /// Failure rate (0.0 - 1.0) over the window that trips the circuit
    pub failure_rate: f32,
    /// Number of calls in the closed-state sliding window
    pub window: usize,
    /// Trial calls allowed while half-open
    pub half_open_calls: usize,
    /// How long to stay open before trying again (half-open)
    pub open_wait: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.5,
            window: 10,
            half_open_calls: 2,
            open_wait: Duration::from_secs(30),
        }
    }
}

impl CircuitConfig {
    #[must_use]
    pub fn from_engine_config(config: &SyncEngineConfig) -> Self {
        Self {
            failure_rate: config.circuit_failure_rate.clamp(0.0, 1.0),
            window: config.circuit_window.max(1),
            half_open_calls: 2,
            open_wait: Duration::from_secs(config.circuit_open_secs),
        }
    }

    /// Fast recovery for testing
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            failure_rate: 0.5,
            window: 2,
            half_open_calls: 1,
            open_wait: Duration::from_millis(50),
        }
    }
}

/// A named circuit breaker with call accounting
pub struct CircuitBreaker {
    name: String,
    inner: AsyncRecloser,

    calls_total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        let recloser = Recloser::custom()
            .error_rate(config.failure_rate)
            .closed_len(config.window)
            .half_open_len(config.half_open_calls)
            .open_wait(config.open_wait)
            .build();

        Self {
            name: name.into(),
            inner: recloser.into(),
            calls_total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute a remote call through the circuit breaker.
    ///
    /// Permanent errors pass through without being recorded as failures.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        self.calls_total.fetch_add(1, Ordering::Relaxed);

        let guarded = async {
            match f().await {
                Ok(value) => Ok(Ok(value)),
                Err(e) if e.is_transient() => Err(e),
                Err(e) => Ok(Err(e)),
            }
        };

        match self.inner.call(guarded).await {
            Ok(Ok(value)) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                debug!(circuit = %self.name, "Circuit call succeeded");
                crate::metrics::record_circuit_call(&self.name, "success");
                Ok(value)
            }
            Ok(Err(e)) => {
                // Server answered, so the circuit stays healthy
                self.successes.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_circuit_call(&self.name, "rejected_by_server");
                Err(e)
            }
            Err(RecloserError::Rejected) => {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                warn!(circuit = %self.name, "Circuit breaker rejected call (open)");
                crate::metrics::record_circuit_call(&self.name, "short_circuited");
                Err(SyncError::CircuitOpen(self.name.clone()))
            }
            Err(RecloserError::Inner(e)) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                debug!(circuit = %self.name, error = %e, "Circuit call failed");
                crate::metrics::record_circuit_call(&self.name, "failure");
                Err(e)
            }
        }
    }

    #[must_use]
    pub fn calls_total(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Transient failures only
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Calls short-circuited while open
    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Get failure rate (0.0 - 1.0)
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let total = self.calls_total();
        if total == 0 {
            return 0.0;
        }
        self.failures() as f64 / total as f64
    }
}
