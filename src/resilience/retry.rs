// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! Two shapes are provided:
//! - [`retry`] wraps a single operation and retries it in place (local store
//!   connections and queries).
//! - [`Backoff`] is a stateful delay schedule for the outbox drainer, which
//!   gives up on a round, waits, and tries again later.
//!
//! # Example
//!
//! ```
//! use goal_sync::RetryConfig;
//! use std::time::Duration;
//!
//! // Startup: fail fast on bad config
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_retries, Some(5));
//!
//! // Query: quick retry, then fail
//! let query = RetryConfig::query();
//! assert_eq!(query.max_retries, Some(3));
//!
//! // Push: never give up, the outbox is durable
//! let push = RetryConfig::push(Duration::from_millis(500), Duration::from_secs(300));
//! assert_eq!(push.max_retries, None);
//! ```

use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};
use std::future::Future;

/// Configuration for connection/operation retry behavior.
///
/// Use the preset constructors for common patterns:
/// - [`RetryConfig::startup()`] - Fast-fail for opening the local store
/// - [`RetryConfig::query()`] - Quick retry for individual local operations
/// - [`RetryConfig::push()`] - Unbounded backoff for outbox delivery
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub max_retries: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::query()
    }
}

impl RetryConfig {
    /// Fast-fail retry for opening the local store.
    /// Attempts 5 times with exponential backoff, failing after ~5 seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: Some(5),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Quick retry for individual queries (a busy SQLite file, mostly).
    /// 3 attempts with fast backoff - if it fails, let caller handle it.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Outbox delivery schedule. Infinite: pending mutations are durable and
    /// are only ever dropped on a permanent rejection.
    #[must_use]
    pub fn push(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries: None,
            initial_delay,
            max_delay: max_delay.max(initial_delay),
            factor: 2.0,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }
}

/// Run `operation` until it succeeds or `config.max_retries` attempts fail.
///
/// The delay schedule is the same [`Backoff`] the drainer uses. The last
/// error is returned unchanged.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut backoff = Backoff::new(config.clone());

    loop {
        let err = match operation().await {
            Ok(val) => {
                if backoff.failures() > 0 {
                    info!(operation = operation_name, retries = backoff.failures(), "Operation recovered");
                }
                return Ok(val);
            }
            Err(err) => err,
        };

        let attempt = backoff.failures() as usize + 1;
        if config.max_retries.is_some_and(|max| attempt >= max) {
            return Err(err);
        }

        let delay = backoff.next_delay();
        warn!(
            operation = operation_name,
            attempt,
            max_attempts = ?config.max_retries,
            error = %err,
            retry_in = ?delay,
            "Operation failed, retrying"
        );
        sleep(delay).await;
    }
}

/// Stateful exponential backoff.
///
/// `next_delay` returns the wait before the next attempt and advances the
/// schedule; `reset` returns to the initial delay after a success.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    current: Option<Duration>,
    failures: u32,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            current: None,
            failures: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            None => self.config.initial_delay,
            Some(prev) => prev.mul_f64(self.config.factor).min(self.config.max_delay),
        };
        self.current = Some(delay);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.failures = 0;
    }

    /// Consecutive failures since the last reset.
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Swap the schedule (config hot-reload) without losing the failure count.
    pub fn reconfigure(&mut self, config: RetryConfig) {
        self.current = self.current.map(|d| d.clamp(config.initial_delay, config.max_delay));
        self.config = config;
    }
}
