// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for goal-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `goal_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `operation`: create, update, delete, fetch
//! - `kind`: create, update, delete (outbox mutation kind)
//! - `status`: success, error, rejected

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// REMOTE - Calls through the remote client
// ═══════════════════════════════════════════════════════════════════════════

/// Record a remote call outcome
pub fn record_remote_call(operation: &str, status: &str) {
    counter!(
        "goal_sync_remote_calls_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record remote call latency
pub fn record_remote_latency(operation: &str, duration: Duration) {
    histogram!(
        "goal_sync_remote_call_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record circuit breaker call outcome
pub fn record_circuit_call(circuit: &str, outcome: &str) {
    counter!(
        "goal_sync_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// PULL - Change feed consumption
// ═══════════════════════════════════════════════════════════════════════════

/// Record a finished pull
pub fn record_pull(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "goal_sync_pulls_total",
        "status" => status
    )
    .increment(1);
}

/// Record the outcome of merging one remote snapshot
pub fn record_merge(action: &str) {
    counter!(
        "goal_sync_merges_total",
        "action" => action.to_string()
    )
    .increment(1);
}

/// Records received in one pull
pub fn record_pull_size(count: usize) {
    histogram!("goal_sync_pull_records").record(count as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// PUSH - Outbox delivery
// ═══════════════════════════════════════════════════════════════════════════

/// Record a push attempt for one outbox entry
pub fn record_push(kind: &str, status: &str) {
    counter!(
        "goal_sync_pushes_total",
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a drain round
pub fn record_outbox_drain(delivered: usize, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "goal_sync_outbox_drains_total",
        "status" => status
    )
    .increment(1);

    if delivered > 0 {
        counter!("goal_sync_outbox_delivered_total").increment(delivered as u64);
    }
}

/// Set outbox pending entries
pub fn set_outbox_depth(count: u64) {
    gauge!("goal_sync_outbox_depth").set(count as f64);
}

/// Set current push backoff delay
pub fn set_push_backoff(delay: Duration) {
    gauge!("goal_sync_push_backoff_seconds").set(delay.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════

/// Record a local mutation through the engine
pub fn record_local_mutation(kind: &str) {
    counter!(
        "goal_sync_local_mutations_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record engine state transition
pub fn set_engine_state(state: &str) {
    counter!(
        "goal_sync_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// Record total startup time
pub fn record_startup_total(duration: Duration) {
    histogram!("goal_sync_startup_seconds").record(duration.as_secs_f64());
}

/// A timing guard that records remote latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_remote_latency(self.operation, self.start.elapsed());
    }
}
