// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation.
//!
//! Uses the `metrics` crate facade. The embedding application chooses the
//! exporter; without one installed every call here is a no-op.
//!
//! # Metric Naming Convention
//! - `mirror_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `table`: entity table name
//! - `operation`: fetch_page, fetch_by_id, list, pull, push, ...
//! - `outcome`: hit, miss, fallback, degraded, success, error, rejected

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record how a cache-aside read was answered
pub fn record_cache_lookup(table: &str, outcome: &str) {
    counter!(
        "mirror_sync_cache_lookups_total",
        "table" => table.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record rows written back into the Local Store from the remote API
pub fn record_write_back(table: &str, rows: usize) {
    counter!(
        "mirror_sync_write_back_rows_total",
        "table" => table.to_string()
    )
    .increment(rows as u64);
}

/// Record a remote API call
pub fn record_remote_call(operation: &str, status: &str) {
    counter!(
        "mirror_sync_remote_calls_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "mirror_sync_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a pulled batch for one table
pub fn record_sync_pull(table: &str, applied: usize, skipped: usize) {
    counter!(
        "mirror_sync_pull_applied_total",
        "table" => table.to_string()
    )
    .increment(applied as u64);
    counter!(
        "mirror_sync_pull_skipped_total",
        "table" => table.to_string()
    )
    .increment(skipped as u64);
}

/// Record a full table resync
pub fn record_resync(table: &str, rows: usize) {
    counter!(
        "mirror_sync_resyncs_total",
        "table" => table.to_string()
    )
    .increment(1);
    histogram!(
        "mirror_sync_resync_rows",
        "table" => table.to_string()
    )
    .record(rows as f64);
}

/// Record pushed mutation outcomes
pub fn record_push(accepted: usize, conflicts: usize) {
    counter!("mirror_sync_push_accepted_total").increment(accepted as u64);
    counter!("mirror_sync_push_conflicts_total").increment(conflicts as u64);
}

/// Set outbox depth
pub fn set_pending_changes(count: u64) {
    gauge!("mirror_sync_pending_changes").set(count as f64);
}

/// Set connection state (0 = Disconnected, 1 = Connecting, 2 = Connected, 3 = Error)
pub fn set_connection_state(state: &str, level: u8) {
    gauge!("mirror_sync_connection_state").set(level as f64);
    counter!(
        "mirror_sync_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// Record a completed sync round
pub fn record_sync_round(status: &str, duration: Duration) {
    counter!(
        "mirror_sync_rounds_total",
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("mirror_sync_round_seconds").record(duration.as_secs_f64());
}

/// Record a Local Store lifecycle event
pub fn record_store_event(event: &str) {
    counter!(
        "mirror_sync_store_events_total",
        "event" => event.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// ERROR TRACKING - Categorized error counters for alerting
// ═══════════════════════════════════════════════════════════════════════════

/// Record an error with category for alerting
pub fn record_error(operation: &str, error_type: &str) {
    counter!(
        "mirror_sync_errors_total",
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record one retried attempt of a failing operation
pub fn record_retry(operation: &str) {
    counter!(
        "mirror_sync_retries_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record circuit breaker call
pub fn record_circuit_breaker_call(circuit: &str, outcome: &str) {
    counter!(
        "mirror_sync_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.operation, self.start.elapsed());
    }
}
