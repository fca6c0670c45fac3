// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Emits through the `metrics` facade; no exporter is installed by the
//! library, so these are no-ops unless the embedding process installs one.
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `sync_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! # Usage
//!
//! ```rust,no_run
//! use index_sync::metrics;
//! use std::time::Duration;
//!
//! metrics::record_fetch(100, Duration::from_millis(12));
//! metrics::record_bulk_write(100, Duration::from_millis(80));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a completed source fetch.
pub fn record_fetch(count: usize, duration: Duration) {
    counter!("sync_documents_fetched_total").increment(count as u64);
    histogram!("sync_fetch_duration_seconds").record(duration.as_secs_f64());
    histogram!("sync_batch_size").record(count as f64);
}

/// Record an accepted bulk write.
pub fn record_bulk_write(operations: usize, duration: Duration) {
    counter!("sync_bulk_requests_total").increment(1);
    histogram!("sync_bulk_duration_seconds").record(duration.as_secs_f64());
    histogram!("sync_bulk_operations").record(operations as f64);
}

/// Record bulk operations by action (`index`, `create`, `update`).
pub fn record_bulk_operations(action: &'static str, count: usize) {
    counter!("sync_bulk_operations_total", "action" => action).increment(count as u64);
}

/// Record documents written (one per source document, whatever the fan-out).
pub fn record_documents_written(count: usize) {
    counter!("sync_documents_written_total").increment(count as u64);
}

/// Record a bulk response carrying item-level failures.
pub fn record_bulk_item_failures(count: usize) {
    counter!("sync_bulk_item_failures_total").increment(count as u64);
}

/// Record a failed attempt that is about to be retried (or given up on).
pub fn record_retry(operation: &str) {
    counter!("sync_retries_total", "operation" => operation.to_string()).increment(1);
}

/// Record a lookup-strategy query outcome.
pub fn record_lookup(hits: usize) {
    if hits == 0 {
        counter!("sync_lookup_misses_total").increment(1);
    } else {
        counter!("sync_lookup_hits_total").increment(hits as u64);
    }
}

/// Record a document skipped because its update key was absent.
pub fn record_missing_key() {
    counter!("sync_missing_key_total").increment(1);
}

/// Record a best-effort flush after a transport failure.
pub fn record_flush(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("sync_index_flushes_total", "status" => status).increment(1);
}

/// Set the progress gauges.
pub fn set_progress(total: u64, remaining: u64) {
    gauge!("sync_documents_total").set(total as f64);
    gauge!("sync_documents_remaining").set(remaining as f64);
}

/// Record a runner state transition.
pub fn set_runner_state(state: &str) {
    gauge!("sync_runner_state", "state" => state.to_string()).set(1.0);
    counter!("sync_runner_transitions_total", "state" => state.to_string()).increment(1);
}

/// Record a completed batch (fetch + write + advance).
pub fn record_batch_complete(duration: Duration) {
    counter!("sync_batches_total").increment(1);
    histogram!("sync_batch_duration_seconds").record(duration.as_secs_f64());
}
