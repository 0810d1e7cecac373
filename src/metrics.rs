// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for shard-cache.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `shard_cache_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `repo`: repository name
//! - `operation`: get, save, delete, flush, ...
//! - `status`: success, error, ...

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a repository operation outcome
pub fn record_operation(repo: &str, operation: &str, status: &str) {
    counter!(
        "shard_cache_operations_total",
        "repo" => repo.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(repo: &str, operation: &str, duration: Duration) {
    histogram!(
        "shard_cache_operation_seconds",
        "repo" => repo.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// LOADS - cache misses routed to storage
// ═══════════════════════════════════════════════════════════════════════════

/// Record a read against the local cache
pub fn record_cache_lookup(repo: &str, hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    counter!(
        "shard_cache_lookups_total",
        "repo" => repo.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a storage load (outcome: found, absent, error)
pub fn record_load(repo: &str, outcome: &str) {
    counter!(
        "shard_cache_loads_total",
        "repo" => repo.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a caller joining a load already in flight
pub fn record_load_joined(repo: &str) {
    counter!(
        "shard_cache_load_joins_total",
        "repo" => repo.to_string()
    )
    .increment(1);
}

/// Record a miss answered from the negative-load cooldown
pub fn record_load_suppressed(repo: &str) {
    counter!(
        "shard_cache_loads_suppressed_total",
        "repo" => repo.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// WRITE-BACK & EVICTION
// ═══════════════════════════════════════════════════════════════════════════

/// Record one write-back cycle
pub fn record_write_back(repo: &str, count: usize, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "shard_cache_write_back_total",
        "repo" => repo.to_string(),
        "status" => status
    )
    .increment(1);

    if success {
        counter!(
            "shard_cache_entities_written_total",
            "repo" => repo.to_string()
        )
        .increment(count as u64);
    }
    histogram!(
        "shard_cache_write_back_batch_size",
        "repo" => repo.to_string()
    )
    .record(count as f64);
}

/// Record write-back cycle duration
pub fn record_flush_duration(repo: &str, duration: Duration) {
    histogram!(
        "shard_cache_flush_seconds",
        "repo" => repo.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record idle eviction
pub fn record_eviction(repo: &str, count: usize) {
    counter!(
        "shard_cache_evictions_total",
        "repo" => repo.to_string()
    )
    .increment(count as u64);
}

/// Record a peer message handled by a repository (kind: update/delete, outcome: applied/ignored)
pub fn record_remote(repo: &str, kind: &str, outcome: &str) {
    counter!(
        "shard_cache_remote_messages_total",
        "repo" => repo.to_string(),
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// GAUGES - cache sizes and state
// ═══════════════════════════════════════════════════════════════════════════

/// Set cached/dirty/context counts of one repository
pub fn set_cache_sizes(repo: &str, items: usize, dirty: usize, contexts: usize) {
    gauge!("shard_cache_items", "repo" => repo.to_string()).set(items as f64);
    gauge!("shard_cache_dirty_items", "repo" => repo.to_string()).set(dirty as f64);
    gauge!("shard_cache_context_items", "repo" => repo.to_string()).set(contexts as f64);
}

/// Record repository state transition
pub fn set_repo_state(repo: &str, state: &str) {
    counter!(
        "shard_cache_state_transitions_total",
        "repo" => repo.to_string(),
        "state" => state.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// ERROR TRACKING - Categorized error counters for alerting
// ═══════════════════════════════════════════════════════════════════════════

/// Record an error with category for alerting
pub fn record_error(scope: &str, operation: &str, error_type: &str) {
    counter!(
        "shard_cache_errors_total",
        "scope" => scope.to_string(),
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record a connection/backend error
pub fn record_connection_error(backend: &str) {
    counter!(
        "shard_cache_connection_errors_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// TRANSPORT & SYNC
// ═══════════════════════════════════════════════════════════════════════════

/// Record a transport command or subscription event
pub fn record_transport(operation: &str, status: &str) {
    counter!(
        "shard_cache_transport_operations_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Set transport connection status (1 = connected, 0 = disconnected)
pub fn set_transport_connected(connected: bool) {
    gauge!("shard_cache_transport_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record a sync message sent or received on a channel
pub fn record_sync(channel: &str, direction: &str, kind: &str) {
    counter!(
        "shard_cache_sync_messages_total",
        "channel" => channel.to_string(),
        "direction" => direction.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    repo: String,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(repo: &str, operation: &'static str) -> Self {
        Self {
            repo: repo.to_string(),
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(&self.repo, self.operation, self.start.elapsed());
    }
}
