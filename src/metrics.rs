// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for clip-sync.
//!
//! Uses the `metrics` crate facade; the host process picks the exporter.
//!
//! # Metric Naming Convention
//! - `clip_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for size histograms
//!
//! # Labels
//! - `tier`: store, cache
//! - `operation`: upsert, fetch, sweep, get, set
//! - `outcome` / `status`: per-metric result

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Record a push result ("success", "too_large", "store_error", "rejected")
pub fn record_push(status: &str) {
    counter!("clip_sync_push_total", "status" => status.to_string()).increment(1);
}

/// Record a pull result ("not_modified", "empty", "fresh", "store_error", "rejected")
pub fn record_pull(outcome: &str) {
    counter!("clip_sync_pull_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a device poll ("delivered", "unchanged", "error")
pub fn record_poll(result: &str) {
    counter!("clip_sync_poll_total", "result" => result.to_string()).increment(1);
}

/// Record pushed payload size
pub fn record_payload_bytes(kind: &str, bytes: usize) {
    histogram!("clip_sync_payload_bytes", "kind" => kind.to_string()).record(bytes as f64);
}

/// Record operation latency
pub fn record_latency(tier: &str, operation: &str, duration: Duration) {
    histogram!(
        "clip_sync_operation_seconds",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a freshness cache lookup ("hit", "miss", "error")
pub fn record_cache_lookup(result: &str) {
    counter!("clip_sync_cache_lookups_total", "result" => result.to_string()).increment(1);
}

/// Record rows removed by one sweep
pub fn record_swept(count: u64) {
    counter!("clip_sync_swept_buffers_total").increment(count);
    counter!("clip_sync_sweeps_total", "status" => "success").increment(1);
}

/// Record a failed sweep tick
pub fn record_sweep_failure() {
    counter!("clip_sync_sweeps_total", "status" => "failure").increment(1);
}

/// Record an error with category for alerting
pub fn record_error(tier: &str, operation: &str, error_type: &str) {
    counter!(
        "clip_sync_errors_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record a deadline expiry
pub fn record_timeout(tier: &str, operation: &str) {
    counter!(
        "clip_sync_timeouts_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Set backend health status (1 = healthy, 0 = unhealthy)
pub fn set_backend_healthy(backend: &str, healthy: bool) {
    gauge!("clip_sync_backend_healthy", "backend" => backend.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

/// Set circuit breaker state (0 = closed, 1 = open)
pub fn set_circuit_state(circuit: &str, state: u8) {
    gauge!("clip_sync_circuit_breaker_state", "circuit" => circuit.to_string()).set(state as f64);
}

/// Record circuit breaker call outcome
pub fn record_circuit_call(circuit: &str, outcome: &str) {
    counter!(
        "clip_sync_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Track engine state transitions
pub fn set_engine_state(state: &str) {
    counter!("clip_sync_state_transitions_total", "state" => state.to_string()).increment(1);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    tier: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(tier: &'static str, operation: &'static str) -> Self {
        Self {
            tier,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.tier, self.operation, self.start.elapsed());
    }
}

/// Convenience macro for timing operations
#[macro_export]
macro_rules! time_operation {
    ($tier:expr, $op:expr) => {
        $crate::metrics::LatencyTimer::new($tier, $op)
    };
}
