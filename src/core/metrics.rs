// src/core/metrics.rs

//! Defines and registers Prometheus metrics for server monitoring (§A.4).
//!
//! This module uses `lazy_static` to ensure that metrics are registered only
//! once globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_gauge, register_int_counter, register_int_gauge, Counter, Gauge,
    IntCounter, IntGauge, TextEncoder,
};

lazy_static! {
    // --- Server-wide gauges ---
    /// Number of runs currently held in memory (not yet finished/archived).
    pub static ref ACTIVE_RUNS: IntGauge =
        register_int_gauge!("runtrace_active_runs", "Number of runs currently active in memory.").unwrap();
    /// Number of live ingest/viewer sessions currently connected.
    pub static ref ACTIVE_SESSIONS: IntGauge =
        register_int_gauge!("runtrace_active_sessions", "Number of currently connected sessions.").unwrap();
    /// Number of distinct live-log subscribers across all test cases.
    pub static ref ACTIVE_SUBSCRIBERS: IntGauge =
        register_int_gauge!("runtrace_active_subscribers", "Number of active live-log viewer subscriptions.").unwrap();

    // --- Counters ---
    /// Total number of inbound frames successfully ingested, across all message types.
    pub static ref EVENTS_INGESTED_TOTAL: IntCounter =
        register_int_counter!("runtrace_events_ingested_total", "Total number of inbound frames ingested.").unwrap();
    /// Total number of frames rejected for malformed content or validation failure.
    pub static ref EVENTS_REJECTED_TOTAL: IntCounter =
        register_int_counter!("runtrace_events_rejected_total", "Total number of inbound frames rejected.").unwrap();
    /// Total number of failed sends to a live-log subscriber channel (slow/gone viewer).
    pub static ref SUBSCRIBER_SEND_FAILURES_TOTAL: IntCounter =
        register_int_counter!("runtrace_subscriber_send_failures_total", "Total number of failed sends to a live-log subscriber.").unwrap();
    /// Total number of errors writing to the relational index.
    pub static ref INDEX_WRITE_ERRORS_TOTAL: IntCounter =
        register_int_counter!("runtrace_index_write_errors_total", "Total number of relational index write errors.").unwrap();
    /// Total number of errors appending to an on-disk run/case log.
    pub static ref DISK_APPEND_ERRORS_TOTAL: IntCounter =
        register_int_counter!("runtrace_disk_append_errors_total", "Total number of on-disk append errors.").unwrap();
    /// Total number of runs abandoned by the idle watchdog or startup sweep.
    pub static ref RUNS_ABANDONED_TOTAL: IntCounter =
        register_int_counter!("runtrace_runs_abandoned_total", "Total number of runs marked aborted by the watchdog or startup sweep.").unwrap();
    /// Total number of runs deleted by the retention sweep.
    pub static ref RUNS_RETAINED_DELETED_TOTAL: IntCounter =
        register_int_counter!("runtrace_runs_retention_deleted_total", "Total number of runs deleted by the retention sweep.").unwrap();
    /// Total number of connections accepted since startup.
    pub static ref CONNECTIONS_RECEIVED_TOTAL: Counter =
        register_counter!("runtrace_connections_received_total", "Total number of connections received.").unwrap();
    /// A boolean gauge indicating whether the retention sweep task is currently running.
    pub static ref RETENTION_SWEEP_IN_PROGRESS: Gauge =
        register_gauge!("runtrace_retention_sweep_in_progress", "Retention sweep in progress (1 for true, 0 for false).").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
