//! Metrics definitions for the indexer.
//!
//! This module defines all metrics used throughout the indexer.
//! Metrics are collected using the `metrics` crate and can be exported
//! to Prometheus via `metrics-exporter-prometheus`.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Instant;

/// Initialize all metric descriptions.
/// Call this once at startup before any metrics are recorded.
pub fn init_metrics() {
    describe_gauge!("worker_count", "Number of active block workers");
    describe_gauge!(
        "worker_last_height",
        "Last height successfully processed by each worker, labeled by chain id"
    );
    describe_histogram!(
        "worker_latency_seconds",
        "Lag between a block's timestamp and the moment its processing finished"
    );
    describe_gauge!("db_total_blocks", "Total number of blocks in the database");
    describe_gauge!("db_latest_height", "Latest block height in the database");
    describe_histogram!(
        "db_latency_seconds",
        "Time taken by repository operations in seconds"
    );
    describe_counter!(
        "decode_errors_total",
        "Total number of message/event decode errors during block processing"
    );
    describe_counter!(
        "module_errors_total",
        "Total number of module hook errors swallowed by the dispatcher"
    );
    describe_counter!(
        "blocks_skipped_total",
        "Heights dequeued that were already present in the database"
    );
}

/// Record the number of active workers.
pub fn record_worker_count(count: usize) {
    gauge!("worker_count").set(count as f64);
}

/// Publish the last height a worker completed.
pub fn record_worker_last_height(worker: usize, chain_id: &str, height: u64) {
    gauge!("worker_last_height", "worker" => worker.to_string(), "chain_id" => chain_id.to_string())
        .set(height as f64);
}

/// Observe how far behind the block's own timestamp the worker finished.
pub fn record_worker_latency(lag_secs: f64) {
    histogram!("worker_latency_seconds").record(lag_secs);
}

/// Refresh the database-side gauges after a tx export.
pub fn record_db_stats(total_blocks: u64, latest_height: u64) {
    gauge!("db_total_blocks").set(total_blocks as f64);
    gauge!("db_latest_height").set(latest_height as f64);
}

/// Observe a repository operation's duration.
pub fn record_db_latency(duration_secs: f64) {
    histogram!("db_latency_seconds").record(duration_secs);
}

/// Record a decode error.
///
/// # Arguments
/// * `kind` - What failed to decode ("message" or "event")
pub fn record_decode_error(kind: &str) {
    counter!("decode_errors_total", "kind" => kind.to_string()).increment(1);
}

/// Record a module hook error.
///
/// # Arguments
/// * `hook` - The hook that failed ("block", "tx", "msg", "event", ...)
/// * `module` - The module name
pub fn record_module_error(hook: &str, module: &str) {
    counter!("module_errors_total", "hook" => hook.to_string(), "module" => module.to_string())
        .increment(1);
}

/// Record a height skipped because the block already existed.
pub fn record_block_skipped() {
    counter!("blocks_skipped_total").increment(1);
}

/// A timer that records a DB latency observation when dropped.
pub struct DbTimer {
    start: Instant,
}

impl DbTimer {
    /// Start a new repository-operation timer.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for DbTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DbTimer {
    fn drop(&mut self) {
        record_db_latency(self.start.elapsed().as_secs_f64());
    }
}
