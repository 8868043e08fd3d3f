//! Prometheus metrics for latency tracking and monitoring.
//!
//! This module provides metrics for:
//! - Endpoint connects, backoffs, failovers and probe failures
//! - JSON-RPC, fee query, detection and settlement latency
//! - Opportunity and settlement outcome counters
//! - Loop errors and executor contention

use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::debug;

// === Metric Name Constants ===

/// JSON-RPC request latency metric name.
pub const METRIC_RPC_LATENCY: &str = "rpc_request_latency_ms";
/// Fee query latency metric name.
pub const METRIC_FEE_QUERY_LATENCY: &str = "fee_query_latency_ms";
/// Opportunity detection latency metric name.
pub const METRIC_OPPORTUNITY_DETECTION_LATENCY: &str = "opportunity_detection_latency_ms";
/// Settlement latency metric name, submission through confirmation.
pub const METRIC_SETTLEMENT_LATENCY: &str = "settlement_latency_ms";
/// Endpoint connects counter metric name.
pub const METRIC_ENDPOINT_CONNECTS: &str = "endpoint_connects_total";
/// Endpoint backoff rounds counter metric name.
pub const METRIC_ENDPOINT_BACKOFFS: &str = "endpoint_backoffs_total";
/// Endpoint failovers counter metric name.
pub const METRIC_ENDPOINT_FAILOVERS: &str = "endpoint_failovers_total";
/// Health probe failures counter metric name.
pub const METRIC_ENDPOINT_PROBE_FAILURES: &str = "endpoint_probe_failures_total";
/// Fee fallbacks counter metric name.
pub const METRIC_FEE_FALLBACKS: &str = "fee_fallbacks_total";
/// Skipped price queries counter metric name.
pub const METRIC_PRICE_QUERIES_SKIPPED: &str = "price_queries_skipped_total";
/// Price cache hits counter metric name.
pub const METRIC_PRICE_CACHE_HITS: &str = "price_cache_hits_total";
/// Opportunities detected counter metric name.
pub const METRIC_OPPORTUNITIES_DETECTED: &str = "opportunities_detected_total";
/// Opportunities executed counter metric name.
pub const METRIC_OPPORTUNITIES_EXECUTED: &str = "opportunities_executed_total";
/// Opportunities rejected by re-validation counter metric name.
pub const METRIC_OPPORTUNITIES_INVALID: &str = "opportunities_invalid_total";
/// Executor busy counter metric name.
pub const METRIC_EXECUTOR_BUSY: &str = "executor_busy_total";
/// Settlement outcomes counter metric name, labelled by status.
pub const METRIC_SETTLEMENTS: &str = "settlements_total";
/// Loop errors counter metric name.
pub const METRIC_LOOP_ERRORS: &str = "loop_errors_total";

/// Initialize all metric descriptions.
/// Call this once at startup, after the recorder is installed.
pub fn init_metrics() {
    describe_histogram!(METRIC_RPC_LATENCY, "JSON-RPC request latency in milliseconds");
    describe_histogram!(METRIC_FEE_QUERY_LATENCY, "Fee query latency in milliseconds");
    describe_histogram!(
        METRIC_OPPORTUNITY_DETECTION_LATENCY,
        "Time to scan all pairs and venues in milliseconds"
    );
    describe_histogram!(
        METRIC_SETTLEMENT_LATENCY,
        "Settlement submission to final status in milliseconds"
    );

    describe_counter!(METRIC_ENDPOINT_CONNECTS, "Successful endpoint connections");
    describe_counter!(METRIC_ENDPOINT_BACKOFFS, "Full endpoint rounds that failed");
    describe_counter!(METRIC_ENDPOINT_FAILOVERS, "Active endpoints dropped after a transport failure");
    describe_counter!(METRIC_ENDPOINT_PROBE_FAILURES, "Failed health probes");
    describe_counter!(METRIC_FEE_FALLBACKS, "Fee quotes built from the default fee");
    describe_counter!(METRIC_PRICE_QUERIES_SKIPPED, "Price queries that failed and were skipped");
    describe_counter!(METRIC_PRICE_CACHE_HITS, "Price queries served from cache");
    describe_counter!(
        METRIC_OPPORTUNITIES_DETECTED,
        "Total number of arbitrage opportunities detected"
    );
    describe_counter!(
        METRIC_OPPORTUNITIES_EXECUTED,
        "Total number of arbitrage opportunities submitted for settlement"
    );
    describe_counter!(
        METRIC_OPPORTUNITIES_INVALID,
        "Opportunities rejected by pre-submission checks"
    );
    describe_counter!(METRIC_EXECUTOR_BUSY, "Executions refused because one was in flight");
    describe_counter!(METRIC_SETTLEMENTS, "Settlement outcomes by status");
    describe_counter!(METRIC_LOOP_ERRORS, "Errors caught by the main loop");

    debug!("Metrics initialized");
}

/// Install the global Prometheus recorder and return its render handle.
pub fn install_prometheus() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    init_metrics();
    Ok(handle)
}

/// Record JSON-RPC request latency.
pub fn record_rpc_latency(start: Instant, method: &str) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_RPC_LATENCY, "method" => method.to_string()).record(latency_ms);
}

pub fn inc_endpoint_connects() {
    counter!(METRIC_ENDPOINT_CONNECTS).increment(1);
}

pub fn inc_endpoint_backoffs() {
    counter!(METRIC_ENDPOINT_BACKOFFS).increment(1);
}

pub fn inc_endpoint_failovers() {
    counter!(METRIC_ENDPOINT_FAILOVERS).increment(1);
}

pub fn inc_endpoint_probe_failures() {
    counter!(METRIC_ENDPOINT_PROBE_FAILURES).increment(1);
}

pub fn inc_fee_fallbacks() {
    counter!(METRIC_FEE_FALLBACKS).increment(1);
}

/// Increment skipped price queries, labelled by venue.
pub fn inc_price_queries_skipped(venue: &str) {
    counter!(METRIC_PRICE_QUERIES_SKIPPED, "venue" => venue.to_string()).increment(1);
}

pub fn inc_price_cache_hits() {
    counter!(METRIC_PRICE_CACHE_HITS).increment(1);
}

/// Increment opportunities detected counter.
pub fn inc_opportunities_detected(count: u64) {
    counter!(METRIC_OPPORTUNITIES_DETECTED).increment(count);
}

/// Increment opportunities executed counter.
pub fn inc_opportunities_executed() {
    counter!(METRIC_OPPORTUNITIES_EXECUTED).increment(1);
}

pub fn inc_opportunities_invalid() {
    counter!(METRIC_OPPORTUNITIES_INVALID).increment(1);
}

pub fn inc_executor_busy() {
    counter!(METRIC_EXECUTOR_BUSY).increment(1);
}

/// Increment settlement outcomes for `status` (success, failed, timeout).
pub fn inc_settlements(status: &str) {
    counter!(METRIC_SETTLEMENTS, "status" => status.to_string()).increment(1);
}

pub fn inc_loop_errors() {
    counter!(METRIC_LOOP_ERRORS).increment(1);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(self.metric_name).record(self.elapsed_ms());
    }
}

/// Create a latency timer for a fee query.
pub fn timer_fee_query() -> LatencyTimer {
    LatencyTimer::new(METRIC_FEE_QUERY_LATENCY)
}

/// Create a latency timer for opportunity detection.
pub fn timer_opportunity_detection() -> LatencyTimer {
    LatencyTimer::new(METRIC_OPPORTUNITY_DETECTION_LATENCY)
}

/// Create a latency timer for a settlement.
pub fn timer_settlement() -> LatencyTimer {
    LatencyTimer::new(METRIC_SETTLEMENT_LATENCY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn latency_timer_measures_time() {
        let timer = LatencyTimer::new("test_metric");
        sleep(Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 9.0);
    }

    #[test]
    fn counters_work_without_recorder() {
        inc_settlements("success");
        inc_price_queries_skipped("quickswap");
        inc_opportunities_detected(3);
        record_rpc_latency(Instant::now(), "eth_call");
    }
}
