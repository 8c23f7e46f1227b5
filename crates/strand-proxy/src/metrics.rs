//! Prometheus metrics for strand-proxy.
//!
//! Tracks connection churn, hand-offs between pools, processing failures,
//! header scrubbing, and upstream latency.
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    /// Client connections accepted
    pub static ref CONNECTIONS_ACCEPTED_TOTAL: IntCounter = register_int_counter!(
        "strand_connections_accepted_total",
        "Total number of client connections accepted"
    )
    .unwrap();

    /// Client connections currently open
    pub static ref ACTIVE_CONNECTIONS: IntGauge = register_int_gauge!(
        "strand_active_connections",
        "Number of client connections currently open"
    )
    .unwrap();

    /// Requests answered, by method and status
    pub static ref REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "strand_requests_total",
        "Total number of requests answered by the proxy",
        &["method", "status"]
    )
    .unwrap();

    /// Processing hand-offs
    pub static ref HANDOFFS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "strand_handoffs_total",
        "Requests passed from the read stage to processing",
        &["mode"]  // mode: inline|separate
    )
    .unwrap();

    /// Processing failures
    pub static ref PROCESSING_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "strand_processing_failures_total",
        "Requests whose processing failed",
        &["stage"]  // stage: request_filter|response_filter|handoff|upstream
    )
    .unwrap();

    /// Trace headers removed on transparent connections
    pub static ref SCRUBBED_HEADERS: IntCounter = register_int_counter!(
        "strand_scrubbed_headers_total",
        "Trace propagation headers stripped from outbound requests"
    )
    .unwrap();

    /// Upstream exchange duration
    pub static ref UPSTREAM_REQUEST_DURATION_MS: HistogramVec = register_histogram_vec!(
        "strand_upstream_request_duration_ms",
        "Duration of upstream exchanges including connect",
        &["status"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Helper to record an answered request
pub fn record_request(method: &str, status: u16) {
    REQUESTS_TOTAL
        .with_label_values(&[method, &status.to_string()])
        .inc();
}

/// Helper to record a hand-off from the read stage
pub fn record_handoff(separate: bool) {
    let mode = if separate { "separate" } else { "inline" };
    HANDOFFS_TOTAL.with_label_values(&[mode]).inc();
}

/// Helper to record a processing failure
pub fn record_processing_failure(stage: &str) {
    PROCESSING_FAILURES_TOTAL.with_label_values(&[stage]).inc();
}

/// Helper to record upstream exchange duration
pub fn record_upstream_duration(status: u16, duration_ms: f64) {
    UPSTREAM_REQUEST_DURATION_MS
        .with_label_values(&[&status.to_string()])
        .observe(duration_ms);
}
