//! Metrics and observability utilities
//!
//! Provides Prometheus metrics for the request path, uploads, store writes
//! and simplifier runs, with standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Lexplain metrics
pub const METRICS_PREFIX: &str = "lexplain";

/// Histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001,  // 1ms
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Buckets for simplifier runs (process start-up dominates)
pub const SIMPLIFIER_BUCKETS: &[f64] = &[
    0.100,
    0.250,
    0.500,
    1.000,
    2.500,
    5.000,
    10.00,
    30.00,
    60.00,
    120.0,
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Upload metrics
    describe_counter!(
        format!("{}_uploads_total", METRICS_PREFIX),
        Unit::Count,
        "Total document uploads by outcome and persistence mode"
    );

    describe_counter!(
        format!("{}_upload_bytes_total", METRICS_PREFIX),
        Unit::Bytes,
        "Total bytes accepted by the upload endpoint"
    );

    // Store metrics
    describe_counter!(
        format!("{}_store_writes_total", METRICS_PREFIX),
        Unit::Count,
        "Document store writes by store, operation and outcome"
    );

    // Simplifier metrics
    describe_counter!(
        format!("{}_simplifications_total", METRICS_PREFIX),
        Unit::Count,
        "Total simplification runs by outcome"
    );

    describe_histogram!(
        format!("{}_simplification_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Simplifier process latency in seconds"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

fn outcome(success: bool) -> &'static str {
    if success { "success" } else { "error" }
}

/// Record an upload attempt; `mode` is the persistence mode that handled it
pub fn record_upload(bytes: u64, mode: &str, success: bool) {
    counter!(
        format!("{}_uploads_total", METRICS_PREFIX),
        "outcome" => outcome(success),
        "mode" => mode.to_string()
    )
    .increment(1);

    if success {
        counter!(format!("{}_upload_bytes_total", METRICS_PREFIX)).increment(bytes);
    }
}

/// Record a single write against one document store
pub fn record_store_write(store: &str, op: &str, success: bool) {
    counter!(
        format!("{}_store_writes_total", METRICS_PREFIX),
        "store" => store.to_string(),
        "op" => op.to_string(),
        "outcome" => outcome(success)
    )
    .increment(1);
}

/// Record a simplification run
pub fn record_simplification(duration_secs: f64, outcome: &str) {
    counter!(
        format!("{}_simplifications_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(format!("{}_simplification_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}
