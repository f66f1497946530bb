//! Metrics module
//!
//! Provides Prometheus metrics for the relay pipeline.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Encoder,
    Histogram, TextEncoder,
};

lazy_static! {
    // Relay metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "relay_uploads_total",
        "Total number of relay attempts",
        &["status"]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "relay_upload_bytes_total",
        "Total bytes relayed to the backend"
    ).unwrap();

    pub static ref UPLOAD_DURATION: Histogram = register_histogram!(
        "relay_upload_duration_seconds",
        "Relay duration in seconds, backend call included",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
    ).unwrap();

    // History metrics
    pub static ref HISTORY_RECORDS_TOTAL: Counter = register_counter!(
        "relay_history_records_total",
        "History records written"
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "relay_errors_total",
        "Total errors",
        &["kind"]
    ).unwrap();
}

/// Record a successful relay
pub fn record_upload_success(bytes: u64) {
    UPLOADS_TOTAL.with_label_values(&["success"]).inc();
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record a failed relay
pub fn record_upload_failure() {
    UPLOADS_TOTAL.with_label_values(&["failure"]).inc();
}

/// Record relay duration
pub fn record_upload_duration(duration_secs: f64) {
    UPLOAD_DURATION.observe(duration_secs);
}

/// Record a persisted history record
pub fn record_history_append() {
    HISTORY_RECORDS_TOTAL.inc();
}

/// Record an error
pub fn record_error(kind: &str) {
    ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

/// Render the default registry in Prometheus text format
///
/// Returns the content type together with the encoded body.
pub fn render() -> Result<(String, Vec<u8>), prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((encoder.format_type().to_string(), buffer))
}
