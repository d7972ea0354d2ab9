//! Metrics module
//!
//! Prometheus metrics for uploads and object store writes.

pub mod server;

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec, Counter,
    CounterVec, Histogram, HistogramVec,
};
use std::time::Duration;

lazy_static! {
    // Upload metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "formdrop_uploads_total",
        "Total number of upload requests",
        &["endpoint", "status"]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "formdrop_upload_bytes_total",
        "Total bytes written to the object store"
    ).unwrap();

    pub static ref UPLOAD_DURATION: HistogramVec = register_histogram_vec!(
        "formdrop_upload_duration_seconds",
        "Upload request duration in seconds",
        &["endpoint"],
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
    ).unwrap();

    // Multipart metrics
    pub static ref MULTIPART_UPLOADS: CounterVec = register_counter_vec!(
        "formdrop_multipart_uploads_total",
        "Total S3 multipart uploads",
        &["status"]
    ).unwrap();

    pub static ref MULTIPART_PARTS: Histogram = register_histogram!(
        "formdrop_multipart_parts",
        "Number of parts per multipart upload",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "formdrop_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

/// Record a finished upload request
pub fn record_upload(endpoint: &str, status: &str, bytes: u64, duration: Duration) {
    UPLOADS_TOTAL.with_label_values(&[endpoint, status]).inc();
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
    UPLOAD_DURATION
        .with_label_values(&[endpoint])
        .observe(duration.as_secs_f64());
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Record a completed multipart upload
pub fn record_multipart_upload_success(parts_count: usize) {
    MULTIPART_UPLOADS.with_label_values(&["success"]).inc();
    MULTIPART_PARTS.observe(parts_count as f64);
}

/// Record an aborted multipart upload
pub fn record_multipart_upload_failure() {
    MULTIPART_UPLOADS.with_label_values(&["failure"]).inc();
}
