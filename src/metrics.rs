//! Prometheus metrics for the request pipeline.
//!
//! Exposed by a dedicated HTTP listener when `METRICS_PORT` is non-zero.
//! Recording functions are safe to call before (or without) initialization;
//! the `metrics` facade drops samples when no recorder is installed.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `pipeline_requests_total` - Requests logged (labels: method, status)
//! - `pipeline_admission_rejected_total` - Requests rejected by the rate limiter (label: operation)
//! - `pipeline_panics_recovered_total` - Panics caught by the recover layer
//! - `pipeline_buckets_evicted_total` - Rate limit buckets removed by a sweep
//!
//! ## Histograms
//! - `pipeline_request_duration_seconds` - Request duration (labels: method, status)

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "pipeline_requests_total";
    pub const REQUEST_DURATION_SECONDS: &str = "pipeline_request_duration_seconds";
    pub const ADMISSION_REJECTED_TOTAL: &str = "pipeline_admission_rejected_total";
    pub const PANICS_RECOVERED_TOTAL: &str = "pipeline_panics_recovered_total";
    pub const BUCKETS_EVICTED_TOTAL: &str = "pipeline_buckets_evicted_total";
}

/// Install the Prometheus exporter listening on `metrics_addr`.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(names::REQUESTS_TOTAL, "Total number of HTTP requests handled");
    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(
        names::ADMISSION_REJECTED_TOTAL,
        "Total number of requests rejected by the rate limiter"
    );
    describe_counter!(
        names::PANICS_RECOVERED_TOTAL,
        "Total number of handler panics recovered"
    );
    describe_counter!(
        names::BUCKETS_EVICTED_TOTAL,
        "Total number of rate limit buckets evicted"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Record one completed request.
pub fn record_request(method: &str, status: u16, duration: Duration) {
    let status = status.to_string();
    counter!(names::REQUESTS_TOTAL, "method" => method.to_string(), "status" => status.clone())
        .increment(1);
    histogram!(names::REQUEST_DURATION_SECONDS, "method" => method.to_string(), "status" => status)
        .record(duration.as_secs_f64());
}

pub fn record_admission_rejected(operation: &str) {
    counter!(names::ADMISSION_REJECTED_TOTAL, "operation" => operation.to_string()).increment(1);
}

pub fn record_panic_recovered() {
    counter!(names::PANICS_RECOVERED_TOTAL).increment(1);
}

pub fn record_buckets_evicted(count: usize) {
    if count > 0 {
        counter!(names::BUCKETS_EVICTED_TOTAL).increment(count as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Recording without an installed recorder must not panic.

    #[test]
    fn test_record_request() {
        record_request("GET", 200, Duration::from_millis(12));
    }

    #[test]
    fn test_record_admission_rejected() {
        record_admission_rejected("GET:/me");
    }

    #[test]
    fn test_record_panic_and_eviction() {
        record_panic_recovered();
        record_buckets_evicted(0);
        record_buckets_evicted(3);
    }
}
