//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define multiplexer metrics (requests, latency, rate limiting)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `mux_requests_total` (counter): requests by method, status
//! - `mux_request_duration_seconds` (histogram): latency distribution
//! - `mux_rate_limited_total` (counter): rejected claims by policy
//! - `mux_rate_limit_keys` (gauge): keys tracked by a policy
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   exporter every call is a no-op
//! - Labels stay low-cardinality: no paths, no keys

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus exporter with an HTTP listener on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    describe_counter!("mux_requests_total", "Requests handled by the multiplexer");
    describe_histogram!(
        "mux_request_duration_seconds",
        metrics::Unit::Seconds,
        "Time from dispatch to the last body byte"
    );
    describe_counter!("mux_rate_limited_total", "Requests rejected by a rate-limit policy");
    describe_gauge!("mux_rate_limit_keys", "Keys currently tracked by a rate-limit policy");

    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "mux_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("mux_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(policy: &str) {
    counter!("mux_rate_limited_total", "policy" => policy.to_string()).increment(1);
}

pub fn record_tracked_keys(policy: &str, keys: usize) {
    gauge!("mux_rate_limit_keys", "policy" => policy.to_string()).set(keys as f64);
}
