//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, backend
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_routing_decisions_total` (counter): by group, backend, affinity
//! - `gateway_backend_failovers_total` (counter): transport failures by backend
//! - `gateway_backend_health` (gauge): 1=healthy, 0=unhealthy
//! - `gateway_affinity_entries` (gauge): tracked queries
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exporter runs its own HTTP listener

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a finished client request.
pub fn record_request(method: &str, status: u16, backend: &str, start: Instant) {
    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "backend" => backend.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "backend" => backend.to_string())
        .record(start.elapsed().as_secs_f64());
}

/// Record where a request was routed.
pub fn record_routing_decision(group: &str, backend: &str, affinity: bool, elapsed: Duration) {
    counter!(
        "gateway_routing_decisions_total",
        "group" => group.to_string(),
        "backend" => backend.to_string(),
        "affinity" => affinity.to_string()
    )
    .increment(1);
    histogram!("gateway_routing_decision_seconds").record(elapsed.as_secs_f64());
}

/// Record a transport failure against a backend.
pub fn record_failover(backend: &str) {
    counter!("gateway_backend_failovers_total", "backend" => backend.to_string()).increment(1);
}

/// Record the health of a backend.
pub fn record_backend_health(backend: &str, healthy: bool) {
    gauge!("gateway_backend_health", "backend" => backend.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

/// Record the size of the affinity store.
pub fn record_affinity_size(entries: usize) {
    gauge!("gateway_affinity_entries").set(entries as f64);
}
