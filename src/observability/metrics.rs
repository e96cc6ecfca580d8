//! Metrics collection and exposition.
//!
//! # Metrics
//! - `balancer_selections_total` (counter): successful selections by strategy
//! - `balancer_no_backend_total` (counter): selections that found nothing
//! - `balancer_backend_health` (gauge): 1=enabled, 0=disabled
//! - `balancer_backend_connections` (gauge): in-flight connections

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with an HTTP listener on `addr`.
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_selection(strategy: &str) {
    counter!("balancer_selections_total", "strategy" => strategy.to_string()).increment(1);
}

pub fn record_no_backend(strategy: &str) {
    counter!("balancer_no_backend_total", "strategy" => strategy.to_string()).increment(1);
}

pub fn record_backend_health(backend: &str, healthy: bool) {
    gauge!("balancer_backend_health", "backend" => backend.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_connections(backend: &str, count: usize) {
    gauge!("balancer_backend_connections", "backend" => backend.to_string()).set(count as f64);
}
