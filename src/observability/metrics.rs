//! Metrics collection and exposition.
//!
//! # Metrics
//! - `worker_connections_total` (counter): connections served, by origin
//! - `worker_connections_active` (gauge): current connection count
//! - `worker_handoff_total` (counter): hand-off messages, by outcome
//! - `worker_readiness_transitions_total` (counter): terminal readiness states
//! - `worker_startup_duration_seconds` (histogram): process start to serving

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to start metrics endpoint"),
    }
}

pub fn record_connection_opened(origin: &'static str) {
    metrics::counter!("worker_connections_total", "origin" => origin).increment(1);
    metrics::gauge!("worker_connections_active").increment(1.0);
}

pub fn record_connection_closed() {
    metrics::gauge!("worker_connections_active").decrement(1.0);
}

pub fn record_handoff(outcome: &'static str) {
    metrics::counter!("worker_handoff_total", "outcome" => outcome).increment(1);
}

pub fn record_readiness(state: &'static str) {
    metrics::counter!("worker_readiness_transitions_total", "state" => state).increment(1);
}

pub fn record_startup_duration(elapsed: Duration) {
    metrics::histogram!("worker_startup_duration_seconds").record(elapsed.as_secs_f64());
}
