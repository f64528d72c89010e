//! Metrics collection and exposition.
//!
//! # Metrics
//! - `bridge_dispatch_total` (counter): responses sent, by tier and status
//! - `bridge_dispatch_unavailable_total` (counter): events for stopped servers
//! - `bridge_handler_failures_total` (counter): handler errors and panics, by kind
//! - `bridge_error_handler_failures_total` (counter): error handlers that failed themselves
//! - `bridge_dispatch_duration_seconds` (histogram): dispatch to native send
//! - `bridge_active_servers` (gauge): registered servers
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed with [`init_metrics`].

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::http::Tier;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics recorder"),
    }
}

pub fn record_dispatch(tier: Tier, status: u16, started: Instant) {
    metrics::counter!(
        "bridge_dispatch_total",
        "tier" => tier.as_str(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("bridge_dispatch_duration_seconds").record(started.elapsed().as_secs_f64());
}

pub fn record_unavailable() {
    metrics::counter!("bridge_dispatch_unavailable_total").increment(1);
}

pub fn record_handler_failure(kind: &'static str) {
    metrics::counter!("bridge_handler_failures_total", "kind" => kind).increment(1);
}

pub fn record_error_handler_failure() {
    metrics::counter!("bridge_error_handler_failures_total").increment(1);
}

pub fn record_active_servers(count: usize) {
    metrics::gauge!("bridge_active_servers").set(count as f64);
}
