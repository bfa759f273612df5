//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, route
//! - `proxy_request_duration_seconds` (histogram): time to response headers
//! - `proxy_rejected_total` (counter): requests refused for lack of a slot
//! - `proxy_websocket_sessions` (gauge): live bridge sessions
//!
//! Recording is a no-op until a recorder is installed, so tests and
//! embedders pay nothing unless they call [`init_metrics`].

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record a completed dispatch.
pub fn record_request(method: &str, status: u16, route: &'static str, start: Instant) {
    counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "route" => route
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds", "route" => route)
        .record(start.elapsed().as_secs_f64());
}

/// Record a request rejected because the slot pool was full.
pub fn record_rejected() {
    counter!("proxy_rejected_total").increment(1);
}

pub fn session_opened() {
    gauge!("proxy_websocket_sessions").increment(1.0);
}

pub fn session_closed() {
    gauge!("proxy_websocket_sessions").decrement(1.0);
}
