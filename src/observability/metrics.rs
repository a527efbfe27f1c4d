//! Metrics collection and exposition.
//!
//! # Metrics
//! - `edge_requests_total` (counter): requests by site and status
//! - `edge_proxy_requests_total` (counter): proxied requests by mode and status
//! - `edge_proxy_duration_seconds` (histogram): time to response head by mode
//! - `edge_certificates_total` (counter): certificate lookups by outcome
//! - `edge_redirects_total` (counter): plaintext requests sent to HTTPS
//! - `edge_tunnels_active` (gauge): live tunnel sessions
//!
//! Recording is a no-op until an exporter is installed.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record a request answered by a virtual host.
pub fn record_request(site: &str, status: u16) {
    metrics::counter!(
        "edge_requests_total",
        "site" => site.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a proxied request.
pub fn record_proxy(mode: &'static str, status: u16, start: Instant) {
    metrics::counter!(
        "edge_proxy_requests_total",
        "mode" => mode,
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("edge_proxy_duration_seconds", "mode" => mode)
        .record(start.elapsed().as_secs_f64());
}

/// Record a certificate lookup outcome (`hit`, `disk`, `issued`, `rejected`, `failed`).
pub fn record_certificate(outcome: &'static str) {
    metrics::counter!("edge_certificates_total", "outcome" => outcome).increment(1);
}

/// Record a plaintext redirect.
pub fn record_redirect() {
    metrics::counter!("edge_redirects_total").increment(1);
}
