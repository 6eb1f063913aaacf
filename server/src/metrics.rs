//! Prometheus exporter and server-level metrics.
//!
//! ## Counters
//! - `closeout_request_timeouts_total{operation}` - Requests cut off at the request boundary
//!
//! Engine metrics are described by [`closeout_core::metrics::register_closeout_metrics`].

use crate::error::ServerError;
use metrics::describe_counter;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;

/// Register descriptions for every metric the server records.
pub fn register_metrics() {
    closeout_core::metrics::register_closeout_metrics();
    describe_counter!(
        "closeout_request_timeouts_total",
        "Requests that exceeded the configured timeout, by operation"
    );
}

/// Install the Prometheus recorder with an HTTP listener on `addr`.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns [`ServerError::Metrics`] if the recorder cannot be built or installed.
pub fn install_exporter(addr: SocketAddr) -> Result<(), ServerError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
        )
        .map_err(|e| ServerError::Metrics(e.to_string()))?
        .install()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;

    register_metrics();
    tracing::info!(addr = %addr, "Metrics exporter listening");
    Ok(())
}

pub(crate) fn record_timeout(operation: &'static str) {
    metrics::counter!("closeout_request_timeouts_total", "operation" => operation).increment(1);
}
