//! Metrics collection and exposition.
//!
//! # Metrics
//! - `mcp_requests_total` (counter): requests by workload, method, status
//! - `mcp_request_duration_seconds` (histogram): latency by workload
//! - `mcp_backend_errors_total` (counter): failed backend calls by workload, kind
//! - `mcp_bridged_messages_total` (counter): stdio messages by workload, direction
//! - `mcp_active_sessions` (gauge): open client streams by workload
//! - `mcp_rate_limited_total` (counter): rejections by workload
//! - `mcp_auth_rejections_total` (counter): rejections by reason
//! - `mcp_workload_events_total` (counter): lifecycle events by event

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to build Prometheus exporter: {0}")]
    Build(#[from] metrics_exporter_prometheus::BuildError),

    #[error("a global metrics recorder is already installed")]
    AlreadyInstalled,
}

/// Install the global recorder, optionally serving it on `listen`.
///
/// The returned handle renders the same registry for per-transport `/metrics`.
pub fn install(listen: Option<SocketAddr>) -> Result<PrometheusHandle, MetricsError> {
    let Some(addr) = listen else {
        return PrometheusBuilder::new()
            .install_recorder()
            .map_err(MetricsError::from);
    };

    let (recorder, exporter) = PrometheusBuilder::new().with_http_listener(addr).build()?;
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder).map_err(|_| MetricsError::AlreadyInstalled)?;

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            tracing::error!(error = ?e, "Metrics exporter stopped");
        }
    });
    tracing::info!(address = %addr, "Metrics exporter listening");

    Ok(handle)
}

/// A recorder that is not installed globally, for tests and embedding.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

pub fn record_request(workload: &str, method: &str, status: u16, started: Instant) {
    counter!(
        "mcp_requests_total",
        "workload" => workload.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("mcp_request_duration_seconds", "workload" => workload.to_string())
        .record(started.elapsed().as_secs_f64());
}

pub fn record_backend_error(workload: &str, kind: &'static str) {
    counter!("mcp_backend_errors_total", "workload" => workload.to_string(), "kind" => kind)
        .increment(1);
}

pub fn record_bridged_message(workload: &str, direction: &'static str) {
    counter!(
        "mcp_bridged_messages_total",
        "workload" => workload.to_string(),
        "direction" => direction
    )
    .increment(1);
}

pub fn set_active_sessions(workload: &str, count: usize) {
    gauge!("mcp_active_sessions", "workload" => workload.to_string()).set(count as f64);
}

pub fn record_rate_limited(workload: &str) {
    counter!("mcp_rate_limited_total", "workload" => workload.to_string()).increment(1);
}

pub fn record_auth_rejection(reason: &'static str) {
    counter!("mcp_auth_rejections_total", "reason" => reason).increment(1);
}

pub fn record_workload_event(event: &'static str) {
    counter!("mcp_workload_events_total", "event" => event).increment(1);
}
