use anyhow::{Context as _, Result};
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

pub fn describe() {
    describe_counter!(
        "dashboard_api_requests_total",
        "Backend requests by endpoint and status class."
    );
    describe_histogram!(
        "dashboard_api_latency_ms",
        "Backend request latency in milliseconds."
    );
    describe_counter!(
        "dashboard_poll_cycles_total",
        "Poll cycles by view and outcome (applied, failed, stale, unmounted)."
    );
    describe_counter!(
        "dashboard_detail_fetches_total",
        "Token detail fetches by outcome."
    );
    describe_histogram!(
        "dashboard_kv_op_latency_ms",
        "Credential store operation latency in milliseconds."
    );
}

/// Installs the global recorder and serves `/metrics` on `port`. Must be
/// called inside a tokio runtime; the listener runs as a task on it.
pub fn install_prometheus(port: u16) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("failed to start prometheus exporter on {addr}"))
}
