//! Metrics implementation using Prometheus.
//!
//! The `record_*` helpers go through the `metrics` facade and are no-ops
//! until a recorder is installed.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use cowork_core::{Error, Result};

/// Initialize Prometheus recorder and return the handle.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::Config(format!("Failed to install Prometheus recorder: {}", e)))?;

    tracing::info!("Prometheus metrics recorder initialized");
    Ok(handle)
}

/// Count a finished plan step.
pub fn record_step(status: &str, latency_sec: f64) {
    metrics::counter!("plan_steps_total", "status" => status.to_string()).increment(1);
    metrics::histogram!("plan_step_duration_seconds", "status" => status.to_string())
        .record(latency_sec);
}

/// Count one agent iteration.
pub fn record_iteration(outcome: &str) {
    metrics::counter!("react_iterations_total", "outcome" => outcome.to_string()).increment(1);
}

/// Count one sandboxed execution.
pub fn record_sandbox(mode: &str, outcome: &str) {
    metrics::counter!(
        "sandbox_executions_total",
        "mode" => mode.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}
