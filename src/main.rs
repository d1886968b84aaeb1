#![deny(unused)]
//! cowork - local task-execution engine.
//!
//! Runs a plan file (JSON or YAML) through the wave scheduler, with
//! `python`/`shell` steps in a sandbox and everything else dispatched to
//! the capability registry.
//!
//! ```text
//! cowork <plan.yaml|plan.json>
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use cowork_controller::{PlanExecutor, StepDispatcher};
use cowork_core::{
    traits::ChannelProgressSink,
    types::{Plan, SandboxMode},
    EngineConfig, ProgressStatus,
};
use cowork_sandbox::{DockerSandbox, ProcessSandbox, SandboxEngine, SandboxExecutor};
use cowork_skills::DefaultToolRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = EngineConfig::load().context("failed to load configuration")?;
    cowork_governance::configure_tracing(config.logging.json)?;

    tracing::info!("Starting cowork v{}", env!("CARGO_PKG_VERSION"));

    let metrics = if std::env::var("COWORK_METRICS").as_deref() == Ok("1") {
        tracing::info!("Prometheus recorder installed");
        Some(cowork_governance::setup_metrics_recorder()?)
    } else {
        None
    };

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: cowork <plan file>")?;
    let plan = Plan::from_file(&path)
        .with_context(|| format!("cannot load plan from {}", path.display()))?;
    tracing::info!(path = %path.display(), steps = plan.steps.len(), "Plan loaded");

    // =========================================================================
    // Capabilities and sandbox
    // =========================================================================
    let registry = Arc::new(DefaultToolRegistry::with_builtins().await?);
    let sandbox = Arc::new(build_sandbox(&config).await?);

    let dispatcher = Arc::new(StepDispatcher::from_config(registry, &config).with_sandbox(sandbox));

    // =========================================================================
    // Progress and cancellation
    // =========================================================================
    let (sink, mut events) = ChannelProgressSink::new();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event.status {
                ProgressStatus::Error => {
                    tracing::warn!(step_id = %event.id, "{}", event.description)
                }
                status => {
                    tracing::info!(step_id = %event.id, status = %status, "{}", event.description)
                }
            }
        }
    });

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling remaining steps");
            on_signal.cancel();
        }
    });

    let executor = PlanExecutor::new(dispatcher)
        .with_parallel(config.executor.parallel)
        .with_progress(Arc::new(sink));
    let report = executor.execute_with_cancel(&plan, cancel).await?;
    drop(executor);
    let _ = printer.await;

    // =========================================================================
    // Report
    // =========================================================================
    if plan.is_chat() {
        if let Some(output) = plan.steps.first().and_then(|s| report.result(&s.id)) {
            if let Some(serde_json::Value::String(answer)) = &output.output {
                println!("{}", answer);
                return Ok(());
            }
        }
    }

    for id in &report.order {
        if let Some(result) = report.result(id) {
            match &result.error {
                Some(error) => println!("{:<24} {:<8} {}", id, result.status, error),
                None => println!("{:<24} {}", id, result.status),
            }
        }
    }
    println!("{}", report.summary());
    if report.cancelled {
        println!("Run was cancelled.");
    }
    if let Some(handle) = metrics {
        eprintln!("{}", handle.render());
    }

    if report.summary().all_succeeded() {
        Ok(())
    } else {
        std::process::exit(1)
    }
}

/// Docker when reachable, the host otherwise.
async fn build_sandbox(config: &EngineConfig) -> anyhow::Result<SandboxExecutor> {
    let executor = SandboxExecutor::new(&config.sandbox);
    let permissive = Arc::new(ProcessSandbox::new());

    if config.sandbox.mode()? == SandboxMode::Permissive {
        tracing::warn!("Sandbox mode is permissive: filesystem and network are not isolated");
        return Ok(executor.with_permissive(permissive));
    }

    match DockerSandbox::new() {
        Ok(docker) if docker.is_available().await => {
            tracing::info!(image = %config.sandbox.image, "Docker sandbox available");
            Ok(executor
                .with_isolated(Arc::new(docker))
                .with_permissive(permissive))
        }
        Ok(_) => {
            tracing::warn!("Docker daemon not reachable, falling back to the permissive sandbox");
            Ok(executor.with_permissive(permissive))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Docker unavailable, falling back to the permissive sandbox");
            Ok(executor.with_permissive(permissive))
        }
    }
}
