//! Plan executor.
//!
//! Runs a validated plan wave by wave. A wave is every step whose
//! dependencies all have a recorded result; its members run concurrently and
//! the next wave is only computed once all of them have finished.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use cowork_core::{
    events::{ProgressEvent, ProgressStatus},
    traits::{NoOpProgressSink, ProgressSink},
    types::{FailureKind, Plan, RunSummary, Step, StepResult, StepStatus},
    ContextStore, Result,
};

use crate::executor::StepDispatcher;

/// Everything produced by one plan run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
    /// Exactly one result per step.
    pub results: HashMap<String, StepResult>,
    /// Step ids in the order their results were recorded.
    pub order: Vec<String>,
    /// Step ids grouped by wave, each wave in plan order.
    pub waves: Vec<Vec<String>>,
    /// Final context contents.
    pub context: Map<String, Value>,
    /// Whether the run was cancelled before every step started.
    pub cancelled: bool,
}

impl ExecutionReport {
    pub fn summary(&self) -> RunSummary {
        RunSummary::from_results(self.results.values())
    }

    pub fn result(&self, step_id: &str) -> Option<&StepResult> {
        self.results.get(step_id)
    }
}

/// Wave-based plan executor.
pub struct PlanExecutor {
    dispatcher: Arc<StepDispatcher>,
    progress: Arc<dyn ProgressSink>,
    parallel: bool,
}

impl PlanExecutor {
    /// Parallel executor without progress reporting.
    pub fn new(dispatcher: Arc<StepDispatcher>) -> Self {
        Self {
            dispatcher,
            progress: Arc::new(NoOpProgressSink),
            parallel: true,
        }
    }

    /// Run each wave's steps one at a time when `false`.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Execute a plan to completion.
    pub async fn execute(&self, plan: &Plan) -> Result<ExecutionReport> {
        self.execute_with_cancel(plan, CancellationToken::new()).await
    }

    /// Execute a plan, stopping before the next wave once `cancel` fires.
    ///
    /// Steps already running finish; steps not yet started are skipped.
    pub async fn execute_with_cancel(
        &self,
        plan: &Plan,
        cancel: CancellationToken,
    ) -> Result<ExecutionReport> {
        plan.validate()?;

        tracing::info!(steps = plan.steps.len(), parallel = self.parallel, "Executing plan");

        for step in &plan.steps {
            self.emit(&step.id, ProgressStatus::Pending, step.label()).await;
        }

        let context = ContextStore::new();
        let plan_ids: Arc<HashSet<String>> =
            Arc::new(plan.steps.iter().map(|s| s.id.clone()).collect());
        let mut report = ExecutionReport::default();

        loop {
            let ready: Vec<&Step> = plan
                .steps
                .iter()
                .filter(|s| !report.results.contains_key(&s.id))
                .filter(|s| s.depends_on.iter().all(|d| report.results.contains_key(d)))
                .collect();
            if ready.is_empty() {
                break;
            }

            if cancel.is_cancelled() {
                self.cancel_remaining(plan, &mut report).await;
                break;
            }

            let wave_number = report.waves.len() + 1;
            report.waves.push(ready.iter().map(|s| s.id.clone()).collect());

            let mut runnable = Vec::new();
            for step in ready {
                match failed_dependency(step, &report.results) {
                    Some(dep) => {
                        tracing::warn!(step_id = %step.id, dependency = %dep, "Skipping step");
                        let result = StepResult::skipped(
                            &step.id,
                            FailureKind::Dependency,
                            format!("dependency '{}' did not succeed", dep),
                        );
                        self.record(step, result, 0.0, &context, &mut report).await;
                    }
                    None => runnable.push(step),
                }
            }

            tracing::info!(wave = wave_number, steps = runnable.len(), "Starting wave");

            if self.parallel && runnable.len() > 1 {
                self.run_concurrently(runnable, &context, &plan_ids, &mut report)
                    .await;
            } else {
                for step in runnable {
                    if cancel.is_cancelled() {
                        break;
                    }
                    self.emit(&step.id, ProgressStatus::Running, step.label()).await;
                    let started = Instant::now();
                    let result = self.dispatcher.execute_step(step, &context, &plan_ids).await;
                    self.record(step, result, started.elapsed().as_secs_f64(), &context, &mut report)
                        .await;
                }
            }

            tracing::info!(wave = wave_number, "Wave finished");
        }

        report.context = context.snapshot();
        tracing::info!(summary = %report.summary(), cancelled = report.cancelled, "Plan finished");
        Ok(report)
    }

    async fn run_concurrently(
        &self,
        steps: Vec<&Step>,
        context: &ContextStore,
        plan_ids: &Arc<HashSet<String>>,
        report: &mut ExecutionReport,
    ) {
        let mut handles = Vec::with_capacity(steps.len());
        for step in &steps {
            self.emit(&step.id, ProgressStatus::Running, step.label()).await;

            let dispatcher = self.dispatcher.clone();
            let context = context.clone();
            let plan_ids = plan_ids.clone();
            let step_owned = (*step).clone();
            handles.push(tokio::spawn(async move {
                let started = Instant::now();
                let result = dispatcher.execute_step(&step_owned, &context, &plan_ids).await;
                (result, started.elapsed().as_secs_f64())
            }));
        }

        // Join barrier: the wave is done only when every member has resolved.
        for (step, handle) in steps.into_iter().zip(handles) {
            let (result, elapsed) = match handle.await {
                Ok(done) => done,
                Err(e) => {
                    tracing::error!(step_id = %step.id, error = %e, "Step task failed");
                    (
                        StepResult::error(&step.id, FailureKind::Capability, format!("step task failed: {}", e)),
                        0.0,
                    )
                }
            };
            self.record(step, result, elapsed, context, report).await;
        }
    }

    async fn record(
        &self,
        step: &Step,
        result: StepResult,
        elapsed: f64,
        context: &ContextStore,
        report: &mut ExecutionReport,
    ) {
        match result.status {
            StepStatus::Success => {
                tracing::info!(step_id = %step.id, elapsed_secs = elapsed, "Step succeeded");
                if let Some(output) = &result.output {
                    if let Err(e) = context.put(&step.id, output.clone()) {
                        tracing::warn!(step_id = %step.id, error = %e, "Context write rejected");
                    }
                }
            }
            StepStatus::Error => tracing::warn!(
                step_id = %step.id,
                error = result.error.as_deref().unwrap_or_default(),
                "Step failed"
            ),
            StepStatus::Skipped => {}
        }

        cowork_governance::record_step(&result.status.to_string(), elapsed);

        let description = match (&result.status, &result.error) {
            (StepStatus::Success, _) | (_, None) => step.label(),
            (_, Some(err)) => format!("{}: {}", step.label(), err),
        };
        self.emit(&step.id, result.status.into(), description).await;

        report.order.push(step.id.clone());
        report.results.insert(step.id.clone(), result);
    }

    async fn cancel_remaining(&self, plan: &Plan, report: &mut ExecutionReport) {
        tracing::warn!("Plan run cancelled");
        report.cancelled = true;
        for step in &plan.steps {
            if report.results.contains_key(&step.id) {
                continue;
            }
            self.emit(&step.id, ProgressStatus::Skipped, format!("{}: cancelled", step.label()))
                .await;
            report.order.push(step.id.clone());
            report.results.insert(
                step.id.clone(),
                StepResult::skipped(&step.id, FailureKind::Cancelled, "run cancelled"),
            );
        }
    }

    async fn emit(&self, id: &str, status: ProgressStatus, description: String) {
        self.progress
            .emit(ProgressEvent::new(id, status, description))
            .await;
    }
}

/// First dependency without a successful result.
fn failed_dependency<'a>(step: &'a Step, results: &HashMap<String, StepResult>) -> Option<&'a str> {
    step.depends_on
        .iter()
        .find(|d| results.get(*d).map_or(true, |r| !r.is_success()))
        .map(String::as_str)
}
