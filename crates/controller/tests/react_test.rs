//! ReAct loop integration tests.
//!
//! Drives the controller with a scripted reasoning service and a mock
//! sandbox, checking termination, confirmation and context behaviour.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use cowork_controller::{ReActController, StepDispatcher};
use cowork_core::{
    config::{AgentConfig, SandboxConfig},
    mocks::{CollectingProgressSink, MockLlm, ScriptedGate},
    traits::{ConfirmationGate, Controller},
    types::{AgentStatus, ConfirmationRequest, FailureReason},
    Error, ProgressStatus, Result,
};
use cowork_sandbox::{ExecResult, MockSandbox, SandboxExecutor};
use cowork_skills::DefaultToolRegistry;

// =============================================================================
// Helpers
// =============================================================================

fn shell(command: &str, description: &str) -> String {
    json!({
        "thought": format!("run {}", command),
        "is_complete": false,
        "action": {"tool": "shell", "args": {"command": command}, "description": description}
    })
    .to_string()
}

fn done(answer: &str) -> String {
    json!({"thought": "finished", "is_complete": true, "response": answer}).to_string()
}

struct Harness {
    llm: Arc<MockLlm>,
    sandbox: Arc<MockSandbox>,
    progress: Arc<CollectingProgressSink>,
    controller: ReActController,
}

async fn harness(
    responses: Vec<String>,
    exec: Vec<ExecResult>,
    config: AgentConfig,
    gate: Option<Arc<dyn ConfirmationGate>>,
) -> Harness {
    let llm = Arc::new(MockLlm::new(responses));
    let sandbox = Arc::new(MockSandbox::new(exec));
    let progress = Arc::new(CollectingProgressSink::new());
    let registry = Arc::new(DefaultToolRegistry::with_builtins().await.unwrap());
    let executor = SandboxExecutor::new(&SandboxConfig::default()).with_permissive(sandbox.clone());
    let dispatcher = Arc::new(StepDispatcher::new(registry).with_sandbox(Arc::new(executor)));

    let mut builder = ReActController::builder()
        .with_config(config)
        .with_llm(llm.clone())
        .with_dispatcher(dispatcher)
        .with_progress(progress.clone());
    if let Some(gate) = gate {
        builder = builder.with_confirmation_gate(gate);
    }

    Harness {
        llm,
        sandbox,
        progress,
        controller: builder.build().unwrap(),
    }
}

/// Cancels the run, then never answers.
struct CancellingGate {
    cancel: CancellationToken,
}

#[async_trait]
impl ConfirmationGate for CancellingGate {
    async fn confirm(&self, _request: &ConfirmationRequest) -> Result<bool> {
        self.cancel.cancel();
        std::future::pending::<()>().await;
        Ok(true)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_completes_in_one_iteration() {
    let h = harness(vec![done("You have 3 files")], vec![], AgentConfig::default(), None).await;

    let state = h.controller.run("count my files", CancellationToken::new()).await.unwrap();

    assert_eq!(state.status, AgentStatus::Completed);
    assert_eq!(state.final_answer.as_deref(), Some("You have 3 files"));
    assert_eq!(state.iteration, 1);
    assert!(state.steps.is_empty());
    assert_eq!(h.llm.call_count(), 1);

    let events = h.progress.events_for("iteration-1");
    assert_eq!(events.first().map(|e| e.status), Some(ProgressStatus::Running));
    assert_eq!(events.last().map(|e| e.status), Some(ProgressStatus::Success));
}

#[tokio::test]
async fn test_iteration_cap_is_exact() {
    let config = AgentConfig {
        max_iterations: 4,
        max_consecutive_failures: 100,
        ..Default::default()
    };
    let h = harness(
        vec![json!({
            "thought": "keep going",
            "is_complete": false,
            "action": {"tool": "echo", "args": {"message": "again"}}
        })
        .to_string()],
        vec![],
        config,
        None,
    )
    .await;

    let state = h.controller.run("never ends", CancellationToken::new()).await.unwrap();

    assert_eq!(h.llm.call_count(), 4);
    assert_eq!(state.status, AgentStatus::Failed);
    assert_eq!(state.failure, Some(FailureReason::IterationLimit(4)));
    assert_eq!(state.steps.len(), 4);
    assert!(matches!(state.into_result(), Err(Error::IterationLimitExceeded(4))));
}

#[tokio::test]
async fn test_observation_recorded_in_history_and_prompt() {
    let h = harness(
        vec![shell("ls ~/Downloads", "List downloads"), done("listed")],
        vec![ExecResult::ok("a.jpg\nb.pdf\n")],
        AgentConfig::default(),
        None,
    )
    .await;

    let state = h.controller.run("what is in downloads", CancellationToken::new()).await.unwrap();

    assert_eq!(state.status, AgentStatus::Completed);
    assert_eq!(state.steps.len(), 1);
    let step = &state.steps[0];
    assert!(step.success);
    assert_eq!(step.observation, "a.jpg\nb.pdf");
    assert_eq!(step.context_key, "list_downloads_1");

    // The second decision sees the observation and the stored key.
    let calls = h.llm.calls();
    let prompt = &calls[1][1].content;
    assert!(prompt.contains("a.jpg"));
    assert!(prompt.contains("CONTEXT: list_downloads_1"));
    assert!(prompt.contains("STEP 2/15"));
}

#[tokio::test]
async fn test_declined_deletion_is_an_observation() {
    let gate = Arc::new(ScriptedGate::new(false));
    let h = harness(
        vec![shell("rm notes.txt", "Delete notes"), done("left the file alone")],
        vec![],
        AgentConfig::default(),
        Some(gate.clone()),
    )
    .await;

    let state = h.controller.run("delete my notes", CancellationToken::new()).await.unwrap();

    assert_eq!(state.status, AgentStatus::Completed);
    let requests = gate.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].command.as_deref(), Some("rm notes.txt"));
    assert!(requests[0].message.contains("notes.txt"));

    let step = &state.steps[0];
    assert!(!step.success);
    assert!(step.observation.contains("declined"));
    assert_eq!(state.consecutive_failures, 0);
    // Nothing ran.
    assert!(h.sandbox.commands.lock().await.is_empty());
}

#[tokio::test]
async fn test_approved_deletion_runs() {
    let gate = Arc::new(ScriptedGate::new(true));
    let h = harness(
        vec![shell("rm notes.txt", "Delete notes"), done("deleted")],
        vec![ExecResult::ok("")],
        AgentConfig::default(),
        Some(gate.clone()),
    )
    .await;

    let state = h.controller.run("delete my notes", CancellationToken::new()).await.unwrap();

    assert_eq!(gate.requests().len(), 1);
    assert_eq!(h.sandbox.commands.lock().await.len(), 1);
    assert!(state.steps[0].success);
}

#[tokio::test]
async fn test_blocked_command_never_asks() {
    let gate = Arc::new(ScriptedGate::new(true));
    let h = harness(
        vec![shell("sudo reboot", "Restart"), done("cannot restart")],
        vec![],
        AgentConfig::default(),
        Some(gate.clone()),
    )
    .await;

    let state = h.controller.run("restart the machine", CancellationToken::new()).await.unwrap();

    assert!(gate.requests().is_empty());
    assert!(state.steps[0].observation.starts_with("BLOCKED"));
    assert!(h.sandbox.commands.lock().await.is_empty());
    assert_eq!(state.status, AgentStatus::Completed);
}

#[tokio::test]
async fn test_consecutive_failures_stop_the_run() {
    let failing = ExecResult {
        exit_code: 2,
        stderr: "ls: cannot access 'nowhere'".to_string(),
        ..Default::default()
    };
    let config = AgentConfig {
        max_consecutive_failures: 2,
        ..Default::default()
    };
    let h = harness(
        vec![
            shell("ls nowhere", "List"),
            shell("ls elsewhere", "List"),
            done("unreachable"),
        ],
        vec![failing.clone(), failing],
        config,
        None,
    )
    .await;

    let state = h.controller.run("find it", CancellationToken::new()).await.unwrap();

    assert_eq!(state.status, AgentStatus::Failed);
    assert_eq!(state.failure, Some(FailureReason::ConsecutiveFailures(2)));
    assert_eq!(h.llm.call_count(), 2);
    assert!(state.steps.iter().all(|s| s.observation.starts_with("Error")));
}

#[tokio::test]
async fn test_repeated_command_completes_with_summary() {
    let h = harness(
        vec![
            shell("ls ~", "List home"),
            shell("ls ~", "List home"),
            shell("ls ~", "List home"),
        ],
        vec![ExecResult::ok("docs\n"), ExecResult::ok("docs\n")],
        AgentConfig::default(),
        None,
    )
    .await;

    let state = h.controller.run("look around", CancellationToken::new()).await.unwrap();

    assert_eq!(state.status, AgentStatus::Completed);
    assert_eq!(state.completion_reason.as_deref(), Some("repeated_action"));
    assert_eq!(state.steps.len(), 2);
    assert_eq!(h.sandbox.commands.lock().await.len(), 2);
    assert!(state.final_answer.unwrap_or_default().contains("docs"));
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let h = harness(vec![done("x")], vec![], AgentConfig::default(), None).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let state = h.controller.run("anything", cancel).await.unwrap();

    assert_eq!(state.status, AgentStatus::Cancelled);
    assert_eq!(h.llm.call_count(), 0);
    assert!(matches!(state.into_result(), Err(Error::Cancelled(_))));
}

#[tokio::test]
async fn test_cancelled_while_awaiting_confirmation() {
    let cancel = CancellationToken::new();
    let gate = Arc::new(CancellingGate {
        cancel: cancel.clone(),
    });
    let h = harness(
        vec![shell("rm -rf build", "Clean build")],
        vec![],
        AgentConfig::default(),
        Some(gate),
    )
    .await;

    let state = h.controller.run("clean up", cancel).await.unwrap();

    assert_eq!(state.status, AgentStatus::Cancelled);
    assert!(state.steps.is_empty());
    assert!(h.sandbox.commands.lock().await.is_empty());
}

#[tokio::test]
async fn test_unparseable_decision_fails_run() {
    let h = harness(
        vec!["I would like to list the files.".to_string()],
        vec![],
        AgentConfig::default(),
        None,
    )
    .await;

    let state = h.controller.run("list files", CancellationToken::new()).await.unwrap();

    assert_eq!(state.status, AgentStatus::Failed);
    assert!(matches!(state.failure, Some(FailureReason::Decision(_))));
}

#[tokio::test]
async fn test_builder_requires_llm() {
    let err = ReActController::builder().build().err();
    assert!(matches!(err, Some(Error::Config(_))));
}
