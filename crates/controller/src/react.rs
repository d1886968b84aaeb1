//! ReAct loop implementation.
//!
//! ReAct (Reason + Act) drives a free-text request one decision at a time:
//! 1. Ask the reasoning service for exactly one next decision
//! 2. Gate destructive actions behind confirmation
//! 3. Execute the action through the dispatcher
//! 4. Record the observation in history and in the context store
//! 5. Repeat until completion, failure, the iteration cap or cancellation

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use cowork_core::{
    config::AgentConfig,
    events::{ProgressEvent, ProgressStatus},
    traits::{ChatMessage, ConfirmationGate, Controller, LlmClient, ProgressSink},
    types::{
        AgentAction, AgentState, AgentStatus, AgentStep, ConfirmationRequest, Decision,
        FailureKind, FailureReason,
    },
    ContextStore, Result,
};
use cowork_governance::{confirmation_request, DangerLevel, SafetyAnalyzer};

use crate::executor::{sanitize_error, StepDispatcher, PYTHON_ACTION, SHELL_ACTION};
use crate::parser::DecisionParser;

/// How many recent iterations are searched for a repeated command.
const REPEAT_WINDOW: usize = 6;
/// How many earlier identical commands end the run.
const REPEAT_LIMIT: usize = 2;

const SYSTEM_PROMPT: &str = r#"You complete the user's request one action at a time.

Reply with JSON only, in exactly one of these shapes:
{"thought": "...", "is_complete": false, "action": {"tool": "<capability>", "args": {...}, "description": "short summary"}}
{"thought": "...", "is_complete": true, "response": "final answer for the user"}

`shell` runs a command (arg `command`), `python` runs code (arg `code`).
Earlier results are available to code under the context names listed below.
Destructive operations ask the user for confirmation."#;

/// Result of one Acting phase.
enum ActOutcome {
    Succeeded { observation: String, value: Value },
    Failed { observation: String, error: String },
    /// Refused by safety policy or declined by the user.
    Declined { observation: String },
    /// Cancelled while waiting for confirmation.
    Cancelled,
}

/// ReAct controller for free-text requests.
pub struct ReActController {
    pub(crate) config: AgentConfig,
    pub(crate) llm: Arc<dyn LlmClient>,
    pub(crate) dispatcher: Arc<StepDispatcher>,
    pub(crate) gate: Option<Arc<dyn ConfirmationGate>>,
    pub(crate) progress: Arc<dyn ProgressSink>,
    pub(crate) parser: DecisionParser,
}

impl ReActController {
    /// Create a new builder for ReActController.
    pub fn builder() -> crate::builder::ReActBuilder {
        crate::builder::ReActBuilder::new()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    async fn run_loop(
        &self,
        state: &mut AgentState,
        context: &ContextStore,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let tools = self.dispatcher.registry().list().await?;

        loop {
            if cancel.is_cancelled() {
                tracing::warn!(iteration = state.iteration, "Agent run cancelled");
                state.status = AgentStatus::Cancelled;
                cowork_governance::record_iteration("cancelled");
                return Ok(());
            }
            if state.iteration >= self.config.max_iterations {
                tracing::warn!(max = self.config.max_iterations, "Iteration limit reached");
                state.fail(FailureReason::IterationLimit(self.config.max_iterations));
                cowork_governance::record_iteration("limit");
                return Ok(());
            }

            state.iteration += 1;
            let iteration = state.iteration;
            let event_id = ProgressEvent::iteration_id(iteration);
            tracing::info!(iteration, "Starting iteration");

            state.status = AgentStatus::Deciding;
            self.emit(&event_id, ProgressStatus::Running, "Deciding next action".to_string())
                .await;

            let decision = match self.decide(state, context, &tools).await {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::warn!(iteration, error = %e, "No usable decision");
                    self.emit(&event_id, ProgressStatus::Error, e.to_string()).await;
                    state.fail(FailureReason::Decision(e.to_string()));
                    cowork_governance::record_iteration("decision_error");
                    return Ok(());
                }
            };

            let (thought, action) = match decision {
                Decision::Complete { answer, .. } => {
                    tracing::info!(iteration, "Agent completed");
                    self.emit(&event_id, ProgressStatus::Success, "Completed".to_string())
                        .await;
                    state.complete(answer);
                    cowork_governance::record_iteration("complete");
                    return Ok(());
                }
                Decision::Invoke { thought, action } => (thought, action),
            };

            if let Some(command) = action.command() {
                if is_repeated(state, command) {
                    tracing::warn!(iteration, command, "Repeated command, stopping");
                    self.emit(&event_id, ProgressStatus::Skipped, "Repeated command".to_string())
                        .await;
                    let summary = summarize(state);
                    state.completion_reason = Some("repeated_action".to_string());
                    state.complete(summary);
                    cowork_governance::record_iteration("repeated_action");
                    return Ok(());
                }
            }

            state.status = AgentStatus::Acting;
            let label = action
                .description
                .clone()
                .unwrap_or_else(|| action.tool.clone());
            tracing::info!(iteration, tool = %action.tool, "Acting");

            let outcome = self.act(&action, &label, context, cancel).await;

            let (success, observation, stored, status, metric) = match outcome {
                ActOutcome::Cancelled => {
                    tracing::warn!(iteration, "Cancelled while awaiting confirmation");
                    state.status = AgentStatus::Cancelled;
                    self.emit(&event_id, ProgressStatus::Skipped, "Cancelled".to_string())
                        .await;
                    cowork_governance::record_iteration("cancelled");
                    return Ok(());
                }
                ActOutcome::Succeeded { observation, value } => {
                    state.consecutive_failures = 0;
                    (true, observation, value, ProgressStatus::Success, "success")
                }
                ActOutcome::Failed { observation, error } => {
                    state.consecutive_failures += 1;
                    let stored = json!({"status": "error", "error": error});
                    (false, observation, stored, ProgressStatus::Error, "error")
                }
                ActOutcome::Declined { observation } => {
                    let stored = json!({"status": "declined", "error": observation});
                    (false, observation, stored, ProgressStatus::Skipped, "declined")
                }
            };

            let key = context_key(&action, iteration);
            if let Err(e) = context.put(&key, stored) {
                tracing::warn!(key = %key, error = %e, "Context write rejected");
            }

            state.steps.push(AgentStep {
                iteration,
                thought,
                action,
                observation: truncate(&observation, self.config.observation_limit),
                success,
                context_key: key,
                timestamp: chrono::Utc::now().timestamp(),
            });
            state.status = AgentStatus::Observing;
            self.emit(&event_id, status, label).await;
            cowork_governance::record_iteration(metric);

            if state.consecutive_failures >= self.config.max_consecutive_failures {
                tracing::warn!(
                    failures = state.consecutive_failures,
                    "Too many consecutive failures"
                );
                state.fail(FailureReason::ConsecutiveFailures(state.consecutive_failures));
                return Ok(());
            }
        }
    }

    /// Ask the reasoning service for the next decision.
    async fn decide(
        &self,
        state: &AgentState,
        context: &ContextStore,
        tools: &[String],
    ) -> Result<Decision> {
        let messages = self.build_messages(state, context, tools);
        let response = self.llm.chat(&messages).await?;
        let decision = self.parser.parse(&response.content)?;
        tracing::debug!(
            response_len = response.content.len(),
            thought = decision.thought(),
            "Decision received"
        );
        Ok(decision)
    }

    fn build_messages(
        &self,
        state: &AgentState,
        context: &ContextStore,
        tools: &[String],
    ) -> Vec<ChatMessage> {
        let mut system = SYSTEM_PROMPT.to_string();
        if !tools.is_empty() {
            system.push_str("\nOther capabilities: ");
            system.push_str(&tools.join(", "));
        }

        let mut user = format!(
            "REQUEST: {}\n\nSTEP {}/{}\n",
            state.goal, state.iteration, self.config.max_iterations
        );

        let skip = state.steps.len().saturating_sub(self.config.history_window);
        if skip < state.steps.len() {
            user.push_str("\nPREVIOUS STEPS:\n");
            for step in &state.steps[skip..] {
                let args = serde_json::to_string(&step.action.args).unwrap_or_default();
                user.push_str(&format!(
                    "{}. {} -> {} {}\n   {}: {}\n",
                    step.iteration,
                    step.thought,
                    step.action.tool,
                    truncate(&args, 200),
                    if step.success { "Result" } else { "Failed" },
                    step.observation,
                ));
            }
        }

        let keys = context.keys();
        if !keys.is_empty() {
            user.push_str(&format!("\nCONTEXT: {}\n", keys.join(", ")));
        }

        vec![ChatMessage::system(system), ChatMessage::user(user)]
    }

    async fn act(
        &self,
        action: &AgentAction,
        label: &str,
        context: &ContextStore,
        cancel: &CancellationToken,
    ) -> ActOutcome {
        let confirmation = match self.check_safety(action).await {
            Ok(confirmation) => confirmation,
            Err(observation) => return ActOutcome::Declined { observation },
        };

        if let Some(request) = confirmation {
            match self.confirm(&request, cancel).await {
                Some(true) => tracing::info!(tool = %action.tool, "Action confirmed"),
                Some(false) => {
                    tracing::warn!(tool = %action.tool, "Action declined");
                    let what = request.command.as_deref().unwrap_or(label);
                    return ActOutcome::Declined {
                        observation: format!("User declined the action: {}", what),
                    };
                }
                None => return ActOutcome::Cancelled,
            }
        }

        // Sandboxed code sees the context as variables; tool args are interpolated.
        let args = if matches!(action.tool.as_str(), PYTHON_ACTION | SHELL_ACTION) {
            Ok(action.args.clone())
        } else {
            context.resolve_args(&action.args)
        };

        let result = match args {
            Ok(args) => self.dispatcher.invoke(&action.tool, args, context).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(value) => ActOutcome::Succeeded {
                observation: render(&value),
                value,
            },
            Err(e) => {
                let kind = e.failure_kind();
                let error = sanitize_error(label, &e.to_string(), kind);
                let observation = if kind == FailureKind::Timeout {
                    format!("Error (timeout): {}", error)
                } else {
                    format!("Error: {}", error)
                };
                ActOutcome::Failed { observation, error }
            }
        }
    }

    /// `Ok(Some(request))` when the user must confirm, `Err(observation)` when
    /// the action is refused outright.
    async fn check_safety(
        &self,
        action: &AgentAction,
    ) -> std::result::Result<Option<ConfirmationRequest>, String> {
        let assessment = SafetyAnalyzer::global().analyze_action(action);
        let reason = assessment.reason.clone().unwrap_or_default();

        match assessment.level {
            DangerLevel::Blocked => {
                tracing::warn!(tool = %action.tool, reason = %reason, "Action blocked");
                return Err(format!("BLOCKED: {}. This operation is not allowed.", reason));
            }
            level if level.needs_confirmation() && self.config.require_confirmation => {
                return Ok(Some(confirmation_request(action, &assessment)));
            }
            _ => {}
        }

        if matches!(action.tool.as_str(), PYTHON_ACTION | SHELL_ACTION)
            || !self.config.require_confirmation
        {
            return Ok(None);
        }
        // Tools may declare their own confirmation.
        match self.dispatcher.registry().resolve(&action.tool).await {
            Ok(tool) => Ok(tool.confirmation(&Value::Object(action.args.clone()))),
            Err(_) => Ok(None),
        }
    }

    /// `Some(answer)`, or `None` when cancelled while waiting.
    async fn confirm(
        &self,
        request: &ConfirmationRequest,
        cancel: &CancellationToken,
    ) -> Option<bool> {
        let Some(gate) = &self.gate else {
            tracing::warn!("Confirmation required but no gate is configured");
            return Some(false);
        };

        tokio::select! {
            _ = cancel.cancelled() => None,
            answer = gate.confirm(request) => match answer {
                Ok(answer) => Some(answer),
                Err(e) => {
                    tracing::warn!(error = %e, "Confirmation failed, declining");
                    Some(false)
                }
            },
        }
    }

    async fn emit(&self, id: &str, status: ProgressStatus, description: String) {
        self.progress
            .emit(ProgressEvent::new(id, status, description))
            .await;
    }
}

#[async_trait]
impl Controller for ReActController {
    async fn run(&self, goal: &str, cancel: CancellationToken) -> Result<AgentState> {
        let mut state = AgentState::new(goal);
        let context = ContextStore::new();
        state.status = AgentStatus::Observing;

        self.run_loop(&mut state, &context, &cancel).await?;

        tracing::info!(
            status = ?state.status,
            iterations = state.iteration,
            steps = state.steps.len(),
            "Agent run finished"
        );
        Ok(state)
    }
}

/// Context key for an iteration's observation.
pub fn context_key(action: &AgentAction, iteration: usize) -> String {
    let base = action
        .description
        .as_deref()
        .map(snake_case)
        .filter(|s| !s.is_empty())
        .map(|s| {
            let cut: String = s.chars().take(20).collect();
            cut.trim_end_matches('_').to_string()
        })
        .unwrap_or_else(|| format!("{}_result", snake_case(&action.tool)));
    format!("{}_{}", base, iteration)
}

fn snake_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
        }
    }
    out.trim_end_matches('_').to_string()
}

fn is_repeated(state: &AgentState, command: &str) -> bool {
    let command = command.trim();
    let skip = state.steps.len().saturating_sub(REPEAT_WINDOW);
    state.steps[skip..]
        .iter()
        .filter(|s| s.action.command().map(str::trim) == Some(command))
        .count()
        >= REPEAT_LIMIT
}

fn summarize(state: &AgentState) -> String {
    let done: Vec<String> = state
        .successful_steps()
        .map(|s| {
            let what = s.action.description.clone().unwrap_or_else(|| s.action.tool.clone());
            format!("- {}: {}", what, truncate(&s.observation, 200))
        })
        .collect();
    if done.is_empty() {
        "Stopped after repeating the same command; nothing completed successfully.".to_string()
    } else {
        format!(
            "Stopped after repeating the same command. Completed so far:\n{}",
            done.join("\n")
        )
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "(no output)".to_string(),
        other => other.to_string(),
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}... (truncated)", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_key_from_description() {
        let action = AgentAction::new("shell").with_description("List all files in Downloads");
        assert_eq!(context_key(&action, 3), "list_all_files_in_do_3");
    }

    #[test]
    fn test_context_key_fallback() {
        assert_eq!(context_key(&AgentAction::new("python"), 1), "python_result_1");
        let blank = AgentAction::new("web-fetch").with_description("!!");
        assert_eq!(context_key(&blank, 2), "web_fetch_result_2");
    }

    #[test]
    fn test_repeated_command_detection() {
        let mut state = AgentState::new("goal");
        for i in 1..=2 {
            state.steps.push(AgentStep {
                iteration: i,
                thought: String::new(),
                action: AgentAction::new("shell").with_arg("command", "ls ~"),
                observation: String::new(),
                success: true,
                context_key: format!("k{}", i),
                timestamp: 0,
            });
        }
        assert!(is_repeated(&state, " ls ~ "));
        assert!(!is_repeated(&state, "ls /"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 3), "abc... (truncated)");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
