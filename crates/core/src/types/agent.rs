use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

// =============================================================================
// Agent Decision Types
// =============================================================================

/// A single capability invocation requested by the reasoning service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    /// Capability name (`shell`, `python` or a registered tool).
    pub tool: String,

    /// Invocation arguments.
    #[serde(default)]
    pub args: Map<String, Value>,

    /// Short description of the intent of the action.
    #[serde(default)]
    pub description: Option<String>,
}

impl AgentAction {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            args: Map::new(),
            description: None,
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The shell command carried by a `shell` action.
    pub fn command(&self) -> Option<&str> {
        if self.tool != "shell" {
            return None;
        }
        self.args
            .get("command")
            .or_else(|| self.args.get("cmd"))
            .and_then(|v| v.as_str())
    }

    /// The code carried by a `python` action.
    pub fn code(&self) -> Option<&str> {
        if self.tool != "python" {
            return None;
        }
        self.args.get("code").and_then(|v| v.as_str())
    }
}

/// Exactly one next move, as decided by the reasoning service.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Invoke a capability and observe its result.
    Invoke { thought: String, action: AgentAction },

    /// Finish with a final answer.
    Complete { thought: String, answer: String },
}

impl Decision {
    pub fn thought(&self) -> &str {
        match self {
            Self::Invoke { thought, .. } | Self::Complete { thought, .. } => thought,
        }
    }
}

// =============================================================================
// Agent State
// =============================================================================

/// Lifecycle of one ReAct run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Observing,
    Deciding,
    Acting,
    Completed,
    Failed,
    Cancelled,
}

impl AgentStatus {
    /// Whether the run has stopped.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Why a run ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// The iteration cap was reached without a completion.
    IterationLimit(usize),
    /// Too many failing actions in a row.
    ConsecutiveFailures(usize),
    /// The reasoning service failed or returned an unusable decision.
    Decision(String),
}

impl FailureReason {
    /// Convert into the engine error that callers propagate.
    pub fn into_error(self) -> Error {
        match self {
            Self::IterationLimit(n) => Error::IterationLimitExceeded(n),
            Self::ConsecutiveFailures(n) => {
                Error::capability(format!("{} consecutive actions failed", n))
            }
            Self::Decision(msg) => Error::Decision(msg),
        }
    }
}

/// One (thought, action, observation) triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    /// 1-based iteration number.
    pub iteration: usize,
    pub thought: String,
    pub action: AgentAction,
    /// Observation text shown to the next decision.
    pub observation: String,
    /// Whether the action succeeded.
    pub success: bool,
    /// Context key the observation was stored under.
    pub context_key: String,
    pub timestamp: i64,
}

/// Mutable state of a ReAct run, owned by the loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub goal: String,
    pub status: AgentStatus,
    pub steps: Vec<AgentStep>,
    /// Number of decisions requested so far.
    pub iteration: usize,
    pub consecutive_failures: usize,
    #[serde(default)]
    pub final_answer: Option<String>,
    #[serde(default)]
    pub failure: Option<FailureReason>,
    /// Set when the run completed early, e.g. `repeated_action`.
    #[serde(default)]
    pub completion_reason: Option<String>,
}

impl AgentState {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            status: AgentStatus::Idle,
            steps: Vec::new(),
            iteration: 0,
            consecutive_failures: 0,
            final_answer: None,
            failure: None,
            completion_reason: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Record a completed run.
    pub fn complete(&mut self, answer: impl Into<String>) {
        self.status = AgentStatus::Completed;
        self.final_answer = Some(answer.into());
    }

    /// Record a failed run.
    pub fn fail(&mut self, reason: FailureReason) {
        self.status = AgentStatus::Failed;
        self.failure = Some(reason);
    }

    /// Steps whose action succeeded.
    pub fn successful_steps(&self) -> impl Iterator<Item = &AgentStep> {
        self.steps.iter().filter(|s| s.success)
    }

    /// Final answer on completion, or the failure as an error.
    pub fn into_result(self) -> crate::Result<String> {
        if !self.is_terminal() {
            return Err(Error::internal("agent run did not finish"));
        }
        match self.status {
            AgentStatus::Completed => Ok(self.final_answer.unwrap_or_default()),
            AgentStatus::Cancelled => Err(Error::Cancelled("agent run cancelled".into())),
            _ => Err(self
                .failure
                .map(FailureReason::into_error)
                .unwrap_or_else(|| Error::internal("agent run did not finish"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_accessors() {
        let shell = AgentAction::new("shell").with_arg("command", "ls -la");
        assert_eq!(shell.command(), Some("ls -la"));
        assert_eq!(shell.code(), None);

        let py = AgentAction::new("python").with_arg("code", "result = 2");
        assert_eq!(py.code(), Some("result = 2"));
        assert_eq!(py.command(), None);
    }

    #[test]
    fn test_into_result() {
        let mut state = AgentState::new("goal");
        state.complete("done");
        assert_eq!(state.into_result().unwrap(), "done");

        let mut state = AgentState::new("goal");
        state.fail(FailureReason::IterationLimit(4));
        assert!(matches!(
            state.into_result(),
            Err(Error::IterationLimitExceeded(4))
        ));
    }

    #[test]
    fn test_unfinished_run_has_no_result() {
        let mut state = AgentState::new("goal");
        state.status = AgentStatus::Acting;
        assert!(!state.is_terminal());
        assert!(matches!(state.into_result(), Err(Error::Internal(_))));
    }
}
