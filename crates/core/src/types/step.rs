use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::error::{Error, Result};

// =============================================================================
// Plan Types
// =============================================================================

/// Action name answered directly by the chat tool.
pub const CHAT_ACTION: &str = "chat_op";

/// A unit of planned work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Identifier, unique within a plan.
    pub id: String,

    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,

    /// Capability name resolved through the registry (or `python` / `shell`).
    pub action: String,

    /// Arguments; string values may contain interpolation references.
    #[serde(default)]
    pub args: Map<String, Value>,

    /// Steps that must have a recorded result before this one runs.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Step {
    /// Create a step with no arguments or dependencies.
    pub fn new(id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            action: action.into(),
            args: Map::new(),
            depends_on: Vec::new(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add an argument.
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Add a dependency.
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    /// Description for progress events, falling back to the action name.
    pub fn label(&self) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| format!("{} ({})", self.id, self.action))
    }
}

/// An ordered collection of steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<Step>,
}

impl Plan {
    /// Create a plan from steps.
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// Parse a plan from JSON.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Parse a plan from YAML.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| Error::validation(format!("invalid YAML plan: {}", e)))
    }

    /// Load a plan file, choosing the format by extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::validation(format!("cannot read {}: {}", path.display(), e)))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&raw),
            _ => Self::from_json(&raw),
        }
    }

    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Whether this plan is just a chat response.
    pub fn is_chat(&self) -> bool {
        self.steps.len() == 1 && self.steps[0].action == CHAT_ACTION
    }

    /// The chat response carried by a chat plan.
    pub fn chat_response(&self) -> Option<&str> {
        if !self.is_chat() {
            return None;
        }
        self.steps[0].args.get("response").and_then(|v| v.as_str())
    }

    /// Validate ids, dependency references and acyclicity.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err(Error::validation("step with empty id"));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(Error::validation(format!("duplicate step id '{}'", step.id)));
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if dep == &step.id {
                    return Err(Error::validation(format!(
                        "step '{}' depends on itself",
                        step.id
                    )));
                }
                if !seen.contains(dep.as_str()) {
                    return Err(Error::validation(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.id, dep
                    )));
                }
            }
        }

        // Kahn's algorithm; anything left over sits on a cycle.
        let ordered: usize = self.waves_unchecked().iter().map(Vec::len).sum();
        if ordered != self.steps.len() {
            let placed: HashSet<String> = self.waves_unchecked().into_iter().flatten().collect();
            let mut cyclic: Vec<&str> = self
                .steps
                .iter()
                .filter(|s| !placed.contains(&s.id))
                .map(|s| s.id.as_str())
                .collect();
            cyclic.sort_unstable();
            return Err(Error::validation(format!(
                "dependency cycle between steps: {}",
                cyclic.join(", ")
            )));
        }

        Ok(())
    }

    /// Static wave decomposition of a valid plan, each wave in plan order.
    pub fn waves(&self) -> Result<Vec<Vec<String>>> {
        self.validate()?;
        Ok(self.waves_unchecked())
    }

    fn waves_unchecked(&self) -> Vec<Vec<String>> {
        let mut remaining: HashMap<&str, usize> = self
            .steps
            .iter()
            .map(|s| (s.id.as_str(), s.depends_on.len()))
            .collect();
        let mut done: HashSet<&str> = HashSet::new();
        let mut waves = Vec::new();

        loop {
            let wave: Vec<&Step> = self
                .steps
                .iter()
                .filter(|s| !done.contains(s.id.as_str()))
                .filter(|s| remaining.get(s.id.as_str()).copied() == Some(0))
                .collect();
            if wave.is_empty() {
                break;
            }
            for step in &wave {
                done.insert(step.id.as_str());
            }
            for step in &self.steps {
                if done.contains(step.id.as_str()) {
                    continue;
                }
                let unmet = step
                    .depends_on
                    .iter()
                    .filter(|d| !done.contains(d.as_str()))
                    .count();
                remaining.insert(step.id.as_str(), unmet);
            }
            waves.push(wave.iter().map(|s| s.id.clone()).collect());
        }

        waves
    }
}

// =============================================================================
// Step Results
// =============================================================================

/// Terminal status of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Error,
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Skipped => "skipped",
        };
        f.pad(s)
    }
}

/// Why a step did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Interpolation failed or an upstream dependency did not succeed.
    Dependency,
    /// The capability itself reported failure.
    Capability,
    /// Isolation or infrastructure failure inside the sandbox.
    Sandbox,
    /// Wall-clock limit reached.
    Timeout,
    /// The run was cancelled before the step started.
    Cancelled,
}

/// Outcome of executing one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub failure: Option<FailureKind>,
}

impl StepResult {
    /// A successful result.
    pub fn success(step_id: impl Into<String>, output: Value) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Success,
            output: Some(output),
            error: None,
            failure: None,
        }
    }

    /// A failed result.
    pub fn error(step_id: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Error,
            output: None,
            error: Some(message.into()),
            failure: Some(kind),
        }
    }

    /// A skipped result.
    pub fn skipped(step_id: impl Into<String>, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Skipped,
            output: None,
            error: Some(reason.into()),
            failure: Some(kind),
        }
    }

    /// Build a failed result from an engine error.
    pub fn from_error(step_id: impl Into<String>, err: &Error) -> Self {
        Self::error(step_id, err.failure_kind(), err.to_string())
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }

    pub fn timed_out(&self) -> bool {
        self.failure == Some(FailureKind::Timeout)
    }
}

/// Success / error / skipped counts of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub success: usize,
    pub error: usize,
    pub skipped: usize,
}

impl RunSummary {
    /// Tally a set of results.
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a StepResult>) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result.status {
                StepStatus::Success => summary.success += 1,
                StepStatus::Error => summary.error += 1,
                StepStatus::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.success + self.error + self.skipped
    }

    pub fn all_succeeded(&self) -> bool {
        self.error == 0 && self.skipped == 0
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} skipped ({} total)",
            self.success,
            self.error,
            self.skipped,
            self.total()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn organize_plan() -> Plan {
        Plan::new(vec![
            Step::new("list_all", "list_files"),
            Step::new("categorize", "python").depends_on("list_all"),
            Step::new("move_imgs", "move_files").depends_on("categorize"),
            Step::new("move_pdfs", "move_files").depends_on("categorize"),
        ])
    }

    #[test]
    fn test_waves_follow_dependencies() {
        let waves = organize_plan().waves().unwrap();
        assert_eq!(
            waves,
            vec![
                vec!["list_all".to_string()],
                vec!["categorize".to_string()],
                vec!["move_imgs".to_string(), "move_pdfs".to_string()],
            ]
        );
    }

    #[test]
    fn test_cycle_is_rejected() {
        let plan = Plan::new(vec![
            Step::new("a", "echo").depends_on("c"),
            Step::new("b", "echo").depends_on("a"),
            Step::new("c", "echo").depends_on("b"),
            Step::new("d", "echo"),
        ]);
        let err = plan.validate().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("a, b, c"));
    }

    #[test]
    fn test_duplicate_and_unknown_ids() {
        let dup = Plan::new(vec![Step::new("a", "echo"), Step::new("a", "echo")]);
        assert!(dup.validate().unwrap_err().to_string().contains("duplicate"));

        let unknown = Plan::new(vec![Step::new("a", "echo").depends_on("ghost")]);
        assert!(unknown.validate().unwrap_err().to_string().contains("ghost"));

        let selfdep = Plan::new(vec![Step::new("a", "echo").depends_on("a")]);
        assert!(selfdep.validate().is_err());
    }

    #[test]
    fn test_parse_plan_json_and_yaml() {
        let json = r#"{"steps": [
            {"id": "list_all", "action": "list_files", "args": {"path": "~/Downloads"}},
            {"id": "categorize", "description": "Sort by type", "action": "python",
             "args": {"code": "result = 1"}, "depends_on": ["list_all"]}
        ]}"#;
        let plan = Plan::from_json(json).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[1].depends_on, vec!["list_all"]);
        assert!(plan.steps[0].description.is_none());

        let yaml = "steps:\n  - id: greet\n    action: chat_op\n    args:\n      response: hello\n";
        let plan = Plan::from_yaml(yaml).unwrap();
        assert!(plan.is_chat());
        assert_eq!(plan.chat_response(), Some("hello"));
    }

    #[test]
    fn test_plan_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.yaml");
        std::fs::write(&path, "steps:\n  - id: a\n    action: echo\n").unwrap();
        let plan = Plan::from_file(&path).unwrap();
        assert_eq!(plan.steps[0].id, "a");
    }

    #[test]
    fn test_run_summary() {
        let results = vec![
            StepResult::success("a", Value::Null),
            StepResult::error("b", FailureKind::Timeout, "took too long"),
            StepResult::skipped("c", FailureKind::Dependency, "b failed"),
        ];
        let summary = RunSummary::from_results(&results);
        assert_eq!(summary, RunSummary { success: 1, error: 1, skipped: 1 });
        assert!(!summary.all_succeeded());
        assert_eq!(summary.to_string(), "1 succeeded, 1 failed, 1 skipped (3 total)");
        assert!(results[1].timed_out());
    }
}
