//! Step dispatch shared by the plan executor and the ReAct loop.
//!
//! `python` and `shell` actions run in the sandbox; every other action name
//! is resolved through the tool registry.

use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use cowork_core::{
    config::EngineConfig,
    traits::ToolRegistry,
    types::{FailureKind, SandboxRequest, Step, StepResult},
    ContextStore, Error, Result,
};
use cowork_sandbox::SandboxExecutor;

/// Action name for sandboxed Python.
pub const PYTHON_ACTION: &str = "python";
/// Action name for sandboxed shell commands.
pub const SHELL_ACTION: &str = "shell";

/// Routes an action to the sandbox or the registry.
pub struct StepDispatcher {
    registry: Arc<dyn ToolRegistry>,
    sandbox: Option<Arc<SandboxExecutor>>,
    step_timeout: Duration,
    sandbox_timeout: Duration,
}

impl StepDispatcher {
    /// Dispatcher with default timeouts and no sandbox.
    pub fn new(registry: Arc<dyn ToolRegistry>) -> Self {
        Self::from_config(registry, &EngineConfig::default())
    }

    /// Dispatcher using the configured timeouts.
    pub fn from_config(registry: Arc<dyn ToolRegistry>, config: &EngineConfig) -> Self {
        Self {
            registry,
            sandbox: None,
            step_timeout: config.executor.step_timeout(),
            sandbox_timeout: config.sandbox.timeout(),
        }
    }

    /// Enable `python` and `shell` actions.
    pub fn with_sandbox(mut self, sandbox: Arc<SandboxExecutor>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn with_sandbox_timeout(mut self, timeout: Duration) -> Self {
        self.sandbox_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<dyn ToolRegistry> {
        &self.registry
    }

    /// Execute one plan step. Failures are returned as an error result.
    pub async fn execute_step(
        &self,
        step: &Step,
        context: &ContextStore,
        plan_ids: &HashSet<String>,
    ) -> StepResult {
        let args = match resolve_step_args(step, context, plan_ids) {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!(step_id = %step.id, error = %e, "Argument resolution failed");
                return StepResult::from_error(&step.id, &e);
            }
        };

        match self.invoke(&step.action, args, context).await {
            Ok(output) => StepResult::success(&step.id, output),
            Err(e) => {
                let kind = e.failure_kind();
                StepResult::error(&step.id, kind, sanitize_error(&step.label(), &e.to_string(), kind))
            }
        }
    }

    /// Invoke an action with already-resolved arguments.
    pub async fn invoke(
        &self,
        action: &str,
        args: Map<String, Value>,
        context: &ContextStore,
    ) -> Result<Value> {
        match action {
            PYTHON_ACTION | SHELL_ACTION => self.invoke_sandboxed(action, &args, context).await,
            _ => self.invoke_tool(action, args).await,
        }
    }

    async fn invoke_tool(&self, action: &str, args: Map<String, Value>) -> Result<Value> {
        tracing::debug!(tool = %action, "Invoking capability");
        let output = tokio::time::timeout(
            self.step_timeout,
            self.registry.execute(action, Value::Object(args)),
        )
        .await
        .map_err(|_| {
            Error::timeout(format!(
                "'{}' did not finish within {:?}",
                action, self.step_timeout
            ))
        })??;

        if output.success {
            Ok(output.into_value())
        } else {
            Err(Error::capability(output.content))
        }
    }

    async fn invoke_sandboxed(
        &self,
        action: &str,
        args: &Map<String, Value>,
        context: &ContextStore,
    ) -> Result<Value> {
        let sandbox = self
            .sandbox
            .as_ref()
            .ok_or_else(|| Error::sandbox(format!("no sandbox configured for '{}'", action)))?;

        let request = if action == PYTHON_ACTION {
            let code = string_arg(args, &["code"])
                .ok_or_else(|| Error::capability("python action needs a 'code' argument"))?;
            SandboxRequest::code(code, self.sandbox_timeout)
        } else {
            let command = string_arg(args, &["command", "cmd"])
                .ok_or_else(|| Error::capability("shell action needs a 'command' argument"))?;
            SandboxRequest::command(command, self.sandbox_timeout)
        };
        let mode = sandbox.default_mode();
        let request = request.with_context(context.snapshot()).with_mode(mode);

        let result = sandbox.run(request).await;

        let outcome = if result.is_success() {
            "success"
        } else if result.timed_out {
            "timeout"
        } else {
            "error"
        };
        cowork_governance::record_sandbox(mode.as_str(), outcome);

        if result.is_success() {
            return Ok(result.output());
        }
        let message = result
            .error_message()
            .unwrap_or_else(|| "unit of work failed".to_string());
        if result.timed_out {
            Err(Error::timeout(message))
        } else if result.exit_code.is_none() {
            Err(Error::sandbox(message))
        } else {
            Err(Error::capability(message))
        }
    }
}

fn string_arg<'a>(args: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| args.get(*k).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
}

/// Arguments holding sandbox source. The sandbox injects the context as
/// variables, so these are never interpolated.
const SOURCE_ARGS: &[&str] = &["code", "command", "cmd"];

/// Resolve a step's arguments against the context.
///
/// An argument naming another step of the plan whose result is not in
/// context is an unresolved dependency. The source of `python` and `shell`
/// steps is passed through verbatim.
pub fn resolve_step_args(
    step: &Step,
    context: &ContextStore,
    plan_ids: &HashSet<String>,
) -> Result<Map<String, Value>> {
    let sandboxed = matches!(step.action.as_str(), PYTHON_ACTION | SHELL_ACTION);
    let mut resolved = Map::with_capacity(step.args.len());

    for (key, value) in &step.args {
        if sandboxed && SOURCE_ARGS.contains(&key.as_str()) {
            resolved.insert(key.clone(), value.clone());
            continue;
        }
        if let Value::String(s) = value {
            let name = s.trim();
            if plan_ids.contains(name) && !context.contains(name) {
                return Err(Error::dependency(format!(
                    "argument '{}' refers to step '{}', which has no result",
                    key, name
                )));
            }
        }
        resolved.insert(key.clone(), context.resolve_value(value)?);
    }
    Ok(resolved)
}

/// Human-readable error text.
///
/// Tracebacks are reduced to their last `...Error:` line, shell failures to
/// `Command failed: ...`, and timeouts say so.
pub fn sanitize_error(label: &str, message: &str, kind: FailureKind) -> String {
    if kind == FailureKind::Timeout {
        return format!("{} took too long and was stopped ({})", label, first_line(message));
    }

    if let Some(line) = message
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| is_exception_line(l))
    {
        return truncate(line, 300);
    }

    if let Some(rest) = message
        .strip_prefix("Capability failed: exited with status ")
        .or_else(|| message.strip_prefix("exited with status "))
    {
        let detail = rest.split_once(": ").map_or(rest, |(_, stderr)| stderr);
        let detail = detail
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or(detail);
        return format!("Command failed: {}", truncate(detail, 200));
    }

    truncate(message.trim(), 300)
}

fn is_exception_line(line: &str) -> bool {
    // `ValueError: bad input`, `json.decoder.JSONDecodeError: ...`
    let Some((name, _)) = line.split_once(": ") else {
        return false;
    };
    (name.ends_with("Error") || name.ends_with("Exception"))
        && !name.contains(' ')
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or(message).trim()
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cowork_core::config::SandboxConfig;
    use cowork_core::mocks::{FailingTool, RecordingTool};
    use cowork_core::types::{SandboxMode, StepStatus};
    use cowork_sandbox::{ExecResult, MockSandbox};
    use cowork_skills::DefaultToolRegistry;
    use serde_json::json;

    async fn registry() -> Arc<DefaultToolRegistry> {
        let registry = Arc::new(DefaultToolRegistry::new());
        registry
            .register(Arc::new(RecordingTool::new("list_files", json!(["a.jpg"]))))
            .await
            .unwrap();
        registry
            .register(Arc::new(FailingTool::new("broken", "disk full")))
            .await
            .unwrap();
        registry
    }

    fn ids(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_tool_step_success() {
        let dispatcher = StepDispatcher::new(registry().await);
        let step = Step::new("list_all", "list_files").with_arg("path", "~/Downloads");
        let result = dispatcher
            .execute_step(&step, &ContextStore::new(), &ids(&["list_all"]))
            .await;
        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.output, Some(json!(["a.jpg"])));
    }

    #[tokio::test]
    async fn test_tool_failure_is_capability_error() {
        let dispatcher = StepDispatcher::new(registry().await);
        let result = dispatcher
            .execute_step(&Step::new("b", "broken"), &ContextStore::new(), &ids(&["b"]))
            .await;
        assert_eq!(result.status, StepStatus::Error);
        assert_eq!(result.failure, Some(FailureKind::Capability));
        assert!(result.error.unwrap().contains("disk full"));
    }

    #[tokio::test]
    async fn test_unknown_action_is_step_error() {
        let dispatcher = StepDispatcher::new(registry().await);
        let result = dispatcher
            .execute_step(&Step::new("x", "teleport"), &ContextStore::new(), &ids(&["x"]))
            .await;
        assert_eq!(result.status, StepStatus::Error);
        assert!(result.error.unwrap().contains("teleport"));
    }

    #[tokio::test]
    async fn test_unresolved_reference_is_dependency_error() {
        let dispatcher = StepDispatcher::new(registry().await);
        let step = Step::new("categorize", "list_files").with_arg("files", "list_all");
        let result = dispatcher
            .execute_step(&step, &ContextStore::new(), &ids(&["list_all", "categorize"]))
            .await;
        assert_eq!(result.failure, Some(FailureKind::Dependency));
    }

    #[tokio::test]
    async fn test_tool_timeout() {
        let registry = Arc::new(DefaultToolRegistry::new());
        registry
            .register(Arc::new(
                RecordingTool::new("slow", json!(1)).with_delay(Duration::from_secs(5)),
            ))
            .await
            .unwrap();
        let dispatcher =
            StepDispatcher::new(registry).with_step_timeout(Duration::from_millis(50));
        let result = dispatcher
            .execute_step(&Step::new("s", "slow"), &ContextStore::new(), &ids(&["s"]))
            .await;
        assert!(result.timed_out());
        assert!(result.error.unwrap().contains("took too long"));
    }

    #[tokio::test]
    async fn test_shell_step_uses_sandbox_with_context() {
        let engine = Arc::new(MockSandbox::new(vec![ExecResult::ok("moved\n")]));
        let sandbox = SandboxExecutor::new(&SandboxConfig::default()).with_permissive(engine.clone());
        let dispatcher = StepDispatcher::new(registry().await).with_sandbox(Arc::new(sandbox));
        assert_eq!(
            dispatcher.sandbox.as_ref().unwrap().default_mode(),
            SandboxMode::Permissive
        );

        let context = ContextStore::new();
        context.put("base_dir", json!("/home/u")).unwrap();
        let step = Step::new("mv", "shell").with_arg("command", "mv a.jpg base_dir/Images");
        let result = dispatcher.execute_step(&step, &context, &ids(&["mv"])).await;

        assert!(result.is_success(), "{:?}", result);
        assert_eq!(result.output, Some(json!("moved")));
        let commands = engine.commands.lock().await.clone();
        assert_eq!(commands.len(), 1);
    }

    #[test]
    fn test_sandbox_source_is_not_interpolated() {
        let context = ContextStore::new();
        context.put("base_dir", json!("/home/u/Downloads")).unwrap();
        let plan_ids = ids(&["base_dir", "join"]);

        let step = Step::new("join", PYTHON_ACTION)
            .with_arg("code", "result = os.path.join(base_dir, 'Images')")
            .with_arg("note", "base_dir");
        let args = resolve_step_args(&step, &context, &plan_ids).unwrap();
        assert_eq!(args["code"], json!("result = os.path.join(base_dir, 'Images')"));
        // Non-source arguments still resolve.
        assert_eq!(args["note"], json!("/home/u/Downloads"));

        let step = Step::new("join", SHELL_ACTION).with_arg("command", "base_dir");
        let args = resolve_step_args(&step, &context, &plan_ids).unwrap();
        assert_eq!(args["command"], json!("base_dir"));

        // Capabilities still receive the referenced value.
        let step = Step::new("join", "echo").with_arg("code", "base_dir");
        let args = resolve_step_args(&step, &context, &plan_ids).unwrap();
        assert_eq!(args["code"], json!("/home/u/Downloads"));
    }

    #[tokio::test]
    async fn test_shell_without_sandbox_is_sandbox_error() {
        let dispatcher = StepDispatcher::new(registry().await);
        let step = Step::new("mv", "shell").with_arg("command", "ls");
        let result = dispatcher.execute_step(&step, &ContextStore::new(), &ids(&["mv"])).await;
        assert_eq!(result.failure, Some(FailureKind::Sandbox));
    }

    #[test]
    fn test_sanitize_traceback() {
        let msg = "exited with status 1: Traceback (most recent call last):\n  File \"main.py\", line 3\nValueError: bad input";
        assert_eq!(
            sanitize_error("step", msg, FailureKind::Capability),
            "ValueError: bad input"
        );
    }

    #[test]
    fn test_sanitize_shell_failure() {
        let msg = "Capability failed: exited with status 2: ls: cannot access 'x': No such file or directory";
        assert_eq!(
            sanitize_error("step", msg, FailureKind::Capability),
            "Command failed: ls: cannot access 'x': No such file or directory"
        );
    }

    #[test]
    fn test_sanitize_timeout_keeps_reason() {
        let msg = "Timed out: timed out after 30s";
        let text = sanitize_error("Sort images", msg, FailureKind::Timeout);
        assert!(text.starts_with("Sort images took too long and was stopped"));
        assert!(text.contains("30s"));
    }
}
