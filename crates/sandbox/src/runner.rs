//! Sandboxed executor.
//!
//! Runs one unit of work per sandbox: the context snapshot is written into
//! the scratch area and loaded under its own names, the code or command
//! runs under a hard timeout, and the designated result variable is read
//! back from a result file. The sandbox is destroyed on every exit path.

use serde_json::{Map, Value};
use std::sync::Arc;

use cowork_core::{
    config::SandboxConfig,
    types::{SandboxKind, SandboxMode, SandboxRequest, SandboxResult},
};

use crate::engine::{EngineSettings, ExecResult, SandboxEngine, SandboxId};

const CONTEXT_FILE: &str = ".cowork_context.json";
const RESULT_FILE: &str = ".cowork_result.json";
const PYTHON_SCRIPT: &str = "main.py";
const SHELL_SCRIPT: &str = "main.sh";

/// Environment names never overwritten by context values.
const RESERVED_SHELL_NAMES: &[&str] = &["PATH", "HOME", "IFS", "PWD", "SHELL", "USER"];

/// Destroys a sandbox when dropped unless disarmed.
///
/// Covers the path where the run future itself is dropped mid-flight.
struct SandboxGuard {
    engine: Arc<dyn SandboxEngine>,
    id: Option<SandboxId>,
}

impl SandboxGuard {
    fn new(engine: Arc<dyn SandboxEngine>, id: SandboxId) -> Self {
        Self {
            engine,
            id: Some(id),
        }
    }

    async fn release(mut self) {
        if let Some(id) = self.id.take() {
            if let Err(e) = self.engine.destroy(&id).await {
                tracing::warn!(sandbox_id = %id, error = %e, "Failed to destroy sandbox");
            }
        }
    }
}

impl Drop for SandboxGuard {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        let engine = self.engine.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = engine.destroy(&id).await {
                        tracing::warn!(sandbox_id = %id, error = %e, "Failed to destroy abandoned sandbox");
                    }
                });
            }
            Err(_) => tracing::warn!(sandbox_id = %id, "Sandbox leaked: no runtime to destroy it"),
        }
    }
}

/// Executes sandbox requests against an isolated and/or permissive engine.
pub struct SandboxExecutor {
    isolated: Option<Arc<dyn SandboxEngine>>,
    permissive: Option<Arc<dyn SandboxEngine>>,
    settings: EngineSettings,
    python_bin: String,
    result_variable: String,
}

impl SandboxExecutor {
    /// Executor without engines; add them with the `with_*` methods.
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            isolated: None,
            permissive: None,
            settings: EngineSettings::from(config),
            python_bin: config.python_bin.clone(),
            result_variable: config.result_variable.clone(),
        }
    }

    /// Register the isolated engine.
    pub fn with_isolated(mut self, engine: Arc<dyn SandboxEngine>) -> Self {
        self.isolated = Some(engine);
        self
    }

    /// Register the permissive engine.
    pub fn with_permissive(mut self, engine: Arc<dyn SandboxEngine>) -> Self {
        self.permissive = Some(engine);
        self
    }

    /// Isolated when an isolated engine is configured.
    pub fn default_mode(&self) -> SandboxMode {
        if self.isolated.is_some() {
            SandboxMode::Isolated
        } else {
            SandboxMode::Permissive
        }
    }

    fn engine_for(&self, mode: SandboxMode) -> Option<Arc<dyn SandboxEngine>> {
        match mode {
            SandboxMode::Isolated => self.isolated.clone(),
            // Stricter isolation is always acceptable.
            SandboxMode::Permissive => self.permissive.clone().or_else(|| self.isolated.clone()),
        }
    }

    /// Run one unit of work. Never fails: every failure is in the result.
    pub async fn run(&self, request: SandboxRequest) -> SandboxResult {
        let Some(engine) = self.engine_for(request.mode) else {
            return SandboxResult::failed(format!(
                "no {} sandbox engine is available",
                request.mode.as_str()
            ));
        };

        let id = match engine.create(&self.settings).await {
            Ok(id) => id,
            Err(e) => return SandboxResult::failed(e.to_string()),
        };
        let guard = SandboxGuard::new(engine.clone(), id.clone());

        tracing::debug!(
            sandbox_id = %id,
            mode = request.mode.as_str(),
            kind = ?request.kind,
            timeout_ms = request.timeout.as_millis() as u64,
            "Running unit of work"
        );

        let result = self.run_in(engine.as_ref(), &id, &request).await;
        guard.release().await;
        result
    }

    async fn run_in(
        &self,
        engine: &dyn SandboxEngine,
        id: &SandboxId,
        request: &SandboxRequest,
    ) -> SandboxResult {
        let context = sanitize_context(&request.context);
        let context_json = match serde_json::to_vec(&Value::Object(context.clone())) {
            Ok(bytes) => bytes,
            Err(e) => return SandboxResult::failed(format!("cannot serialise context: {}", e)),
        };
        if let Err(e) = engine.write_file(id, CONTEXT_FILE, &context_json).await {
            return SandboxResult::failed(e.to_string());
        }

        let (script_name, script, command) = match request.kind {
            SandboxKind::Code => (
                PYTHON_SCRIPT,
                self.python_script(&request.source),
                format!("{} {}", self.python_bin, PYTHON_SCRIPT),
            ),
            SandboxKind::Command => (
                SHELL_SCRIPT,
                self.shell_script(&context, &request.source),
                format!("sh {}", SHELL_SCRIPT),
            ),
        };
        if let Err(e) = engine.write_file(id, script_name, script.as_bytes()).await {
            return SandboxResult::failed(e.to_string());
        }

        let exec = match engine.exec(id, &command, request.timeout).await {
            Ok(exec) => exec,
            Err(e) => return SandboxResult::failed(e.to_string()),
        };

        if exec.timed_out {
            tracing::warn!(sandbox_id = %id, "Unit of work timed out");
            return SandboxResult::timed_out(request.timeout, exec.stdout, exec.stderr);
        }

        let value = self.read_result(engine, id, request.kind).await;
        let ExecResult {
            exit_code,
            stdout,
            stderr,
            ..
        } = exec;
        SandboxResult {
            value,
            stdout,
            stderr,
            exit_code: Some(exit_code),
            timed_out: false,
            error: None,
        }
    }

    async fn read_result(
        &self,
        engine: &dyn SandboxEngine,
        id: &SandboxId,
        kind: SandboxKind,
    ) -> Option<Value> {
        let bytes = engine.read_file(id, RESULT_FILE).await.ok()?;
        let text = String::from_utf8_lossy(&bytes);
        match kind {
            SandboxKind::Code => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Null) => None,
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::debug!(error = %e, "Result file is not JSON");
                    None
                }
            },
            SandboxKind::Command => {
                if text.is_empty() {
                    None
                } else {
                    Some(Value::String(text.into_owned()))
                }
            }
        }
    }

    fn python_script(&self, source: &str) -> String {
        let var = &self.result_variable;
        format!(
            "import json as _cw_json\n\
             with open('{ctx}') as _cw_f:\n    globals().update(_cw_json.load(_cw_f))\n\
             {var} = None\n\
             # --- user code ---\n\
             {source}\n\
             # --- end user code ---\n\
             with open('{res}', 'w') as _cw_f:\n    _cw_json.dump({var}, _cw_f, default=str)\n",
            ctx = CONTEXT_FILE,
            res = RESULT_FILE,
        )
    }

    fn shell_script(&self, context: &Map<String, Value>, source: &str) -> String {
        let mut script = String::new();
        for (name, value) in context {
            if RESERVED_SHELL_NAMES.contains(&name.as_str()) {
                continue;
            }
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            script.push_str(&format!("export {}={}\n", name, shell_quote(&text)));
        }
        script.push_str(&format!("unset {}\n", self.result_variable));
        script.push_str(source);
        script.push_str(&format!(
            "\n_cw_status=$?\nprintf '%s' \"${{{var}-}}\" > {res}\nexit $_cw_status\n",
            var = self.result_variable,
            res = RESULT_FILE,
        ));
        script
    }
}

/// Keep only names usable as identifiers, replacing other characters with `_`.
fn sanitize_context(context: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in context {
        let mut name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        if name.is_empty() {
            continue;
        }
        if name.starts_with(|c: char| c.is_ascii_digit()) {
            name.insert(0, '_');
        }
        out.entry(name).or_insert_with(|| value.clone());
    }
    out
}

pub(crate) fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}
