use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

// =============================================================================
// Sandbox Request / Result
// =============================================================================

/// What kind of unit of work a sandbox request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxKind {
    /// Interpreted code (Python).
    Code,
    /// A shell command.
    Command,
}

/// Isolation level requested for a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SandboxMode {
    /// Container isolation: no network, read-only root, resource ceilings.
    #[default]
    Isolated,
    /// Host subprocess. Same timeout and capture contract, no filesystem or
    /// network isolation.
    Permissive,
}

impl SandboxMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Isolated => "isolated",
            Self::Permissive => "permissive",
        }
    }
}

impl std::str::FromStr for SandboxMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "isolated" | "docker" => Ok(Self::Isolated),
            "permissive" | "local" | "process" => Ok(Self::Permissive),
            other => Err(crate::Error::Config(format!("unknown sandbox mode '{}'", other))),
        }
    }
}

/// A unit of work for the sandboxed executor.
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    pub kind: SandboxKind,
    /// Code or command text.
    pub source: String,
    /// Named values visible to the unit of work.
    pub context: Map<String, Value>,
    pub timeout: Duration,
    pub mode: SandboxMode,
}

impl SandboxRequest {
    /// A Python request with an empty context.
    pub fn code(source: impl Into<String>, timeout: Duration) -> Self {
        Self {
            kind: SandboxKind::Code,
            source: source.into(),
            context: Map::new(),
            timeout,
            mode: SandboxMode::default(),
        }
    }

    /// A shell request with an empty context.
    pub fn command(source: impl Into<String>, timeout: Duration) -> Self {
        Self {
            kind: SandboxKind::Command,
            source: source.into(),
            context: Map::new(),
            timeout,
            mode: SandboxMode::default(),
        }
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }

    pub fn with_mode(mut self, mode: SandboxMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Everything captured from one unit of work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SandboxResult {
    /// The designated result variable, `None` when unset.
    pub value: Option<Value>,
    /// Raw standard output, for display only.
    pub stdout: String,
    /// Raw standard error, for display only.
    pub stderr: String,
    pub exit_code: Option<i64>,
    pub timed_out: bool,
    /// Infrastructure failure (engine unavailable, scratch setup failed...).
    pub error: Option<String>,
}

impl SandboxResult {
    /// A result describing a failure before or around the unit of work.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// A result for a unit of work killed at its deadline.
    pub fn timed_out(timeout: Duration, stdout: String, stderr: String) -> Self {
        Self {
            value: None,
            stdout,
            stderr,
            exit_code: None,
            timed_out: true,
            error: Some(format!("timed out after {:?}", timeout)),
        }
    }

    pub fn is_success(&self) -> bool {
        !self.timed_out && self.error.is_none() && self.exit_code == Some(0)
    }

    /// Human-readable failure, `None` on success.
    pub fn error_message(&self) -> Option<String> {
        if self.is_success() {
            return None;
        }
        if self.timed_out {
            return Some(
                self.error
                    .clone()
                    .unwrap_or_else(|| "timed out".to_string()),
            );
        }
        if let Some(err) = &self.error {
            return Some(err.clone());
        }
        let stderr = self.stderr.trim();
        let code = self
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        if stderr.is_empty() {
            Some(format!("exited with status {}", code))
        } else {
            Some(format!("exited with status {}: {}", code, stderr))
        }
    }

    /// The structured value, falling back to trimmed stdout.
    pub fn output(&self) -> Value {
        match &self.value {
            Some(v) if !v.is_null() => v.clone(),
            _ => Value::String(self.stdout.trim_end().to_string()),
        }
    }
}
