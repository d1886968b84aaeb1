use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

use crate::types::SandboxMode;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub executor: ExecutorConfig,
    pub agent: AgentConfig,
    pub sandbox: SandboxConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Run each wave concurrently; one step at a time when false.
    pub parallel: bool,
    /// Default per-step timeout.
    pub step_timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            step_timeout_secs: 600,
        }
    }
}

impl ExecutorConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    pub max_iterations: usize,
    pub max_consecutive_failures: usize,
    pub require_confirmation: bool,
    /// Observations are truncated to this many characters in the history.
    pub observation_limit: usize,
    /// Number of recent iterations serialised into each decision request.
    pub history_window: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_consecutive_failures: 3,
            require_confirmation: true,
            observation_limit: 1000,
            history_window: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SandboxConfig {
    /// `isolated` or `permissive`.
    pub mode: String,
    pub image: String,
    pub memory_limit_bytes: i64,
    pub cpu_quota: i64,
    pub pids_limit: i64,
    pub user: String,
    pub timeout_secs: u64,
    pub python_bin: String,
    pub result_variable: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            mode: "isolated".into(),
            image: "python:3.12-slim".into(),
            memory_limit_bytes: 256 * 1024 * 1024,
            cpu_quota: 100_000,
            pids_limit: 50,
            user: "1000:1000".into(),
            timeout_secs: 300,
            python_bin: "python3".into(),
            result_variable: "result".into(),
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn mode(&self) -> crate::Result<SandboxMode> {
        self.mode.parse()
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
}

impl EngineConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("COWORK_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map COWORK__AGENT__MAX_ITERATIONS=20 to agent.max_iterations
            .add_source(Environment::with_prefix("COWORK").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.executor.parallel);
        assert_eq!(config.agent.max_iterations, 15);
        assert_eq!(config.sandbox.pids_limit, 50);
        assert_eq!(config.sandbox.mode().unwrap(), SandboxMode::Isolated);
        assert_eq!(config.executor.step_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: EngineConfig = Config::builder()
            .add_source(config::File::from_str(
                "[agent]\nmax_iterations = 4\n[sandbox]\nmode = \"permissive\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.agent.max_iterations, 4);
        assert_eq!(config.agent.history_window, 5);
        assert_eq!(config.sandbox.mode().unwrap(), SandboxMode::Permissive);
    }
}
