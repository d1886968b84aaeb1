//! Sandbox execution engines.
//!
//! This module provides the `SandboxEngine` trait and three backends:
//! a Docker engine (isolated) using the `bollard` crate, a host subprocess
//! engine (permissive) for environments without Docker, and an in-memory
//! mock for tests.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use cowork_core::{config::SandboxConfig, types::SandboxMode, Error, Result};

use crate::runner::shell_quote;

/// Ceiling for moving one file in or out of a container.
const FILE_TRANSFER_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Sandbox Types
// =============================================================================

/// Unique identifier for a sandbox instance.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SandboxId(pub String);

impl SandboxId {
    fn generate(prefix: &str) -> Self {
        Self(format!("{}-{}", prefix, uuid::Uuid::new_v4()))
    }
}

impl std::fmt::Display for SandboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resource ceilings and identity used when creating a sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Docker image to use.
    pub image: String,
    /// Maximum memory in bytes.
    pub memory_limit: i64,
    /// CPU quota per 100ms period.
    pub cpu_quota: i64,
    /// Maximum number of processes.
    pub pids_limit: i64,
    /// Unprivileged `uid:gid` to run as.
    pub user: String,
    /// Working directory inside the container.
    pub workdir: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&SandboxConfig::default())
    }
}

impl From<&SandboxConfig> for EngineSettings {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            image: config.image.clone(),
            memory_limit: config.memory_limit_bytes,
            cpu_quota: config.cpu_quota,
            pids_limit: config.pids_limit,
            user: config.user.clone(),
            workdir: "/workspace".to_string(),
        }
    }
}

/// Result of executing a command in the sandbox.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecResult {
    /// Exit code of the command.
    pub exit_code: i64,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Whether the command timed out.
    pub timed_out: bool,
}

impl ExecResult {
    /// Whether the execution was successful (exit code 0, no timeout).
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    fn timed_out(stdout: String, stderr: String, timeout: Duration) -> Self {
        Self {
            exit_code: -1,
            stdout,
            stderr: format!("{}\n[Execution timed out after {:?}]", stderr, timeout),
            timed_out: true,
        }
    }
}

// =============================================================================
// Sandbox Engine Trait
// =============================================================================

/// Trait for sandbox execution backends.
///
/// A sandbox is a scratch area plus an execution identity. Files are
/// addressed relative to the scratch area, and commands run with it as the
/// working directory.
#[async_trait]
pub trait SandboxEngine: Send + Sync {
    /// Isolation level this engine provides.
    fn mode(&self) -> SandboxMode;

    /// Create a new sandbox.
    async fn create(&self, settings: &EngineSettings) -> Result<SandboxId>;

    /// Execute a shell command inside the sandbox.
    async fn exec(&self, id: &SandboxId, command: &str, timeout: Duration) -> Result<ExecResult>;

    /// Write a file into the sandbox at the given path (relative to workdir).
    async fn write_file(&self, id: &SandboxId, path: &str, content: &[u8]) -> Result<()>;

    /// Read a file from the sandbox at the given path (relative to workdir).
    async fn read_file(&self, id: &SandboxId, path: &str) -> Result<Vec<u8>>;

    /// Destroy the sandbox and clean up resources.
    async fn destroy(&self, id: &SandboxId) -> Result<()>;

    /// Check if the sandbox backend is available (e.g., Docker daemon running).
    async fn is_available(&self) -> bool;
}

// =============================================================================
// Docker Sandbox Implementation
// =============================================================================

/// Docker-based sandbox engine using the `bollard` crate.
///
/// Creates one container per sandbox with:
/// - No network
/// - Read-only root filesystem (writable tmpfs `/workspace` only)
/// - Memory, CPU and process-count limits
/// - Non-root user, all capabilities dropped, no privilege escalation
pub struct DockerSandbox {
    docker: bollard::Docker,
    workdirs: DashMap<SandboxId, String>,
}

impl DockerSandbox {
    /// Create a new Docker sandbox engine connecting to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker = bollard::Docker::connect_with_local_defaults().map_err(|e| {
            Error::sandbox(format!(
                "Failed to connect to Docker daemon: {}. Is Docker running?",
                e
            ))
        })?;
        Ok(Self::from_client(docker))
    }

    /// Create from an existing bollard Docker client.
    pub fn from_client(docker: bollard::Docker) -> Self {
        Self {
            docker,
            workdirs: DashMap::new(),
        }
    }

    fn workdir(&self, id: &SandboxId) -> String {
        self.workdirs
            .get(id)
            .map(|w| w.value().clone())
            .unwrap_or_else(|| "/workspace".to_string())
    }
}

#[async_trait]
impl SandboxEngine for DockerSandbox {
    fn mode(&self) -> SandboxMode {
        SandboxMode::Isolated
    }

    async fn create(&self, settings: &EngineSettings) -> Result<SandboxId> {
        use bollard::container::{Config, CreateContainerOptions};
        use bollard::models::{HostConfig, Mount, MountTypeEnum};

        let sandbox_id = SandboxId::generate("cowork-sandbox");

        let host_config = HostConfig {
            memory: Some(settings.memory_limit),
            cpu_quota: Some(settings.cpu_quota),
            cpu_period: Some(100_000),
            network_mode: Some("none".to_string()),
            // The only writable path
            mounts: Some(vec![Mount {
                target: Some(settings.workdir.clone()),
                typ: Some(MountTypeEnum::TMPFS),
                tmpfs_options: Some(bollard::models::MountTmpfsOptions {
                    size_bytes: Some(settings.memory_limit / 2),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            readonly_rootfs: Some(true),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges:true".to_string()]),
            pids_limit: Some(settings.pids_limit),
            ulimits: Some(vec![bollard::models::ResourcesUlimits {
                name: Some("nofile".to_string()),
                soft: Some(1024),
                hard: Some(2048),
            }]),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(settings.image.clone()),
            working_dir: Some(settings.workdir.clone()),
            user: Some(settings.user.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            network_disabled: Some(true),
            host_config: Some(host_config),
            labels: Some(std::collections::HashMap::from([(
                "managed-by".to_string(),
                "cowork-sandbox".to_string(),
            )])),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: sandbox_id.0.as_str(),
            platform: None,
        };

        self.docker
            .create_container(Some(options), container_config)
            .await
            .map_err(|e| Error::sandbox(format!("Failed to create sandbox container: {}", e)))?;

        if let Err(e) = self
            .docker
            .start_container::<String>(&sandbox_id.0, None)
            .await
        {
            let _ = self.destroy(&sandbox_id).await;
            return Err(Error::sandbox(format!(
                "Failed to start sandbox container: {}",
                e
            )));
        }

        self.workdirs
            .insert(sandbox_id.clone(), settings.workdir.clone());
        tracing::debug!(sandbox_id = %sandbox_id, image = %settings.image, "Sandbox container created and started");

        Ok(sandbox_id)
    }

    async fn exec(&self, id: &SandboxId, command: &str, timeout: Duration) -> Result<ExecResult> {
        use bollard::exec::{CreateExecOptions, StartExecResults};

        let workdir = self.workdir(id);
        let exec_options = CreateExecOptions {
            cmd: Some(vec!["sh", "-c", command]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(workdir.as_str()),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(&id.0, exec_options)
            .await
            .map_err(|e| Error::sandbox(format!("Failed to create exec in sandbox: {}", e)))?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| Error::sandbox(format!("Failed to start exec in sandbox: {}", e)))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } = start_result {
            use futures::StreamExt;

            let collect_future = async {
                while let Some(msg) = output.next().await {
                    match msg {
                        Ok(bollard::container::LogOutput::StdOut { message }) => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(bollard::container::LogOutput::StdErr { message }) => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(_) => {}
                        Err(e) => {
                            stderr.push_str(&format!("\n[sandbox error: {}]", e));
                            break;
                        }
                    }
                }
            };

            if tokio::time::timeout(timeout, collect_future).await.is_err() {
                tracing::warn!(sandbox = %id, "Sandbox exec timed out");
                return Ok(ExecResult::timed_out(stdout, stderr, timeout));
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| Error::sandbox(format!("Failed to inspect exec result: {}", e)))?;

        Ok(ExecResult {
            exit_code: inspect.exit_code.unwrap_or(-1),
            stdout,
            stderr,
            timed_out: false,
        })
    }

    async fn write_file(&self, id: &SandboxId, path: &str, content: &[u8]) -> Result<()> {
        use bollard::container::LogOutput;
        use bollard::exec::{CreateExecOptions, StartExecResults};
        use futures::StreamExt;
        use tokio::io::AsyncWriteExt;

        // Content goes through stdin; argv is bounded by the kernel.
        let command = upload_command(&self.workdir(id), path);
        let exec = self
            .docker
            .create_exec(
                &id.0,
                CreateExecOptions {
                    cmd: Some(vec!["sh", "-c", command.as_str()]),
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::sandbox(format!("Failed to create upload exec: {}", e)))?;

        let StartExecResults::Attached {
            mut output,
            mut input,
        } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| Error::sandbox(format!("Failed to start upload exec: {}", e)))?
        else {
            return Err(Error::sandbox("Upload exec did not attach"));
        };

        let transfer = async {
            input.write_all(content).await?;
            // EOF on stdin ends `cat`.
            input.shutdown().await?;
            let mut stderr = String::new();
            while let Some(msg) = output.next().await {
                match msg {
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message))
                    }
                    Ok(_) => {}
                    Err(e) => return Err(std::io::Error::other(e)),
                }
            }
            Ok::<_, std::io::Error>(stderr)
        };
        let stderr = tokio::time::timeout(FILE_TRANSFER_TIMEOUT, transfer)
            .await
            .map_err(|_| Error::sandbox(format!("Timed out writing file '{}' in sandbox", path)))?
            .map_err(|e| Error::sandbox(format!("Failed to write file '{}' in sandbox: {}", path, e)))?;

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| Error::sandbox(format!("Failed to inspect upload exec: {}", e)))?;
        if inspect.exit_code != Some(0) {
            return Err(Error::sandbox(format!(
                "Failed to write file '{}' in sandbox: {}",
                path, stderr
            )));
        }

        Ok(())
    }

    async fn read_file(&self, id: &SandboxId, path: &str) -> Result<Vec<u8>> {
        let command = format!("cat {}", shell_quote(&sandbox_path(&self.workdir(id), path)));
        let result = self.exec(id, &command, FILE_TRANSFER_TIMEOUT).await?;

        if !result.success() {
            return Err(Error::sandbox(format!(
                "Failed to read file '{}' in sandbox: {}",
                path, result.stderr
            )));
        }

        Ok(result.stdout.into_bytes())
    }

    async fn destroy(&self, id: &SandboxId) -> Result<()> {
        use bollard::container::RemoveContainerOptions;

        self.workdirs.remove(id);
        // Force removal kills anything still running, including timed-out work.
        self.docker
            .remove_container(
                &id.0,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| Error::sandbox(format!("Failed to remove sandbox container: {}", e)))?;

        tracing::debug!(sandbox_id = %id, "Sandbox container destroyed");
        Ok(())
    }

    async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }
}

fn sandbox_path(workdir: &str, path: &str) -> String {
    format!("{}/{}", workdir.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Shell command that stores stdin at `path` under `workdir`.
fn upload_command(workdir: &str, path: &str) -> String {
    format!("cat > {}", shell_quote(&sandbox_path(workdir, path)))
}

// =============================================================================
// Process Sandbox (permissive fallback)
// =============================================================================

/// Host subprocess engine.
///
/// Each sandbox is a fresh temporary directory used as the working
/// directory. Each command runs in its own process group, which is killed
/// when the command finishes or times out. Filesystem and network access
/// are NOT restricted: only use it where the host already trusts the caller.
#[derive(Default)]
pub struct ProcessSandbox {
    dirs: DashMap<SandboxId, Arc<tempfile::TempDir>>,
}

impl ProcessSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn dir(&self, id: &SandboxId) -> Result<Arc<tempfile::TempDir>> {
        self.dirs
            .get(id)
            .map(|d| d.value().clone())
            .ok_or_else(|| Error::sandbox(format!("Unknown sandbox '{}'", id)))
    }

    fn resolve_path(dir: &Path, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(Error::sandbox(format!("Path escapes sandbox: {}", path)));
        }
        Ok(dir.join(relative))
    }

    /// Number of live scratch directories.
    pub fn active(&self) -> usize {
        self.dirs.len()
    }
}

#[async_trait]
impl SandboxEngine for ProcessSandbox {
    fn mode(&self) -> SandboxMode {
        SandboxMode::Permissive
    }

    async fn create(&self, _settings: &EngineSettings) -> Result<SandboxId> {
        let dir = tempfile::Builder::new()
            .prefix("cowork-sandbox-")
            .tempdir()
            .map_err(|e| Error::sandbox(format!("Failed to create scratch directory: {}", e)))?;
        let id = SandboxId::generate("cowork-process");
        tracing::debug!(sandbox_id = %id, dir = %dir.path().display(), "Process sandbox created");
        self.dirs.insert(id.clone(), Arc::new(dir));
        Ok(id)
    }

    async fn exec(&self, id: &SandboxId, command: &str, timeout: Duration) -> Result<ExecResult> {
        let dir = self.dir(id)?;

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| Error::sandbox(format!("Failed to spawn process: {}", e)))?;
        // Everything the command started dies with it, on any exit path.
        let _group = ProcessGroup(child.id());

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(ExecResult {
                exit_code: output.status.code().map(i64::from).unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                timed_out: false,
            }),
            Ok(Err(e)) => Err(Error::sandbox(format!("Failed to wait for process: {}", e))),
            Err(_) => {
                tracing::warn!(sandbox = %id, "Process sandbox exec timed out");
                Ok(ExecResult::timed_out(String::new(), String::new(), timeout))
            }
        }
    }

    async fn write_file(&self, id: &SandboxId, path: &str, content: &[u8]) -> Result<()> {
        let dir = self.dir(id)?;
        let target = Self::resolve_path(dir.path(), path)?;
        tokio::fs::write(&target, content)
            .await
            .map_err(|e| Error::sandbox(format!("Failed to write file '{}': {}", path, e)))
    }

    async fn read_file(&self, id: &SandboxId, path: &str) -> Result<Vec<u8>> {
        let dir = self.dir(id)?;
        let target = Self::resolve_path(dir.path(), path)?;
        tokio::fs::read(&target)
            .await
            .map_err(|e| Error::sandbox(format!("Failed to read file '{}': {}", path, e)))
    }

    async fn destroy(&self, id: &SandboxId) -> Result<()> {
        // Dropping the last handle removes the directory.
        if self.dirs.remove(id).is_some() {
            tracing::debug!(sandbox_id = %id, "Process sandbox destroyed");
        }
        Ok(())
    }

    async fn is_available(&self) -> bool {
        true
    }
}

/// Process group led by a spawned `sh`, killed on drop.
struct ProcessGroup(Option<u32>);

#[cfg(unix)]
impl Drop for ProcessGroup {
    fn drop(&mut self) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pgid) = self.0.and_then(|p| i32::try_from(p).ok()) {
            // ESRCH when every member has already exited.
            if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
                tracing::trace!(pgid, error = %e, "Process group already gone");
            }
        }
    }
}

// =============================================================================
// Mock Sandbox (for testing without Docker)
// =============================================================================

/// In-memory mock sandbox for unit testing.
///
/// `exec` replays scripted results; an optional delay is applied under the
/// requested timeout so timeouts can be exercised deterministically.
#[derive(Default)]
pub struct MockSandbox {
    pub exec_responses: Arc<tokio::sync::Mutex<Vec<ExecResult>>>,
    pub files: Arc<tokio::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>>,
    pub commands: Arc<tokio::sync::Mutex<Vec<String>>>,
    pub destroyed: Arc<tokio::sync::Mutex<Vec<SandboxId>>>,
    delay: Option<Duration>,
    created: std::sync::atomic::AtomicUsize,
}

impl MockSandbox {
    /// Create a mock sandbox with predefined exec responses.
    pub fn new(responses: Vec<ExecResult>) -> Self {
        Self {
            exec_responses: Arc::new(tokio::sync::Mutex::new(responses)),
            ..Default::default()
        }
    }

    /// Make every exec take this long.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of sandboxes created so far.
    pub fn created(&self) -> usize {
        self.created.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxEngine for MockSandbox {
    fn mode(&self) -> SandboxMode {
        SandboxMode::Isolated
    }

    async fn create(&self, _settings: &EngineSettings) -> Result<SandboxId> {
        self.created
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(SandboxId::generate("mock-sandbox"))
    }

    async fn exec(&self, _id: &SandboxId, command: &str, timeout: Duration) -> Result<ExecResult> {
        self.commands.lock().await.push(command.to_string());
        if let Some(delay) = self.delay {
            if tokio::time::timeout(timeout, tokio::time::sleep(delay))
                .await
                .is_err()
            {
                return Ok(ExecResult::timed_out(String::new(), String::new(), timeout));
            }
        }

        let mut responses = self.exec_responses.lock().await;
        if responses.is_empty() {
            Ok(ExecResult::ok("[mock] command executed"))
        } else {
            Ok(responses.remove(0))
        }
    }

    async fn write_file(&self, _id: &SandboxId, path: &str, content: &[u8]) -> Result<()> {
        self.files
            .lock()
            .await
            .insert(path.to_string(), content.to_vec());
        Ok(())
    }

    async fn read_file(&self, _id: &SandboxId, path: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| Error::sandbox(format!("File not found in mock sandbox: {}", path)))
    }

    async fn destroy(&self, id: &SandboxId) -> Result<()> {
        self.destroyed.lock().await.push(id.clone());
        Ok(())
    }

    async fn is_available(&self) -> bool {
        true
    }
}

// =============================================================================
// Tests
// =============================================================================
