//! Sandbox integration tests.
//!
//! Runs the full pipeline SandboxExecutor → ProcessSandbox against the host
//! shell. The Docker case returns early without a daemon.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

use cowork_core::config::SandboxConfig;
use cowork_core::types::{SandboxMode, SandboxRequest};
use cowork_sandbox::{DockerSandbox, EngineSettings, ProcessSandbox, SandboxEngine, SandboxExecutor};

// =============================================================================
// Helpers
// =============================================================================

fn permissive() -> (SandboxExecutor, Arc<ProcessSandbox>) {
    let engine = Arc::new(ProcessSandbox::new());
    let executor = SandboxExecutor::new(&SandboxConfig::default()).with_permissive(engine.clone());
    (executor, engine)
}

fn context(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

// =============================================================================
// 1. Shell: context injection and result capture
// =============================================================================

#[tokio::test]
async fn test_shell_sees_context_and_sets_result() {
    let (executor, engine) = permissive();
    let request = SandboxRequest::command(
        "echo \"dir is $base_dir\"; result=\"$base_dir/Images\"",
        Duration::from_secs(10),
    )
    .with_context(context(&[("base_dir", json!("/home/u/Downloads"))]))
    .with_mode(SandboxMode::Permissive);

    let result = executor.run(request).await;

    assert!(result.is_success(), "unexpected failure: {:?}", result);
    assert_eq!(result.value, Some(json!("/home/u/Downloads/Images")));
    assert!(result.stdout.contains("dir is /home/u/Downloads"));
    assert_eq!(engine.active(), 0, "scratch area must be destroyed");
}

#[tokio::test]
async fn test_shell_unset_result_is_empty() {
    let (executor, _) = permissive();
    let request =
        SandboxRequest::command("echo hello", Duration::from_secs(10)).with_mode(SandboxMode::Permissive);

    let result = executor.run(request).await;

    assert!(result.is_success());
    assert_eq!(result.value, None);
    assert_eq!(result.stdout.trim(), "hello");
}

// =============================================================================
// 2. Failures are reported, never raised
// =============================================================================

#[tokio::test]
async fn test_shell_failure_keeps_exit_code() {
    let (executor, _) = permissive();
    let request = SandboxRequest::command("echo oops >&2; exit 3", Duration::from_secs(10))
        .with_mode(SandboxMode::Permissive);

    let result = executor.run(request).await;

    assert!(!result.is_success());
    assert_eq!(result.exit_code, Some(3));
    assert!(result.error_message().unwrap().contains("oops"));
}

#[tokio::test]
async fn test_sleep_past_timeout_is_timed_out() {
    let (executor, engine) = permissive();
    let request =
        SandboxRequest::command("sleep 5", Duration::from_millis(300)).with_mode(SandboxMode::Permissive);

    let started = std::time::Instant::now();
    let result = executor.run(request).await;

    assert!(result.timed_out);
    assert!(!result.is_success());
    assert!(result.value.is_none());
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(engine.active(), 0);
}

#[tokio::test]
async fn test_timed_out_work_leaves_no_background_process() {
    let scratch = tempfile::tempdir().unwrap();
    let marker = scratch.path().join("marker");
    let (executor, _) = permissive();
    // The subshell is a separate process that outlives a killed `sh`.
    let request = SandboxRequest::command(
        format!("( sleep 1; touch '{}' ) & wait", marker.display()),
        Duration::from_millis(300),
    )
    .with_mode(SandboxMode::Permissive);

    let result = executor.run(request).await;
    assert!(result.timed_out);

    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert!(!marker.exists(), "background process survived the timeout");
}

#[tokio::test]
async fn test_timed_out_python_is_killed() {
    if !python_available() {
        return;
    }
    let scratch = tempfile::tempdir().unwrap();
    let marker = scratch.path().join("marker");
    let (executor, _) = permissive();
    let request = SandboxRequest::code(
        format!(
            "import time\ntime.sleep(1.5)\nopen({:?}, 'w').write('late')",
            marker.display().to_string()
        ),
        Duration::from_millis(300),
    )
    .with_mode(SandboxMode::Permissive);

    let result = executor.run(request).await;
    assert!(result.timed_out);

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(!marker.exists(), "python kept running after the timeout");
}

#[tokio::test]
async fn test_each_request_gets_fresh_scratch_area() {
    let (executor, _) = permissive();
    let write = SandboxRequest::command("echo secret > leftover.txt", Duration::from_secs(10))
        .with_mode(SandboxMode::Permissive);
    assert!(executor.run(write).await.is_success());

    let read = SandboxRequest::command("test -f leftover.txt", Duration::from_secs(10))
        .with_mode(SandboxMode::Permissive);
    let result = executor.run(read).await;
    assert_eq!(result.exit_code, Some(1));
}

// =============================================================================
// 3. Python (skipped when no interpreter is installed)
// =============================================================================

#[tokio::test]
async fn test_python_result_variable() {
    if !python_available() {
        return;
    }
    let (executor, _) = permissive();
    let request = SandboxRequest::code(
        "result = {'imgs': [f['name'] for f in list_all if f['name'].endswith('.jpg')]}\nprint('sorted')",
        Duration::from_secs(20),
    )
    .with_context(context(&[(
        "list_all",
        json!([{"name": "a.jpg"}, {"name": "b.pdf"}]),
    )]))
    .with_mode(SandboxMode::Permissive);

    let result = executor.run(request).await;

    assert!(result.is_success(), "unexpected failure: {:?}", result);
    assert_eq!(result.value, Some(json!({"imgs": ["a.jpg"]})));
    assert_eq!(result.stdout.trim(), "sorted");
}

#[tokio::test]
async fn test_python_exception_is_error_without_value() {
    if !python_available() {
        return;
    }
    let (executor, _) = permissive();
    let request = SandboxRequest::code("result = 1\nraise ValueError('bad input')", Duration::from_secs(20))
        .with_mode(SandboxMode::Permissive);

    let result = executor.run(request).await;

    assert!(!result.is_success());
    assert!(result.value.is_none());
    assert!(result.stderr.contains("ValueError: bad input"));
}

// =============================================================================
// 4. Docker (skipped when no daemon or image is available)
// =============================================================================

#[tokio::test]
async fn test_docker_writes_file_larger_than_argv_limit() {
    let Ok(docker) = DockerSandbox::new() else {
        return;
    };
    if !docker.is_available().await {
        return;
    }
    let Ok(id) = docker.create(&EngineSettings::default()).await else {
        return;
    };

    // Well past the 128 KiB single-argument limit.
    let content = "x".repeat(512 * 1024);
    let written = docker.write_file(&id, "big.txt", content.as_bytes()).await;
    let size = docker
        .exec(&id, "wc -c < big.txt", Duration::from_secs(10))
        .await;
    docker.destroy(&id).await.unwrap();

    written.unwrap();
    assert_eq!(size.unwrap().stdout.trim(), "524288");
}
