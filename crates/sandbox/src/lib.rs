//! Sandboxed executor for the cowork engine.
//!
//! Every shell command or code snippet runs in its own sandbox with a
//! wall-clock timeout and a structured result-capture protocol.
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │  Plan executor / ReAct loop            │
//! │    ↓ SandboxRequest                    │
//! ├────────────────────────────────────────┤
//! │  SandboxExecutor                       │
//! │    context file, script, result file   │
//! ├────────────────────────────────────────┤
//! │  SandboxEngine                         │
//! │    DockerSandbox   (isolated)          │
//! │    ProcessSandbox  (permissive)        │
//! ├────────────────────────────────────────┤
//! │  Docker container                      │
//! │    /workspace  (tmpfs, writable)       │
//! │    No network, no root, no caps        │
//! └────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use cowork_sandbox::{DockerSandbox, ProcessSandbox, SandboxExecutor};
//!
//! let executor = SandboxExecutor::new(&config.sandbox)
//!     .with_isolated(Arc::new(DockerSandbox::new()?))
//!     .with_permissive(Arc::new(ProcessSandbox::new()));
//! let result = executor.run(SandboxRequest::code("result = 1 + 1", timeout)).await;
//! ```

pub mod engine;
pub mod runner;

pub use engine::{
    DockerSandbox, EngineSettings, ExecResult, MockSandbox, ProcessSandbox, SandboxEngine,
    SandboxId,
};
pub use runner::SandboxExecutor;
