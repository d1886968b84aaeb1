//! Core traits, one module per seam:
//! - `skills`: Tool, ToolRegistry
//! - `llm`: LlmClient
//! - `events`: ProgressSink
//! - `governance`: ConfirmationGate
//! - `controller`: Controller

pub mod controller;
pub mod events;
pub mod governance;
pub mod llm;
pub mod skills;

pub use controller::*;
pub use events::*;
pub use governance::*;
pub use llm::*;
pub use skills::*;
