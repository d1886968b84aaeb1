//! Core types, traits, and error definitions for the cowork engine.
//!
//! This crate provides the building blocks shared by the plan executor, the
//! ReAct loop, the sandbox and the capability registry.

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod mocks;
pub mod traits;
pub mod types;

pub use config::EngineConfig;
pub use context::ContextStore;
pub use error::{Error, Result};
pub use events::*;
pub use traits::*;
pub use types::*;
