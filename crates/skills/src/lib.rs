//! Capability registry and built-in tools for the cowork engine.
//!
//! This crate provides:
//! - `DefaultToolRegistry`, the name → tool lookup shared by both execution modes
//! - Built-in tools (`echo`, `chat_op`)

pub mod builtin;
pub mod registry;

pub use builtin::*;
pub use registry::DefaultToolRegistry;
