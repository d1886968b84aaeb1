//! Core type definitions for the cowork engine.
//!
//! Broken down into submodules by execution concern.

pub mod agent;
pub mod sandbox;
pub mod step;
pub mod tool;

pub use agent::*;
pub use sandbox::*;
pub use step::*;
pub use tool::*;
