//! Error types for the cowork engine.

use thiserror::Error;

use crate::types::FailureKind;

/// Result type alias using the engine's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the cowork engine.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Structural Errors (abort the run before any step executes)
    // =========================================================================
    #[error("Invalid plan: {0}")]
    Validation(String),

    #[error("Plan generation failed: {0}")]
    PlanGeneration(String),

    #[error("Invalid decision from reasoning service: {0}")]
    Decision(String),

    #[error("Agent loop exceeded max iterations: {0}")]
    IterationLimitExceeded(usize),

    // =========================================================================
    // Step-local Errors (recorded on a StepResult)
    // =========================================================================
    #[error("Unresolved dependency: {0}")]
    Dependency(String),

    #[error("Capability failed: {0}")]
    Capability(String),

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    // =========================================================================
    // Context Store Errors
    // =========================================================================
    #[error("Context key already written: {0}")]
    ContextKeyExists(String),

    #[error("Context key not found: {0}")]
    ContextKeyNotFound(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a plan validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a plan generation error.
    pub fn plan_generation(msg: impl Into<String>) -> Self {
        Self::PlanGeneration(msg.into())
    }

    /// Create a decision error.
    pub fn decision(msg: impl Into<String>) -> Self {
        Self::Decision(msg.into())
    }

    /// Create a dependency error.
    pub fn dependency(msg: impl Into<String>) -> Self {
        Self::Dependency(msg.into())
    }

    /// Create a capability error.
    pub fn capability(msg: impl Into<String>) -> Self {
        Self::Capability(msg.into())
    }

    /// Create an unknown capability error.
    pub fn unknown_capability(name: impl Into<String>) -> Self {
        Self::UnknownCapability(name.into())
    }

    /// Create a sandbox error.
    pub fn sandbox(msg: impl Into<String>) -> Self {
        Self::Sandbox(msg.into())
    }

    /// Create a timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Classify a step-local error for reporting.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Dependency(_) | Self::ContextKeyNotFound(_) => FailureKind::Dependency,
            Self::Sandbox(_) => FailureKind::Sandbox,
            Self::Timeout(_) => FailureKind::Timeout,
            Self::Cancelled(_) => FailureKind::Cancelled,
            _ => FailureKind::Capability,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_classification() {
        assert_eq!(Error::dependency("x").failure_kind(), FailureKind::Dependency);
        assert_eq!(Error::timeout("x").failure_kind(), FailureKind::Timeout);
        assert_eq!(Error::sandbox("x").failure_kind(), FailureKind::Sandbox);
        assert_eq!(
            Error::unknown_capability("x").failure_kind(),
            FailureKind::Capability
        );
    }
}
