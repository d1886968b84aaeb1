#![deny(unused)]
//! Governance for the cowork engine.
//!
//! This crate provides:
//! - Destructive-operation analysis
//! - Confirmation gates
//! - Logging and distributed tracing
//! - Prometheus metrics

pub mod approval;
pub mod metrics;
pub mod safety;
pub mod tracing_layer;

pub use approval::{AutoApproveGate, ChannelConfirmationGate, PendingConfirmation};
pub use metrics::{record_iteration, record_sandbox, record_step, setup_metrics_recorder};
pub use safety::{
    affected_paths, analyze_command, analyze_python_code, confirmation_message,
    confirmation_request, Assessment, DangerLevel, SafetyAnalyzer,
};
pub use tracing_layer::configure_tracing;
