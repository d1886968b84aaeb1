use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::StepStatus;

/// Status carried by a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Pending,
    Running,
    Success,
    Error,
    Skipped,
}

impl From<StepStatus> for ProgressStatus {
    fn from(status: StepStatus) -> Self {
        match status {
            StepStatus::Success => Self::Success,
            StepStatus::Error => Self::Error,
            StepStatus::Skipped => Self::Skipped,
        }
    }
}

impl std::fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// A state transition of one step or iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Step id, or `iteration-{n}` in agentic mode.
    pub id: String,
    pub status: ProgressStatus,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(id: impl Into<String>, status: ProgressStatus, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status,
            description: description.into(),
            timestamp: Utc::now(),
        }
    }

    /// Id used for events of a ReAct iteration.
    pub fn iteration_id(iteration: usize) -> String {
        format!("iteration-{}", iteration)
    }
}
