//! Controller traits.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::AgentState;

/// Drives a free-text request to completion.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Run until completion, failure, the iteration cap or cancellation.
    async fn run(&self, goal: &str, cancel: CancellationToken) -> Result<AgentState>;
}
