//! Governance traits.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::ConfirmationRequest;

/// Gate that suspends a destructive action until the user answers.
#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    /// Returns `true` to proceed, `false` to decline.
    async fn confirm(&self, request: &ConfirmationRequest) -> Result<bool>;
}
