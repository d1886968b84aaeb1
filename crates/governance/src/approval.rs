//! Confirmation gate implementations.
//!
//! Destructive agent actions pause here until a human answers.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};

use cowork_core::{traits::ConfirmationGate, types::ConfirmationRequest, Error, Result};

// =============================================================================
// Channel-Based Confirmation Gate
// =============================================================================

/// A confirmation waiting for an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingConfirmation {
    pub id: String,
    pub request: ConfirmationRequest,
}

/// Gate that publishes requests to listeners and waits for `submit`.
///
/// Unanswered requests are declined once the timeout elapses.
pub struct ChannelConfirmationGate {
    pending: DashMap<String, oneshot::Sender<bool>>,
    request_tx: broadcast::Sender<PendingConfirmation>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl ChannelConfirmationGate {
    pub fn new() -> Self {
        let (request_tx, _) = broadcast::channel(32);
        Self {
            pending: DashMap::new(),
            request_tx,
            next_id: AtomicU64::new(1),
            timeout: Duration::from_secs(300),
        }
    }

    /// Set the answer timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Subscribe to new confirmation requests.
    pub fn subscribe(&self) -> broadcast::Receiver<PendingConfirmation> {
        self.request_tx.subscribe()
    }

    /// Answer a pending request.
    pub async fn submit(&self, id: &str, approved: bool) -> Result<()> {
        let (_, sender) = self
            .pending
            .remove(id)
            .ok_or_else(|| Error::internal(format!("No pending confirmation with ID: {}", id)))?;
        sender
            .send(approved)
            .map_err(|_| Error::internal("Confirmation channel closed (request may have timed out)"))
    }

    /// Ids of requests still waiting.
    pub async fn list_pending(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

impl Default for ChannelConfirmationGate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfirmationGate for ChannelConfirmationGate {
    async fn confirm(&self, request: &ConfirmationRequest) -> Result<bool> {
        let id = format!("confirm-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);
        // Also covers the caller dropping this future mid-wait.
        let _pending = PendingGuard {
            pending: &self.pending,
            id: id.clone(),
        };

        // No subscribers is fine; the request still times out.
        let _ = self.request_tx.send(PendingConfirmation {
            id: id.clone(),
            request: request.clone(),
        });

        tracing::info!(
            id = %id,
            command = ?request.command,
            "Waiting for confirmation (timeout: {:?})",
            self.timeout
        );

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(approved)) => Ok(approved),
            Ok(Err(_)) => Err(Error::internal("Confirmation channel closed unexpectedly")),
            Err(_) => {
                tracing::warn!(id = %id, "Confirmation timed out, declining");
                Ok(false)
            }
        }
    }
}

struct PendingGuard<'a> {
    pending: &'a DashMap<String, oneshot::Sender<bool>>,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

// =============================================================================
// Auto-Approve Gate (for development/testing)
// =============================================================================

/// Gate that approves everything. Development use only.
pub struct AutoApproveGate;

#[async_trait]
impl ConfirmationGate for AutoApproveGate {
    async fn confirm(&self, request: &ConfirmationRequest) -> Result<bool> {
        tracing::warn!(
            command = ?request.command,
            "AUTO-APPROVED (development mode, do NOT use in production)"
        );
        Ok(true)
    }
}

// =============================================================================
// Tests
// =============================================================================
