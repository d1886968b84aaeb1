use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::events::ProgressEvent;

/// Sink for progress events, e.g. a CLI table or a WebSocket stream.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Emit an event.
    async fn emit(&self, event: ProgressEvent);
}

/// No-op implementation for testing/default.
pub struct NoOpProgressSink;

#[async_trait]
impl ProgressSink for NoOpProgressSink {
    async fn emit(&self, _event: ProgressEvent) {}
}

/// Forwards events into an unbounded channel.
pub struct ChannelProgressSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgressSink {
    /// Create a sink and the receiving half of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ProgressSink for ChannelProgressSink {
    async fn emit(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Progress receiver dropped");
        }
    }
}
