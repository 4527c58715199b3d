//! Durable at-least-once message queue.
//!
//! The queue contract is deliberately small: durable `publish` plus
//! `subscribe` with consumer-side retry. Handlers must tolerate duplicate
//! deliveries; redelivery after a consumer death is bounded by a visibility
//! timeout.

mod config;
mod sqlite;
mod types;

pub use config::QueueConfig;
pub use sqlite::{DeadMessage, SqliteQueue};
pub use types::{
    CreateEpisodesMessage, PollEpisodesStatusMessage, RegenerateFeedsMessage,
    TOPIC_CREATE_EPISODES, TOPIC_POLL_STATUS, TOPIC_REGENERATE_FEEDS,
};

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

/// Error type for queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Queue storage failed.
    #[error("Queue storage error: {0}")]
    Storage(String),

    /// Message payload could not be encoded.
    #[error("Failed to encode payload: {0}")]
    Encode(String),
}

/// Error returned by message handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Handler was interrupted by shutdown; the message stays deliverable
    /// without consuming a retry attempt.
    #[error("Handler cancelled by shutdown")]
    Cancelled,

    /// Message payload could not be decoded. Retrying cannot help, but the
    /// retry schedule still applies so the message ends up dead-lettered
    /// for operator inspection rather than silently dropped.
    #[error("Failed to decode payload: {0}")]
    Decode(String),

    /// Handler failed; the queue's retry policy applies.
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// Wrap any displayable error as a retryable handler failure.
    pub fn failed(e: impl std::fmt::Display) -> Self {
        HandlerError::Failed(e.to_string())
    }
}

/// Consumer-side message handler.
///
/// Invoked at least once per message. The shutdown signal must be honored
/// by any long blocking point inside the handler (sleeps, slow calls).
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: &[u8], shutdown: &ShutdownSignal) -> Result<(), HandlerError>;
}

/// Durable publish/subscribe queue.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Enqueue a message durably. Returns only after the message is
    /// persisted.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), QueueError>;

    /// Register a handler for a topic. Spawns a consumer loop; multiple
    /// subscriptions to the same topic load-balance deliveries.
    fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>);
}

/// Level-triggered shutdown signal shared by consumer loops and handlers.
///
/// Unlike a broadcast channel, a subscriber that checks after the trigger
/// still observes the shutdown.
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Trigger shutdown. Idempotent.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    /// Returns true once shutdown has been triggered.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is triggered.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // Err means the sender is gone, which only happens at teardown.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_signal_level_triggered() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());

        signal.trigger();
        assert!(signal.is_triggered());

        // A wait started after the trigger must still return.
        tokio::time::timeout(Duration::from_secs(1), signal.cancelled())
            .await
            .expect("cancelled() should resolve after trigger");
    }

    #[tokio::test]
    async fn test_shutdown_signal_clones_share_state() {
        let signal = ShutdownSignal::new();
        let clone = signal.clone();
        clone.trigger();
        assert!(signal.is_triggered());
    }
}
