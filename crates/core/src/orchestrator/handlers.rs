//! Queue message handlers.
//!
//! Thin adapters between raw queue payloads and the typed components.
//! Decode failures are surfaced as handler errors so the queue's retry
//! schedule eventually dead-letters malformed messages instead of dropping
//! them silently.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::creation::EpisodeCreator;
use crate::feed::FeedRegenerator;
use crate::polling::{PollError, StatusPoller};
use crate::queue::{
    CreateEpisodesMessage, HandlerError, MessageHandler, PollEpisodesStatusMessage,
    RegenerateFeedsMessage, ShutdownSignal,
};

fn decode<T: serde::de::DeserializeOwned>(payload: &[u8]) -> Result<T, HandlerError> {
    serde_json::from_slice(payload).map_err(|e| HandlerError::Decode(e.to_string()))
}

/// Consumes `CreateEpisodes` messages.
pub(crate) struct CreateEpisodesHandler {
    pub creator: Arc<EpisodeCreator>,
}

#[async_trait]
impl MessageHandler for CreateEpisodesHandler {
    async fn handle(&self, payload: &[u8], _shutdown: &ShutdownSignal) -> Result<(), HandlerError> {
        let message: CreateEpisodesMessage = decode(payload)?;
        debug!(
            "Handling creation request for user {} ({} group(s))",
            message.user_id,
            message.variant_groups.len()
        );
        self.creator
            .create_episodes(&message)
            .await
            .map(|_| ())
            .map_err(HandlerError::failed)
    }
}

/// Consumes `PollEpisodesStatus` messages.
pub(crate) struct PollStatusHandler {
    pub poller: Arc<StatusPoller>,
}

#[async_trait]
impl MessageHandler for PollStatusHandler {
    async fn handle(&self, payload: &[u8], shutdown: &ShutdownSignal) -> Result<(), HandlerError> {
        let message: PollEpisodesStatusMessage = decode(payload)?;
        match self.poller.poll(&message, shutdown).await {
            Ok(_) => Ok(()),
            Err(PollError::Cancelled) => Err(HandlerError::Cancelled),
            Err(e) => Err(HandlerError::failed(e)),
        }
    }
}

/// Consumes `RegenerateFeeds` messages.
pub(crate) struct RegenerateFeedsHandler {
    pub regenerator: Arc<FeedRegenerator>,
}

#[async_trait]
impl MessageHandler for RegenerateFeedsHandler {
    async fn handle(&self, payload: &[u8], _shutdown: &ShutdownSignal) -> Result<(), HandlerError> {
        let message: RegenerateFeedsMessage = decode(payload)?;
        self.regenerator
            .regenerate(&message)
            .await
            .map(|_| ())
            .map_err(HandlerError::failed)
    }
}
