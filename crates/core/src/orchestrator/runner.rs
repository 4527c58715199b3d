//! Orchestrator implementation.
//!
//! Wires queue subscriptions to the creation pipeline, status polling loop
//! and feed regenerator, and exposes the synchronous command/query surface
//! used by the UI layer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::artifact_store::ArtifactStore;
use crate::config::{EventsConfig, FeedConfig};
use crate::creation::EpisodeCreator;
use crate::episode::{
    Episode, Feed, ProcessingMode, Repository, RepositoryError, DEFAULT_FEED_ID,
};
use crate::events::{create_event_channel, StatusChange};
use crate::feed::{feed_storage_key, FeedRegenerator};
use crate::media_backend::MediaBackend;
use crate::polling::{PollingConfig, StatusPoller};
use crate::publication::{PublicationReconciler, ReconcileError, ReconcileOutcome};
use crate::queue::{
    CreateEpisodesMessage, Queue, QueueError, RegenerateFeedsMessage, TOPIC_CREATE_EPISODES,
    TOPIC_POLL_STATUS, TOPIC_REGENERATE_FEEDS,
};

use super::handlers::{CreateEpisodesHandler, PollStatusHandler, RegenerateFeedsHandler};

/// Error type for orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Repository failed or an entity was missing.
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Reconciliation failed.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    /// Queue publish failed.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Message could not be encoded.
    #[error("Failed to encode message: {0}")]
    Encode(String),
}

/// The service façade: queue consumers plus the synchronous API.
pub struct Orchestrator {
    repository: Arc<dyn Repository>,
    artifact_store: Arc<dyn ArtifactStore>,
    queue: Arc<dyn Queue>,
    creator: Arc<EpisodeCreator>,
    poller: Arc<StatusPoller>,
    regenerator: Arc<FeedRegenerator>,
    reconciler: PublicationReconciler,
    feed_config: FeedConfig,
    started: AtomicBool,
}

impl Orchestrator {
    /// Create a new orchestrator and the receiving side of its
    /// status-change event stream.
    pub fn new(
        repository: Arc<dyn Repository>,
        media_backend: Arc<dyn MediaBackend>,
        artifact_store: Arc<dyn ArtifactStore>,
        queue: Arc<dyn Queue>,
        polling_config: PollingConfig,
        feed_config: FeedConfig,
        events_config: EventsConfig,
    ) -> (Self, mpsc::Receiver<Vec<StatusChange>>) {
        let (events, events_rx) = create_event_channel(events_config.buffer_size);

        let creator = Arc::new(EpisodeCreator::new(
            Arc::clone(&repository),
            Arc::clone(&media_backend),
            Arc::clone(&artifact_store),
            Arc::clone(&queue),
            events.clone(),
            polling_config.clone(),
        ));
        let poller = Arc::new(StatusPoller::new(
            Arc::clone(&repository),
            Arc::clone(&media_backend),
            Arc::clone(&queue),
            events.clone(),
            polling_config,
        ));
        let regenerator = Arc::new(FeedRegenerator::new(
            Arc::clone(&repository),
            Arc::clone(&artifact_store),
            feed_config.clone(),
        ));
        let reconciler = PublicationReconciler::new(
            Arc::clone(&repository),
            Arc::clone(&artifact_store),
            Arc::clone(&queue),
        );

        let orchestrator = Self {
            repository,
            artifact_store,
            queue,
            creator,
            poller,
            regenerator,
            reconciler,
            feed_config,
            started: AtomicBool::new(false),
        };
        (orchestrator, events_rx)
    }

    /// Subscribe the queue consumers. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already started");
            return;
        }
        info!("Starting orchestrator queue subscriptions");

        self.queue.subscribe(
            TOPIC_CREATE_EPISODES,
            Arc::new(CreateEpisodesHandler {
                creator: Arc::clone(&self.creator),
            }),
        );
        self.queue.subscribe(
            TOPIC_POLL_STATUS,
            Arc::new(PollStatusHandler {
                poller: Arc::clone(&self.poller),
            }),
        );
        self.queue.subscribe(
            TOPIC_REGENERATE_FEEDS,
            Arc::new(RegenerateFeedsHandler {
                regenerator: Arc::clone(&self.regenerator),
            }),
        );
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Enqueue an episode creation request.
    pub async fn request_episode_creation(
        &self,
        user_id: &str,
        url: &str,
        variant_groups: Vec<Vec<String>>,
        processing_mode: ProcessingMode,
    ) -> Result<(), OrchestratorError> {
        let message = CreateEpisodesMessage {
            url: url.to_string(),
            variant_groups,
            user_id: user_id.to_string(),
            processing_mode,
        };
        let payload =
            serde_json::to_vec(&message).map_err(|e| OrchestratorError::Encode(e.to_string()))?;
        self.queue.publish(TOPIC_CREATE_EPISODES, &payload).await?;
        Ok(())
    }

    /// Make the named episodes' membership exactly `desired_feed_ids`.
    pub async fn publish_episodes(
        &self,
        user_id: &str,
        episode_ids: &[String],
        desired_feed_ids: &[String],
    ) -> Result<ReconcileOutcome, OrchestratorError> {
        for feed_id in desired_feed_ids {
            self.require_feed(user_id, feed_id)?;
        }
        Ok(self
            .reconciler
            .publish_episodes(user_id, episode_ids, desired_feed_ids)
            .await?)
    }

    /// Remove the named episodes from one feed.
    pub async fn unpublish_episodes(
        &self,
        user_id: &str,
        episode_ids: &[String],
        feed_id: &str,
    ) -> Result<ReconcileOutcome, OrchestratorError> {
        Ok(self
            .reconciler
            .unpublish_episodes(user_id, episode_ids, feed_id)
            .await?)
    }

    /// Rename episodes and regenerate the feeds containing them.
    pub async fn rename_episodes(
        &self,
        user_id: &str,
        renames: &[(String, String)],
    ) -> Result<(), OrchestratorError> {
        Ok(self.reconciler.rename_episodes(user_id, renames).await?)
    }

    /// Delete episodes, their publications and (best-effort) artifacts.
    pub async fn delete_episodes(
        &self,
        user_id: &str,
        episode_ids: &[String],
    ) -> Result<(), OrchestratorError> {
        Ok(self.reconciler.delete_episodes(user_id, episode_ids).await?)
    }

    /// Create a new feed with the next per-user id.
    pub fn create_feed(&self, user_id: &str, title: &str) -> Result<Feed, OrchestratorError> {
        let id = self.repository.next_feed_id(user_id)?;
        let feed = Feed {
            user_id: user_id.to_string(),
            id: id.clone(),
            title: title.to_string(),
            artifact_url: self.artifact_store.url(&feed_storage_key(user_id, &id)),
            created_at: Utc::now(),
        };
        self.repository.upsert_feed(&feed)?;
        info!("Created feed {}/{} \"{}\"", user_id, id, title);
        Ok(feed)
    }

    /// Rename a feed and regenerate its artifact.
    pub async fn rename_feed(
        &self,
        user_id: &str,
        feed_id: &str,
        title: &str,
    ) -> Result<Feed, OrchestratorError> {
        let feed = self.require_feed(user_id, feed_id)?;
        let renamed = Feed {
            title: title.to_string(),
            ..feed
        };
        self.repository.upsert_feed(&renamed)?;

        let message = RegenerateFeedsMessage {
            feed_ids: vec![feed_id.to_string()],
            user_id: user_id.to_string(),
        };
        let payload =
            serde_json::to_vec(&message).map_err(|e| OrchestratorError::Encode(e.to_string()))?;
        self.queue.publish(TOPIC_REGENERATE_FEEDS, &payload).await?;
        Ok(renamed)
    }

    /// Delete a feed, optionally cascading to its episodes. The default
    /// feed is rejected.
    pub async fn delete_feed(
        &self,
        user_id: &str,
        feed_id: &str,
        cascade_episodes: bool,
    ) -> Result<(), OrchestratorError> {
        Ok(self
            .reconciler
            .delete_feed(user_id, feed_id, cascade_episodes)
            .await?)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Get one episode.
    pub fn get_episode(
        &self,
        user_id: &str,
        episode_id: &str,
    ) -> Result<Option<Episode>, OrchestratorError> {
        Ok(self.repository.get_episode(user_id, episode_id)?)
    }

    /// List a user's episodes, newest first.
    pub fn list_episodes(&self, user_id: &str) -> Result<Vec<Episode>, OrchestratorError> {
        Ok(self.repository.list_episodes(user_id)?)
    }

    /// List a user's feeds. The default feed is created on first query.
    pub fn list_feeds(&self, user_id: &str) -> Result<Vec<Feed>, OrchestratorError> {
        self.ensure_default_feed(user_id)?;
        Ok(self.repository.list_feeds(user_id)?)
    }

    /// Get one feed, lazily creating the default feed.
    pub fn get_feed(
        &self,
        user_id: &str,
        feed_id: &str,
    ) -> Result<Option<Feed>, OrchestratorError> {
        if feed_id == DEFAULT_FEED_ID {
            return Ok(Some(self.ensure_default_feed(user_id)?));
        }
        Ok(self.repository.get_feed(user_id, feed_id)?)
    }

    /// List a feed's episodes in publication insertion order, oldest
    /// first.
    pub fn list_feed_episodes(
        &self,
        user_id: &str,
        feed_id: &str,
    ) -> Result<Vec<Episode>, OrchestratorError> {
        self.require_feed(user_id, feed_id)?;
        let publications = self.repository.list_publications_by_feed(user_id, feed_id)?;
        let ids: Vec<String> = publications
            .into_iter()
            .map(|publication| publication.episode_id)
            .collect();
        Ok(self.repository.get_episodes(user_id, &ids)?)
    }

    fn require_feed(&self, user_id: &str, feed_id: &str) -> Result<Feed, OrchestratorError> {
        if feed_id == DEFAULT_FEED_ID {
            return self.ensure_default_feed(user_id);
        }
        self.repository
            .get_feed(user_id, feed_id)?
            .ok_or_else(|| RepositoryError::NotFound(format!("feed {}", feed_id)).into())
    }

    fn ensure_default_feed(&self, user_id: &str) -> Result<Feed, OrchestratorError> {
        if let Some(feed) = self.repository.get_feed(user_id, DEFAULT_FEED_ID)? {
            return Ok(feed);
        }
        let feed = Feed {
            user_id: user_id.to_string(),
            id: DEFAULT_FEED_ID.to_string(),
            title: self.feed_config.default_feed_title.clone(),
            artifact_url: self
                .artifact_store
                .url(&feed_storage_key(user_id, DEFAULT_FEED_ID)),
            created_at: Utc::now(),
        };
        self.repository.upsert_feed(&feed)?;
        info!("Created default feed for user {}", user_id);
        Ok(feed)
    }
}
