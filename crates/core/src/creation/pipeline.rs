//! Episode creation pipeline.

use std::sync::Arc;

use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{debug, info};

use crate::artifact_store::{ArtifactStore, ArtifactStoreError};
use crate::episode::{Episode, EpisodeStatus, Repository, RepositoryError};
use crate::events::{EventHandle, StatusChange};
use crate::media_backend::{CreateJobRequest, MediaBackend, MediaBackendError};
use crate::metrics;
use crate::polling::PollingConfig;
use crate::queue::{
    CreateEpisodesMessage, PollEpisodesStatusMessage, Queue, QueueError, TOPIC_POLL_STATUS,
};

use super::title::derive_title;

/// Error type for episode creation.
#[derive(Debug, Error)]
pub enum CreateError {
    /// Repository failed.
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Media backend rejected or failed a job submission.
    #[error("Media backend error: {0}")]
    MediaBackend(#[from] MediaBackendError),

    /// Artifact store failed to presign a destination.
    #[error("Artifact store error: {0}")]
    ArtifactStore(#[from] ArtifactStoreError),

    /// Queue publish failed.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Poll message could not be encoded.
    #[error("Failed to encode poll message: {0}")]
    Encode(String),
}

/// Turns creation requests into episode records and remote processing jobs.
///
/// A request creates one episode per variant group. Failure of any group
/// aborts the whole batch; the queue's at-least-once delivery retries the
/// request, which creates fresh episodes (creation is not idempotent across
/// redelivery - a known, accepted gap).
pub struct EpisodeCreator {
    repository: Arc<dyn Repository>,
    media_backend: Arc<dyn MediaBackend>,
    artifact_store: Arc<dyn ArtifactStore>,
    queue: Arc<dyn Queue>,
    events: EventHandle,
    polling: PollingConfig,
}

impl EpisodeCreator {
    /// Create a new episode creator.
    pub fn new(
        repository: Arc<dyn Repository>,
        media_backend: Arc<dyn MediaBackend>,
        artifact_store: Arc<dyn ArtifactStore>,
        queue: Arc<dyn Queue>,
        events: EventHandle,
        polling: PollingConfig,
    ) -> Self {
        Self {
            repository,
            media_backend,
            artifact_store,
            queue,
            events,
            polling,
        }
    }

    /// Process one creation request.
    ///
    /// On success every group has a persisted `created` episode, one
    /// status-poll message covers the whole batch, and one status-change
    /// event batch was emitted.
    pub async fn create_episodes(
        &self,
        message: &CreateEpisodesMessage,
    ) -> Result<Vec<Episode>, CreateError> {
        let mut created = Vec::with_capacity(message.variant_groups.len());
        for group in &message.variant_groups {
            let episode = self.create_one(message, group).await?;
            debug!(
                "Created episode {}/{} \"{}\" (job {:?})",
                episode.user_id, episode.id, episode.title, episode.remote_job_id
            );
            created.push(episode);
        }

        if created.is_empty() {
            return Ok(created);
        }

        self.publish_initial_poll(message, &created).await?;

        let changes: Vec<StatusChange> = created
            .iter()
            .map(|episode| StatusChange {
                episode: episode.clone(),
                old_status: EpisodeStatus::Undefined,
                new_status: EpisodeStatus::Created,
            })
            .collect();
        self.events.emit(changes).await;

        metrics::EPISODES_CREATED.inc_by(created.len() as u64);
        info!(
            "Created {} episode(s) for user {} from {}",
            created.len(),
            message.user_id,
            message.url
        );
        Ok(created)
    }

    /// Create one episode: allocate id, presign destination, submit the
    /// remote job, persist.
    async fn create_one(
        &self,
        message: &CreateEpisodesMessage,
        group: &[String],
    ) -> Result<Episode, CreateError> {
        let id = self.repository.next_episode_id(&message.user_id)?;
        let storage_key = format!("{}/episodes/{}.mp3", message.user_id, id);
        let destination_url = self.artifact_store.presigned_url(&storage_key).await?;

        let title = derive_title(group, &message.url);

        let remote_job_id = self
            .media_backend
            .create_upload_job(CreateJobRequest {
                source_url: message.url.clone(),
                mode: message.processing_mode,
                variants: group.to_vec(),
                destination_url,
            })
            .await?;

        let now = Utc::now();
        let episode = Episode {
            id,
            user_id: message.user_id.clone(),
            title,
            created_at: now,
            source_url: message.url.clone(),
            source_files: group.to_vec(),
            remote_job_id: Some(remote_job_id),
            artifact_url: self.artifact_store.url(&storage_key),
            storage_key,
            status: EpisodeStatus::Created,
            duration_secs: None,
            byte_length: None,
            media_format: "mp3".to_string(),
            updated_at: now,
        };
        self.repository.upsert_episode(&episode)?;
        Ok(episode)
    }

    /// Publish the first status-poll message covering the whole batch.
    async fn publish_initial_poll(
        &self,
        message: &CreateEpisodesMessage,
        created: &[Episode],
    ) -> Result<(), CreateError> {
        let now = Utc::now();
        let delay_secs = self.polling.initial_delay_secs;
        let poll = PollEpisodesStatusMessage {
            episode_ids: created.iter().map(|episode| episode.id.clone()).collect(),
            user_id: message.user_id.clone(),
            polling_started_at: Some(now),
            delay_secs: Some(delay_secs),
            poll_not_before: Some(now + Duration::milliseconds((delay_secs * 1000.0) as i64)),
            requeue_count: 0,
        };
        let payload = serde_json::to_vec(&poll).map_err(|e| CreateError::Encode(e.to_string()))?;
        self.queue.publish(TOPIC_POLL_STATUS, &payload).await?;
        Ok(())
    }
}
