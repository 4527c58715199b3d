//! Status polling loop.
//!
//! Consumes `PollEpisodesStatus` messages: advances episode statuses from
//! the media backend's job report, schedules feed regeneration for affected
//! feeds, and republishes itself with growing backoff until every episode
//! is complete or abandoned.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::episode::{Episode, EpisodeStatus, Repository, RepositoryError};
use crate::events::{EventHandle, StatusChange};
use crate::media_backend::{MediaBackend, MediaBackendError, RemoteJobState};
use crate::metrics;
use crate::queue::{
    PollEpisodesStatusMessage, Queue, QueueError, RegenerateFeedsMessage, ShutdownSignal,
    TOPIC_POLL_STATUS, TOPIC_REGENERATE_FEEDS,
};

use super::config::PollingConfig;

/// Error type for status polling.
#[derive(Debug, Error)]
pub enum PollError {
    /// Repository failed; the message is retried by the queue.
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Media backend failed; the message is retried by the queue.
    #[error("Media backend error: {0}")]
    MediaBackend(#[from] MediaBackendError),

    /// Republish or regeneration enqueue failed.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// The backend reported a status outside the known state machine.
    /// Fatal for the whole message: silently guessing a mapping could move
    /// episodes backward or strand them.
    #[error("Unrecognized remote status \"{0}\"")]
    UnknownRemoteStatus(String),

    /// Poll message could not be encoded for republishing.
    #[error("Failed to encode poll message: {0}")]
    Encode(String),

    /// Interrupted by shutdown; the message stays deliverable.
    #[error("Cancelled by shutdown")]
    Cancelled,
}

/// Summary of one processed poll message.
#[derive(Debug, Default, PartialEq)]
pub struct PollOutcome {
    /// Episodes whose status advanced.
    pub status_changes: usize,
    /// Whether a follow-up poll message was published.
    pub republished: bool,
    /// Episodes dropped from polling after exceeding the requeue cap.
    pub abandoned: Vec<String>,
}

/// Map a remote job status onto the episode state machine.
fn map_remote_status(remote: &str) -> Result<EpisodeStatus, PollError> {
    match remote {
        "accepted" | "created" => Ok(EpisodeStatus::Pending),
        "downloading" => Ok(EpisodeStatus::Downloading),
        "processing" => Ok(EpisodeStatus::Processing),
        "uploading" => Ok(EpisodeStatus::Uploading),
        "complete" => Ok(EpisodeStatus::Complete),
        other => Err(PollError::UnknownRemoteStatus(other.to_string())),
    }
}

/// Advances episode statuses by consulting the media backend.
pub struct StatusPoller {
    repository: Arc<dyn Repository>,
    media_backend: Arc<dyn MediaBackend>,
    queue: Arc<dyn Queue>,
    events: EventHandle,
    config: PollingConfig,
}

impl StatusPoller {
    /// Create a new status poller.
    pub fn new(
        repository: Arc<dyn Repository>,
        media_backend: Arc<dyn MediaBackend>,
        queue: Arc<dyn Queue>,
        events: EventHandle,
        config: PollingConfig,
    ) -> Self {
        Self {
            repository,
            media_backend,
            queue,
            events,
            config,
        }
    }

    /// Process one poll message.
    pub async fn poll(
        &self,
        message: &PollEpisodesStatusMessage,
        shutdown: &ShutdownSignal,
    ) -> Result<PollOutcome, PollError> {
        self.sleep_until_due(message, shutdown).await?;

        // Episodes already complete or without a remote job are skipped;
        // ids deleted since the message was enqueued simply load nothing.
        let episodes = self
            .repository
            .get_episodes(&message.user_id, &message.episode_ids)?;
        let pollable: Vec<Episode> = episodes
            .into_iter()
            .filter(|episode| episode.is_pollable())
            .collect();

        if pollable.is_empty() {
            debug!(
                "Poll for user {} has no pollable episodes left",
                message.user_id
            );
            return Ok(PollOutcome::default());
        }

        let job_ids: Vec<String> = pollable
            .iter()
            .filter_map(|episode| episode.remote_job_id.clone())
            .collect();
        let status_map = self.media_backend.fetch_job_status_map(&job_ids).await?;

        let mut changes: Vec<StatusChange> = Vec::new();
        let mut still_pending: Vec<String> = Vec::new();
        let mut missing: Vec<String> = Vec::new();

        for mut episode in pollable {
            let job_id = episode
                .remote_job_id
                .clone()
                .unwrap_or_default();

            let Some(state) = status_map.get(&job_id) else {
                // Backend does not know this job (yet, or anymore).
                missing.push(episode.id.clone());
                continue;
            };

            let new_status = map_remote_status(&state.status)?;
            let old_status = episode.status;

            if new_status != old_status && old_status.can_advance_to(new_status) {
                apply_transition(&mut episode, new_status, state);
                self.repository.upsert_episode(&episode)?;
                metrics::STATUS_TRANSITIONS
                    .with_label_values(&[new_status.as_str()])
                    .inc();
                changes.push(StatusChange {
                    episode: episode.clone(),
                    old_status,
                    new_status,
                });
            }

            if !new_status.is_terminal() {
                still_pending.push(episode.id.clone());
            }
        }

        // Feeds are marked after all episode writes so a regeneration never
        // reads half of a batch.
        let affected_feeds = self.affected_feeds(&message.user_id, &changes)?;
        if !affected_feeds.is_empty() {
            self.publish_regeneration(&message.user_id, affected_feeds)
                .await?;
        }

        let status_changes = changes.len();
        self.events.emit(changes).await;

        let abandoned = self.split_off_abandoned(message, &mut missing);
        still_pending.extend(missing);

        let republished = if still_pending.is_empty() {
            false
        } else {
            self.republish(message, still_pending).await?;
            true
        };

        Ok(PollOutcome {
            status_changes,
            republished,
            abandoned,
        })
    }

    /// Honor the message's not-before time; cancellable by shutdown.
    async fn sleep_until_due(
        &self,
        message: &PollEpisodesStatusMessage,
        shutdown: &ShutdownSignal,
    ) -> Result<(), PollError> {
        let Some(not_before) = message.poll_not_before else {
            return Ok(());
        };
        let Ok(wait) = (not_before - Utc::now()).to_std() else {
            return Ok(()); // Already due.
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => Ok(()),
            _ = shutdown.cancelled() => Err(PollError::Cancelled),
        }
    }

    /// Union of feeds containing any episode that changed status.
    fn affected_feeds(
        &self,
        user_id: &str,
        changes: &[StatusChange],
    ) -> Result<Vec<String>, RepositoryError> {
        if changes.is_empty() {
            return Ok(Vec::new());
        }
        let changed_ids: Vec<String> = changes
            .iter()
            .map(|change| change.episode.id.clone())
            .collect();
        let publications = self
            .repository
            .list_publications_by_episodes(user_id, &changed_ids)?;
        let feeds: BTreeSet<String> = publications
            .into_iter()
            .map(|publication| publication.feed_id)
            .collect();
        Ok(feeds.into_iter().collect())
    }

    async fn publish_regeneration(
        &self,
        user_id: &str,
        feed_ids: Vec<String>,
    ) -> Result<(), PollError> {
        let message = RegenerateFeedsMessage {
            feed_ids,
            user_id: user_id.to_string(),
        };
        let payload =
            serde_json::to_vec(&message).map_err(|e| PollError::Encode(e.to_string()))?;
        self.queue.publish(TOPIC_REGENERATE_FEEDS, &payload).await?;
        Ok(())
    }

    /// Enforce the requeue cap on episodes with no resolvable remote
    /// status. Beyond the cap they are abandoned with a warning, not an
    /// error: a job that will never report must not be polled forever.
    fn split_off_abandoned(
        &self,
        message: &PollEpisodesStatusMessage,
        missing: &mut Vec<String>,
    ) -> Vec<String> {
        if missing.is_empty() || message.requeue_count < self.config.max_requeue_count {
            return Vec::new();
        }
        let abandoned = std::mem::take(missing);
        metrics::POLL_ABANDONED.inc_by(abandoned.len() as u64);
        warn!(
            "Abandoning episodes {:?} for user {} after {} requeues without a remote status",
            abandoned, message.user_id, message.requeue_count
        );
        abandoned
    }

    /// Republish a poll message for unfinished episodes, with grown delay.
    async fn republish(
        &self,
        message: &PollEpisodesStatusMessage,
        episode_ids: Vec<String>,
    ) -> Result<(), PollError> {
        let current_delay = message
            .delay_secs
            .unwrap_or(self.config.initial_delay_secs);
        let delay_secs = self.config.next_delay(current_delay);

        let next = PollEpisodesStatusMessage {
            episode_ids,
            user_id: message.user_id.clone(),
            polling_started_at: message.polling_started_at.or_else(|| Some(Utc::now())),
            delay_secs: Some(delay_secs),
            poll_not_before: Some(Utc::now() + Duration::milliseconds((delay_secs * 1000.0) as i64)),
            requeue_count: message.requeue_count + 1,
        };
        let payload = serde_json::to_vec(&next).map_err(|e| PollError::Encode(e.to_string()))?;
        self.queue.publish(TOPIC_POLL_STATUS, &payload).await?;
        metrics::POLL_REQUEUES.inc();
        info!(
            "Requeued poll for {} episode(s) of user {} in {:.1}s (requeue #{})",
            next.episode_ids.len(),
            next.user_id,
            delay_secs,
            next.requeue_count
        );
        Ok(())
    }
}

/// Apply a forward transition, populating size and duration when the
/// artifact materializes.
fn apply_transition(episode: &mut Episode, new_status: EpisodeStatus, state: &RemoteJobState) {
    episode.status = new_status;
    episode.updated_at = Utc::now();
    if matches!(
        new_status,
        EpisodeStatus::Uploading | EpisodeStatus::Complete
    ) {
        if state.result_byte_length.is_some() {
            episode.byte_length = state.result_byte_length;
        }
        if state.result_duration_secs.is_some() {
            episode.duration_secs = state.result_duration_secs;
        }
    }
}
