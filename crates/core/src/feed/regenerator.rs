//! Feed regeneration.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::artifact_store::{ArtifactStore, ArtifactStoreError};
use crate::config::FeedConfig;
use crate::episode::{Feed, Repository, RepositoryError, DEFAULT_FEED_ID};
use crate::metrics;
use crate::queue::RegenerateFeedsMessage;

use super::rss::{feed_storage_key, render_feed, FEED_CONTENT_TYPE};

/// Error type for feed regeneration.
#[derive(Debug, Error)]
pub enum RegenerateError {
    /// Repository failed.
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Artifact upload failed.
    #[error("Artifact store error: {0}")]
    ArtifactStore(#[from] ArtifactStoreError),

    /// RSS rendering failed.
    #[error("Failed to render feed: {0}")]
    Render(String),
}

/// Rebuilds and re-uploads feed artifacts.
///
/// Regeneration is always a full rebuild from the publication table; there
/// is no incremental patching and therefore no drift to accumulate.
pub struct FeedRegenerator {
    repository: Arc<dyn Repository>,
    artifact_store: Arc<dyn ArtifactStore>,
    config: FeedConfig,
}

impl FeedRegenerator {
    /// Create a new feed regenerator.
    pub fn new(
        repository: Arc<dyn Repository>,
        artifact_store: Arc<dyn ArtifactStore>,
        config: FeedConfig,
    ) -> Self {
        Self {
            repository,
            artifact_store,
            config,
        }
    }

    /// Process one regeneration message. An empty feed set is a no-op.
    /// Returns the number of feeds rebuilt.
    pub async fn regenerate(
        &self,
        message: &RegenerateFeedsMessage,
    ) -> Result<usize, RegenerateError> {
        // The reconciler publishes empty unions to stay branch-free.
        if message.feed_ids.is_empty() {
            return Ok(0);
        }

        let unique: BTreeSet<&String> = message.feed_ids.iter().collect();
        let mut rebuilt = 0;
        for feed_id in unique {
            if self.regenerate_one(&message.user_id, feed_id).await? {
                rebuilt += 1;
            }
        }
        Ok(rebuilt)
    }

    /// Rebuild one feed. Returns false if the feed no longer exists (raced
    /// with a delete), which is skipped rather than failed.
    async fn regenerate_one(&self, user_id: &str, feed_id: &str) -> Result<bool, RegenerateError> {
        let feed = match self.repository.get_feed(user_id, feed_id)? {
            Some(feed) => feed,
            None if feed_id == DEFAULT_FEED_ID => self.create_default_feed(user_id)?,
            None => {
                debug!(
                    "Feed {}/{} vanished before regeneration, skipping",
                    user_id, feed_id
                );
                return Ok(false);
            }
        };

        // Publication insertion order, oldest first: this drives the
        // user-visible episode numbering.
        let publications = self.repository.list_publications_by_feed(user_id, feed_id)?;
        let episode_ids: Vec<String> = publications
            .into_iter()
            .map(|publication| publication.episode_id)
            .collect();
        let episodes = self.repository.get_episodes(user_id, &episode_ids)?;

        let xml = render_feed(&feed, &episodes, &self.config)
            .map_err(|e| RegenerateError::Render(e.to_string()))?;

        let key = feed_storage_key(user_id, feed_id);
        self.artifact_store
            .put(&key, xml.into_bytes(), FEED_CONTENT_TYPE)
            .await?;

        let artifact_url = self.artifact_store.url(&key);
        if feed.artifact_url != artifact_url {
            self.repository.upsert_feed(&Feed {
                artifact_url,
                ..feed
            })?;
        }

        metrics::FEED_REGENERATIONS.inc();
        info!(
            "Regenerated feed {}/{} with {} episode(s)",
            user_id,
            feed_id,
            episodes.len()
        );
        Ok(true)
    }

    /// The default feed exists from the moment anything touches it.
    fn create_default_feed(&self, user_id: &str) -> Result<Feed, RepositoryError> {
        warn!(
            "Default feed for user {} regenerated before first query, creating it",
            user_id
        );
        let feed = Feed {
            user_id: user_id.to_string(),
            id: DEFAULT_FEED_ID.to_string(),
            title: self.config.default_feed_title.clone(),
            artifact_url: self
                .artifact_store
                .url(&feed_storage_key(user_id, DEFAULT_FEED_ID)),
            created_at: Utc::now(),
        };
        self.repository.upsert_feed(&feed)?;
        Ok(feed)
    }
}
