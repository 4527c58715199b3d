//! Publication reconciler.
//!
//! `publish_episodes` is a set reconciliation, not an additive publish: it
//! makes every named episode's membership be exactly the desired feed set.
//! All membership writes for a batch happen in one repository transaction;
//! regeneration of every touched feed is enqueued as a single message.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::artifact_store::ArtifactStore;
use crate::episode::{Episode, Publication, Repository, RepositoryError, DEFAULT_FEED_ID};
use crate::feed::feed_storage_key;
use crate::queue::{Queue, QueueError, RegenerateFeedsMessage, TOPIC_REGENERATE_FEEDS};

/// Error type for publication operations.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Repository failed or an entity was missing.
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Regeneration enqueue failed.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Regeneration message could not be encoded.
    #[error("Failed to encode regeneration message: {0}")]
    Encode(String),
}

/// Summary of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Memberships inserted.
    pub inserted: usize,
    /// Memberships deleted.
    pub deleted: usize,
    /// Feeds added to or removed from, in sorted order.
    pub touched_feeds: Vec<String>,
}

impl ReconcileOutcome {
    /// True when the run changed nothing.
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.deleted == 0
    }
}

/// Keeps episode-to-feed membership consistent with user intent.
pub struct PublicationReconciler {
    repository: Arc<dyn Repository>,
    artifact_store: Arc<dyn ArtifactStore>,
    queue: Arc<dyn Queue>,
}

impl PublicationReconciler {
    /// Create a new reconciler.
    pub fn new(
        repository: Arc<dyn Repository>,
        artifact_store: Arc<dyn ArtifactStore>,
        queue: Arc<dyn Queue>,
    ) -> Self {
        Self {
            repository,
            artifact_store,
            queue,
        }
    }

    /// Make the membership of every named episode be exactly
    /// `desired_feed_ids`.
    ///
    /// Idempotent: a second identical call performs zero writes and
    /// enqueues an empty regeneration request (a no-op downstream).
    pub async fn publish_episodes(
        &self,
        user_id: &str,
        episode_ids: &[String],
        desired_feed_ids: &[String],
    ) -> Result<ReconcileOutcome, ReconcileError> {
        self.require_episodes(user_id, episode_ids)?;

        let existing = self
            .repository
            .list_publications_by_episodes(user_id, episode_ids)?;
        let desired: BTreeSet<&str> = desired_feed_ids.iter().map(String::as_str).collect();

        let mut to_delete: Vec<(String, String)> = Vec::new();
        let mut to_insert: Vec<Publication> = Vec::new();
        let mut touched: BTreeSet<String> = BTreeSet::new();
        let now = Utc::now();

        for episode_id in episode_ids {
            let current: BTreeSet<&str> = existing
                .iter()
                .filter(|publication| &publication.episode_id == episode_id)
                .map(|publication| publication.feed_id.as_str())
                .collect();

            for feed_id in current.difference(&desired) {
                touched.insert((*feed_id).to_string());
                to_delete.push((episode_id.clone(), (*feed_id).to_string()));
            }
            for feed_id in desired.difference(&current) {
                touched.insert((*feed_id).to_string());
                to_insert.push(Publication {
                    user_id: user_id.to_string(),
                    episode_id: episode_id.clone(),
                    feed_id: (*feed_id).to_string(),
                    created_at: now,
                });
            }
        }

        let outcome = ReconcileOutcome {
            inserted: to_insert.len(),
            deleted: to_delete.len(),
            touched_feeds: touched.into_iter().collect(),
        };

        self.repository.transaction(&mut |tx| {
            tx.delete_publications(user_id, &to_delete)?;
            tx.insert_publications(&to_insert)?;
            Ok(())
        })?;

        self.enqueue_regeneration(user_id, outcome.touched_feeds.clone())
            .await?;

        if !outcome.is_noop() {
            info!(
                "Reconciled {} episode(s) of user {}: +{} -{} membership(s)",
                episode_ids.len(),
                user_id,
                outcome.inserted,
                outcome.deleted
            );
        }
        Ok(outcome)
    }

    /// Remove the named episodes from one feed.
    pub async fn unpublish_episodes(
        &self,
        user_id: &str,
        episode_ids: &[String],
        feed_id: &str,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        self.require_episodes(user_id, episode_ids)?;

        let existing = self
            .repository
            .list_publications_by_episodes(user_id, episode_ids)?;
        let to_delete: Vec<(String, String)> = existing
            .iter()
            .filter(|publication| publication.feed_id == feed_id)
            .map(|publication| (publication.episode_id.clone(), feed_id.to_string()))
            .collect();

        let touched: Vec<String> = if to_delete.is_empty() {
            Vec::new()
        } else {
            vec![feed_id.to_string()]
        };
        let outcome = ReconcileOutcome {
            inserted: 0,
            deleted: to_delete.len(),
            touched_feeds: touched.clone(),
        };

        self.repository
            .transaction(&mut |tx| tx.delete_publications(user_id, &to_delete))?;
        self.enqueue_regeneration(user_id, touched).await?;
        Ok(outcome)
    }

    /// Rename episodes, then regenerate every feed containing one of them.
    pub async fn rename_episodes(
        &self,
        user_id: &str,
        renames: &[(String, String)],
    ) -> Result<(), ReconcileError> {
        let ids: Vec<String> = renames.iter().map(|(id, _)| id.clone()).collect();
        let episodes = self.require_episodes(user_id, &ids)?;

        let mut changed_ids: Vec<String> = Vec::new();
        self.repository.transaction(&mut |tx| {
            changed_ids.clear();
            for episode in &episodes {
                let new_title = renames
                    .iter()
                    .find(|(id, _)| id == &episode.id)
                    .map(|(_, title)| title.clone())
                    .unwrap_or_else(|| episode.title.clone());
                if new_title == episode.title {
                    continue;
                }
                let mut renamed = episode.clone();
                renamed.title = new_title;
                renamed.updated_at = Utc::now();
                tx.upsert_episode(&renamed)?;
                changed_ids.push(episode.id.clone());
            }
            Ok(())
        })?;

        let touched = self.feeds_containing(user_id, &changed_ids)?;
        self.enqueue_regeneration(user_id, touched).await?;
        Ok(())
    }

    /// Delete episodes: every publication referencing them first, then the
    /// episodes, then (best-effort) their stored artifacts. Feeds that lost
    /// a member are regenerated.
    pub async fn delete_episodes(
        &self,
        user_id: &str,
        episode_ids: &[String],
    ) -> Result<(), ReconcileError> {
        let episodes = self.repository.get_episodes(user_id, episode_ids)?;
        let present_ids: Vec<String> = episodes.iter().map(|e| e.id.clone()).collect();
        let touched = self.feeds_containing(user_id, &present_ids)?;

        let publications = self
            .repository
            .list_publications_by_episodes(user_id, &present_ids)?;
        let pairs: Vec<(String, String)> = publications
            .iter()
            .map(|publication| (publication.episode_id.clone(), publication.feed_id.clone()))
            .collect();

        self.repository.transaction(&mut |tx| {
            tx.delete_publications(user_id, &pairs)?;
            tx.delete_episodes(user_id, &present_ids)?;
            Ok(())
        })?;

        // Artifact removal is best-effort; a leaked object is better than a
        // failed delete.
        for episode in &episodes {
            if let Err(e) = self.artifact_store.delete(&episode.storage_key).await {
                warn!(
                    "Failed to delete artifact {} of episode {}/{}: {}",
                    episode.storage_key, user_id, episode.id, e
                );
            }
        }

        self.enqueue_regeneration(user_id, touched).await?;
        info!(
            "Deleted {} episode(s) for user {}",
            present_ids.len(),
            user_id
        );
        Ok(())
    }

    /// Delete a feed, optionally cascading to its member episodes.
    ///
    /// The default feed cannot be deleted. Without cascade the member
    /// episodes survive and only their membership in this feed is removed.
    pub async fn delete_feed(
        &self,
        user_id: &str,
        feed_id: &str,
        cascade_episodes: bool,
    ) -> Result<(), ReconcileError> {
        if feed_id == DEFAULT_FEED_ID {
            return Err(ReconcileError::Repository(RepositoryError::Rejected(
                "the default feed cannot be deleted".to_string(),
            )));
        }
        let feed = self
            .repository
            .get_feed(user_id, feed_id)?
            .ok_or_else(|| RepositoryError::NotFound(format!("feed {}", feed_id)))?;

        let members = self.repository.list_publications_by_feed(user_id, feed_id)?;
        let member_ids: Vec<String> = members
            .iter()
            .map(|publication| publication.episode_id.clone())
            .collect();

        if cascade_episodes {
            // Removes the episodes' publications everywhere (including this
            // feed) and regenerates the other feeds that lost members.
            self.delete_episodes(user_id, &member_ids).await?;
        }

        self.repository.transaction(&mut |tx| {
            let remaining = tx.list_publications_by_feed(user_id, feed_id)?;
            let pairs: Vec<(String, String)> = remaining
                .iter()
                .map(|publication| (publication.episode_id.clone(), feed_id.to_string()))
                .collect();
            tx.delete_publications(user_id, &pairs)?;
            tx.delete_feed(user_id, feed_id)
        })?;

        let key = feed_storage_key(user_id, feed_id);
        if let Err(e) = self.artifact_store.delete(&key).await {
            warn!("Failed to delete feed artifact {}: {}", key, e);
        }

        info!(
            "Deleted feed {}/{} (\"{}\", cascade: {})",
            user_id, feed_id, feed.title, cascade_episodes
        );
        Ok(())
    }

    /// Load all named episodes, failing with `NotFound` if any is missing.
    fn require_episodes(
        &self,
        user_id: &str,
        episode_ids: &[String],
    ) -> Result<Vec<Episode>, RepositoryError> {
        let episodes = self.repository.get_episodes(user_id, episode_ids)?;
        if episodes.len() != episode_ids.len() {
            let found: BTreeSet<&str> = episodes.iter().map(|e| e.id.as_str()).collect();
            let missing: Vec<&str> = episode_ids
                .iter()
                .map(String::as_str)
                .filter(|id| !found.contains(id))
                .collect();
            return Err(RepositoryError::NotFound(format!(
                "episode(s) {}",
                missing.join(", ")
            )));
        }
        Ok(episodes)
    }

    /// Sorted union of feeds containing any of the given episodes.
    fn feeds_containing(
        &self,
        user_id: &str,
        episode_ids: &[String],
    ) -> Result<Vec<String>, RepositoryError> {
        let publications = self
            .repository
            .list_publications_by_episodes(user_id, episode_ids)?;
        let feeds: BTreeSet<String> = publications
            .into_iter()
            .map(|publication| publication.feed_id)
            .collect();
        Ok(feeds.into_iter().collect())
    }

    /// Enqueue exactly one regeneration message for a feed union. An empty
    /// union is still published; the regenerator treats it as a no-op.
    async fn enqueue_regeneration(
        &self,
        user_id: &str,
        feed_ids: Vec<String>,
    ) -> Result<(), ReconcileError> {
        let message = RegenerateFeedsMessage {
            feed_ids,
            user_id: user_id.to_string(),
        };
        let payload =
            serde_json::to_vec(&message).map_err(|e| ReconcileError::Encode(e.to_string()))?;
        self.queue.publish(TOPIC_REGENERATE_FEEDS, &payload).await?;
        Ok(())
    }
}
