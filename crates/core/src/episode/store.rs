//! Repository trait and error types for episodes, feeds and publications.

use std::fmt;

use crate::episode::{Episode, Feed, Publication};

/// Error type for repository operations.
#[derive(Debug)]
pub enum RepositoryError {
    /// Episode or feed not found.
    NotFound(String),
    /// Operation rejected (e.g. deleting the default feed).
    Rejected(String),
    /// Database error.
    Database(String),
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryError::NotFound(what) => write!(f, "Not found: {}", what),
            RepositoryError::Rejected(reason) => write!(f, "Operation rejected: {}", reason),
            RepositoryError::Database(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for RepositoryError {}

/// Object-safe repository operations.
///
/// Everything here is available both on the top-level [`Repository`] and on
/// the transaction-scoped view handed to [`Repository::transaction`]
/// closures, so reconciliation code can run the same calls in either
/// context.
pub trait RepositoryOps {
    // ------------------------------------------------------------------
    // Id allocation
    // ------------------------------------------------------------------

    /// Allocate the next episode id for a user. Atomic per user.
    fn next_episode_id(&self, user_id: &str) -> Result<String, RepositoryError>;

    /// Allocate the next feed id for a user. Atomic per user.
    ///
    /// The first allocated id is `"2"`; `"1"` is reserved for the default
    /// feed.
    fn next_feed_id(&self, user_id: &str) -> Result<String, RepositoryError>;

    // ------------------------------------------------------------------
    // Episodes
    // ------------------------------------------------------------------

    /// Insert or replace an episode keyed by `(user_id, id)`.
    fn upsert_episode(&self, episode: &Episode) -> Result<(), RepositoryError>;

    /// Get an episode by id.
    fn get_episode(&self, user_id: &str, id: &str) -> Result<Option<Episode>, RepositoryError>;

    /// Get several episodes by id. Missing ids are silently skipped.
    fn get_episodes(&self, user_id: &str, ids: &[String]) -> Result<Vec<Episode>, RepositoryError>;

    /// List all episodes of a user, newest first.
    fn list_episodes(&self, user_id: &str) -> Result<Vec<Episode>, RepositoryError>;

    /// Delete episodes by id. Ids without a row are ignored.
    fn delete_episodes(&self, user_id: &str, ids: &[String]) -> Result<(), RepositoryError>;

    // ------------------------------------------------------------------
    // Feeds
    // ------------------------------------------------------------------

    /// Insert or replace a feed keyed by `(user_id, id)`.
    fn upsert_feed(&self, feed: &Feed) -> Result<(), RepositoryError>;

    /// Get a feed by id.
    fn get_feed(&self, user_id: &str, id: &str) -> Result<Option<Feed>, RepositoryError>;

    /// List all feeds of a user, default feed first, then by id.
    fn list_feeds(&self, user_id: &str) -> Result<Vec<Feed>, RepositoryError>;

    /// Delete a feed row. Callers are responsible for guarding the default
    /// feed and for cascading publications.
    fn delete_feed(&self, user_id: &str, id: &str) -> Result<(), RepositoryError>;

    // ------------------------------------------------------------------
    // Publications
    // ------------------------------------------------------------------

    /// Bulk-insert publications. Existing `(episode, feed)` pairs are
    /// replaced, which keeps re-runs idempotent.
    fn insert_publications(&self, publications: &[Publication]) -> Result<(), RepositoryError>;

    /// Delete the given `(episode_id, feed_id)` memberships.
    fn delete_publications(
        &self,
        user_id: &str,
        pairs: &[(String, String)],
    ) -> Result<(), RepositoryError>;

    /// List every publication referencing any of the given episodes.
    fn list_publications_by_episodes(
        &self,
        user_id: &str,
        episode_ids: &[String],
    ) -> Result<Vec<Publication>, RepositoryError>;

    /// List a feed's publications in insertion order, oldest first.
    ///
    /// This ordering is load-bearing: it defines user-visible episode
    /// numbering in the published feed artifact.
    fn list_publications_by_feed(
        &self,
        user_id: &str,
        feed_id: &str,
    ) -> Result<Vec<Publication>, RepositoryError>;
}

/// Storage backend for episodes, feeds and publications.
pub trait Repository: RepositoryOps + Send + Sync {
    /// Run `f` against a transaction-scoped view of the repository.
    ///
    /// Commits when `f` returns `Ok`, rolls back every write when it
    /// returns `Err`.
    fn transaction(
        &self,
        f: &mut dyn FnMut(&dyn RepositoryOps) -> Result<(), RepositoryError>,
    ) -> Result<(), RepositoryError>;
}
