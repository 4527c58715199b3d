//! Core episode, feed and publication data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Feed id reserved for the per-user default feed.
///
/// The default feed is created lazily the first time a user's feeds are
/// queried and can never be deleted.
pub const DEFAULT_FEED_ID: &str = "1";

// ============================================================================
// Processing Mode
// ============================================================================

/// How the media backend should process a variant group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Remote-process the group's variants and merge them into one episode.
    Concatenate,
    /// Pass a single variant through untouched.
    UploadOriginal,
}

impl ProcessingMode {
    /// Returns the mode as a string (for job submission and logging).
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Concatenate => "concatenate",
            ProcessingMode::UploadOriginal => "upload_original",
        }
    }
}

// ============================================================================
// Episode Status
// ============================================================================

/// Processing status of an episode.
///
/// Status only ever moves forward:
/// ```text
/// Undefined -> Created -> Pending -> Downloading -> Processing -> Uploading -> Complete
/// ```
/// `Undefined` is never persisted; it exists only as the "before creation"
/// side of the first status-change event. `Complete` is terminal.
///
/// The derive order is load-bearing: `Ord` on the variants is the transition
/// order, which is what makes forward-only checks a single comparison.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Undefined,
    Created,
    Pending,
    Downloading,
    Processing,
    Uploading,
    Complete,
}

impl EpisodeStatus {
    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EpisodeStatus::Complete)
    }

    /// Returns true if `next` is a legal successor of this status.
    ///
    /// Skipping intermediate states is allowed (a fast remote job may go
    /// straight from `pending` to `complete` between two polls); moving
    /// backward is not.
    pub fn can_advance_to(&self, next: EpisodeStatus) -> bool {
        next >= *self
    }

    /// Returns the status as a string (for filtering and logging).
    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeStatus::Undefined => "undefined",
            EpisodeStatus::Created => "created",
            EpisodeStatus::Pending => "pending",
            EpisodeStatus::Downloading => "downloading",
            EpisodeStatus::Processing => "processing",
            EpisodeStatus::Uploading => "uploading",
            EpisodeStatus::Complete => "complete",
        }
    }
}

impl std::fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Episode
// ============================================================================

/// One unit of processed media owned by a user.
///
/// Identity is `(user_id, id)`; `id` is a per-user monotonically increasing
/// counter allocated by the repository, not a globally unique value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Episode {
    /// Per-user local id.
    pub id: String,

    /// Owning user.
    pub user_id: String,

    /// Display title, derived at creation and mutable via rename.
    pub title: String,

    /// When the episode was created.
    pub created_at: DateTime<Utc>,

    /// Source the media was acquired from (magnet link or plain URL).
    pub source_url: String,

    /// File selection within the source that makes up this episode.
    pub source_files: Vec<String>,

    /// Identifier of the remote processing job, once submitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_job_id: Option<String>,

    /// Artifact store key the processed media is written to.
    pub storage_key: String,

    /// Public URL of the processed media artifact.
    pub artifact_url: String,

    /// Current processing status.
    pub status: EpisodeStatus,

    /// Duration in seconds, populated on transition into uploading/complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,

    /// Artifact size in bytes, populated on transition into uploading/complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_length: Option<u64>,

    /// Media container format of the artifact.
    pub media_format: String,

    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Episode {
    /// Returns true if this episode should still be polled for status.
    pub fn is_pollable(&self) -> bool {
        !self.status.is_terminal() && self.remote_job_id.is_some()
    }
}

// ============================================================================
// Feed
// ============================================================================

/// A named, user-owned collection of episodes with one published artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feed {
    /// Per-user local id; `"1"` is the default feed.
    pub id: String,

    /// Owning user.
    pub user_id: String,

    /// Display title, also used as the RSS channel title.
    pub title: String,

    /// Public URL of the published RSS artifact.
    pub artifact_url: String,

    /// When the feed was created.
    pub created_at: DateTime<Utc>,
}

impl Feed {
    /// Returns true if this is the undeletable default feed.
    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_FEED_ID
    }
}

// ============================================================================
// Publication
// ============================================================================

/// Membership record asserting an episode belongs to a feed.
///
/// This join entity is the single source of truth for membership. Insertion
/// order (creation timestamp, then storage order) defines the user-visible
/// episode ordering within a feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Publication {
    /// Owning user.
    pub user_id: String,

    /// Member episode.
    pub episode_id: String,

    /// Containing feed.
    pub feed_id: String,

    /// When the membership was created.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn episode(status: EpisodeStatus) -> Episode {
        Episode {
            id: "1".to_string(),
            user_id: "u1".to_string(),
            title: "Ep 01".to_string(),
            created_at: Utc::now(),
            source_url: "magnet:?xt=urn:btih:abc".to_string(),
            source_files: vec!["Show/Ep 01/part1.mp3".to_string()],
            remote_job_id: Some("job-1".to_string()),
            storage_key: "u1/episodes/1.mp3".to_string(),
            artifact_url: "https://store.example/u1/episodes/1.mp3".to_string(),
            status,
            duration_secs: None,
            byte_length: None,
            media_format: "mp3".to_string(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_order_is_transition_order() {
        use EpisodeStatus::*;
        let order = [
            Undefined, Created, Pending, Downloading, Processing, Uploading, Complete,
        ];
        for pair in order.windows(2) {
            assert!(pair[0] < pair[1], "{:?} should precede {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_status_never_moves_backward() {
        assert!(EpisodeStatus::Pending.can_advance_to(EpisodeStatus::Downloading));
        assert!(EpisodeStatus::Pending.can_advance_to(EpisodeStatus::Complete));
        assert!(EpisodeStatus::Pending.can_advance_to(EpisodeStatus::Pending));
        assert!(!EpisodeStatus::Downloading.can_advance_to(EpisodeStatus::Pending));
        assert!(!EpisodeStatus::Complete.can_advance_to(EpisodeStatus::Uploading));
    }

    #[test]
    fn test_complete_is_terminal() {
        assert!(EpisodeStatus::Complete.is_terminal());
        assert!(!EpisodeStatus::Uploading.is_terminal());
        assert!(!EpisodeStatus::Created.is_terminal());
    }

    #[test]
    fn test_episode_pollable() {
        assert!(episode(EpisodeStatus::Created).is_pollable());
        assert!(!episode(EpisodeStatus::Complete).is_pollable());

        let mut no_job = episode(EpisodeStatus::Created);
        no_job.remote_job_id = None;
        assert!(!no_job.is_pollable());
    }

    #[test]
    fn test_default_feed_detection() {
        let feed = Feed {
            id: DEFAULT_FEED_ID.to_string(),
            user_id: "u1".to_string(),
            title: "My podcast".to_string(),
            artifact_url: String::new(),
            created_at: Utc::now(),
        };
        assert!(feed.is_default());

        let other = Feed { id: "2".to_string(), ..feed };
        assert!(!other.is_default());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&EpisodeStatus::Downloading).unwrap();
        assert_eq!(json, r#""downloading""#);

        let status: EpisodeStatus = serde_json::from_str(r#""complete""#).unwrap();
        assert_eq!(status, EpisodeStatus::Complete);
    }

    #[test]
    fn test_processing_mode_strings() {
        assert_eq!(ProcessingMode::Concatenate.as_str(), "concatenate");
        assert_eq!(ProcessingMode::UploadOriginal.as_str(), "upload_original");
    }
}
