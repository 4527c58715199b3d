//! Queue topics and message payload types.
//!
//! Every payload carries enough state to be replayed: the queue delivers
//! at-least-once and a consumer death mid-processing makes the message
//! re-deliverable, so handlers see duplicates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::episode::ProcessingMode;

/// Topic for episode creation requests.
pub const TOPIC_CREATE_EPISODES: &str = "episodes.create";

/// Topic for episode status polling.
pub const TOPIC_POLL_STATUS: &str = "episodes.poll-status";

/// Topic for feed artifact regeneration.
pub const TOPIC_REGENERATE_FEEDS: &str = "feeds.regenerate";

/// Request to create episodes from a media source.
///
/// Each variant group becomes one episode; the group's member variants are
/// concatenated (or passed through, for `UploadOriginal`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateEpisodesMessage {
    /// Media source (magnet link or downloadable URL).
    pub url: String,

    /// One inner list of variant file paths per episode to create.
    pub variant_groups: Vec<Vec<String>>,

    /// Owning user.
    pub user_id: String,

    /// How the media backend should process each group.
    pub processing_mode: ProcessingMode,
}

/// Self-requeueing request to poll remote job statuses for a set of episodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollEpisodesStatusMessage {
    /// Episodes to poll.
    pub episode_ids: Vec<String>,

    /// Owning user.
    pub user_id: String,

    /// When polling for this episode set first started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polling_started_at: Option<DateTime<Utc>>,

    /// Current backoff delay in seconds; grows on every requeue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_secs: Option<f64>,

    /// Do not process before this time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_not_before: Option<DateTime<Utc>>,

    /// How many times episodes with an unresolvable remote status have been
    /// requeued. Bounded by the polling config's requeue cap.
    #[serde(default)]
    pub requeue_count: u32,
}

/// Request to rebuild the artifacts of a set of feeds.
///
/// An empty feed set is legal and regeneration treats it as a no-op.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegenerateFeedsMessage {
    /// Feeds to rebuild.
    pub feed_ids: Vec<String>,

    /// Owning user.
    pub user_id: String,
}
