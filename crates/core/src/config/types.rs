use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::polling::PollingConfig;
use crate::queue::QueueConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    pub media_backend: MediaBackendConfig,
    pub artifact_store: ArtifactStoreConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("podcastino.db")
}

/// Media backend (remote processing service) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MediaBackendConfig {
    /// Media backend base URL (e.g. "http://localhost:8090")
    pub url: String,
    /// API key sent with every request (optional)
    #[serde(default)]
    pub api_key: Option<String>,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

/// Artifact store (blob gateway) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtifactStoreConfig {
    /// Gateway base URL used for presign/put/delete calls
    pub url: String,
    /// Base URL artifacts are publicly served from
    pub public_url: String,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

fn default_timeout() -> u32 {
    30
}

/// Feed rendering configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    /// Title given to lazily created default feeds.
    #[serde(default = "default_feed_title")]
    pub default_feed_title: String,
    /// RSS channel language tag.
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            default_feed_title: default_feed_title(),
            language: default_language(),
        }
    }
}

fn default_feed_title() -> String {
    "Podcastino".to_string()
}

fn default_language() -> String {
    "en-us".to_string()
}

/// Status-change event stream configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventsConfig {
    /// Bounded buffer size of the outgoing event channel. A full buffer
    /// blocks the emitting handler (accepted backpressure point).
    #[serde(default = "default_event_buffer")]
    pub buffer_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_event_buffer(),
        }
    }
}

fn default_event_buffer() -> usize {
    256
}
