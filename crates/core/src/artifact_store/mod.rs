//! Artifact store client for feed and episode byte streams.

mod http;

pub use http::HttpArtifactStore;

use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by the artifact store client.
#[derive(Debug, Error)]
pub enum ArtifactStoreError {
    /// Request timed out.
    #[error("Artifact store request timed out")]
    Timeout,

    /// Could not connect to the store.
    #[error("Failed to connect to artifact store: {0}")]
    ConnectionFailed(String),

    /// Store returned an error response.
    #[error("Artifact store API error: {0}")]
    ApiError(String),
}

/// Blob storage for generated feed and episode artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Issue a presigned upload URL for a key. The media backend writes
    /// processed episodes directly to this URL.
    async fn presigned_url(&self, key: &str) -> Result<String, ArtifactStoreError>;

    /// Public URL a stored object is served from.
    fn url(&self, key: &str) -> String;

    /// Store bytes at a key with a content type.
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ArtifactStoreError>;

    /// Delete the object at a key. Deleting a missing object is not an
    /// error.
    async fn delete(&self, key: &str) -> Result<(), ArtifactStoreError>;
}
