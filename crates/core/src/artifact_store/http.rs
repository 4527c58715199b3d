//! HTTP artifact store client implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::ArtifactStoreConfig;

use super::{ArtifactStore, ArtifactStoreError};

/// HTTP client for a blob gateway exposing presign/put/delete endpoints.
pub struct HttpArtifactStore {
    client: Client,
    config: ArtifactStoreConfig,
}

#[derive(Deserialize)]
struct PresignResponse {
    upload_url: String,
}

/// Percent-encode a key, preserving `/` as the segment separator.
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

impl HttpArtifactStore {
    /// Create a new artifact store client.
    pub fn new(config: ArtifactStoreConfig) -> Result<Self, ArtifactStoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| ArtifactStoreError::ConnectionFailed(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn map_request_error(e: reqwest::Error) -> ArtifactStoreError {
        if e.is_timeout() {
            ArtifactStoreError::Timeout
        } else if e.is_connect() {
            ArtifactStoreError::ConnectionFailed(e.to_string())
        } else {
            ArtifactStoreError::ApiError(e.to_string())
        }
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn presigned_url(&self, key: &str) -> Result<String, ArtifactStoreError> {
        let response = self
            .client
            .post(format!(
                "{}/presign/{}",
                self.base_url(),
                encode_key(key)
            ))
            .send()
            .await
            .map_err(Self::map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ArtifactStoreError::ApiError(format!("HTTP {}", status)));
        }

        let parsed: PresignResponse = response
            .json()
            .await
            .map_err(|e| ArtifactStoreError::ApiError(e.to_string()))?;
        Ok(parsed.upload_url)
    }

    fn url(&self, key: &str) -> String {
        format!(
            "{}/{}",
            self.config.public_url.trim_end_matches('/'),
            encode_key(key)
        )
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ArtifactStoreError> {
        let response = self
            .client
            .put(format!(
                "{}/objects/{}",
                self.base_url(),
                encode_key(key)
            ))
            .header("Content-Type", content_type)
            .body(bytes)
            .send()
            .await
            .map_err(Self::map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ArtifactStoreError::ApiError(format!("HTTP {}", status)));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ArtifactStoreError> {
        let response = self
            .client
            .delete(format!(
                "{}/objects/{}",
                self.base_url(),
                encode_key(key)
            ))
            .send()
            .await
            .map_err(Self::map_request_error)?;

        let status = response.status();
        // A missing object is already deleted.
        if !status.is_success() && status.as_u16() != 404 {
            return Err(ArtifactStoreError::ApiError(format!("HTTP {}", status)));
        }
        Ok(())
    }
}
