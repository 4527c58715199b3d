//! HTTP media backend client implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::MediaBackendConfig;

use super::{CreateJobRequest, MediaBackend, MediaBackendError, RemoteJobState};

/// HTTP client for the remote media processing service.
pub struct HttpMediaBackend {
    client: Client,
    config: MediaBackendConfig,
}

#[derive(Serialize)]
struct CreateJobBody<'a> {
    source_url: &'a str,
    mode: &'a str,
    variants: &'a [String],
    destination_url: &'a str,
}

#[derive(Deserialize)]
struct CreateJobResponse {
    job_id: String,
}

#[derive(Serialize)]
struct StatusQueryBody<'a> {
    job_ids: &'a [String],
}

#[derive(Deserialize)]
struct StatusQueryResponse {
    jobs: HashMap<String, RemoteJobState>,
}

impl HttpMediaBackend {
    /// Create a new media backend client.
    pub fn new(config: MediaBackendConfig) -> Result<Self, MediaBackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| MediaBackendError::ConnectionFailed(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn map_request_error(e: reqwest::Error) -> MediaBackendError {
        if e.is_timeout() {
            MediaBackendError::Timeout
        } else if e.is_connect() {
            MediaBackendError::ConnectionFailed(e.to_string())
        } else {
            MediaBackendError::ApiError(e.to_string())
        }
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(format!("{}{}", self.base_url(), path));
        if let Some(ref api_key) = self.config.api_key {
            builder = builder.header("X-Api-Key", api_key);
        }
        builder
    }
}

#[async_trait]
impl MediaBackend for HttpMediaBackend {
    async fn create_upload_job(
        &self,
        request: CreateJobRequest,
    ) -> Result<String, MediaBackendError> {
        let body = CreateJobBody {
            source_url: &request.source_url,
            mode: request.mode.as_str(),
            variants: &request.variants,
            destination_url: &request.destination_url,
        };

        let response = self
            .request("/api/v1/jobs")
            .json(&body)
            .send()
            .await
            .map_err(Self::map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MediaBackendError::ApiError(format!(
                "HTTP {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: CreateJobResponse = response
            .json()
            .await
            .map_err(|e| MediaBackendError::InvalidResponse(e.to_string()))?;

        debug!("Created remote job {}", parsed.job_id);
        Ok(parsed.job_id)
    }

    async fn fetch_job_status_map(
        &self,
        job_ids: &[String],
    ) -> Result<HashMap<String, RemoteJobState>, MediaBackendError> {
        if job_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let response = self
            .request("/api/v1/jobs/status")
            .json(&StatusQueryBody { job_ids })
            .send()
            .await
            .map_err(Self::map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaBackendError::ApiError(format!("HTTP {}", status)));
        }

        let parsed: StatusQueryResponse = response
            .json()
            .await
            .map_err(|e| MediaBackendError::InvalidResponse(e.to_string()))?;

        Ok(parsed.jobs)
    }
}
