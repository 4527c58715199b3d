//! Media backend trait and data types.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::episode::ProcessingMode;

/// Errors returned by the media backend client.
#[derive(Debug, Error)]
pub enum MediaBackendError {
    /// Request timed out.
    #[error("Media backend request timed out")]
    Timeout,

    /// Could not connect to the backend.
    #[error("Failed to connect to media backend: {0}")]
    ConnectionFailed(String),

    /// Backend returned an error response.
    #[error("Media backend API error: {0}")]
    ApiError(String),

    /// Backend response could not be decoded.
    #[error("Invalid media backend response: {0}")]
    InvalidResponse(String),
}

/// Request to create a remote processing job.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CreateJobRequest {
    /// Media source (magnet link or downloadable URL).
    pub source_url: String,

    /// Processing mode for the job.
    pub mode: ProcessingMode,

    /// File paths within the source to process, in concatenation order.
    pub variants: Vec<String>,

    /// Presigned URL the backend uploads the result to.
    pub destination_url: String,
}

/// Remote-side state of a processing job.
///
/// The status is kept as the raw remote string; mapping it onto the episode
/// state machine (and rejecting unknown values) is the polling loop's job.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RemoteJobState {
    /// Remote status string (`accepted`, `created`, `downloading`,
    /// `processing`, `uploading`, `complete`).
    pub status: String,

    /// Size of the produced artifact in bytes, once known.
    #[serde(default)]
    pub result_byte_length: Option<u64>,

    /// Duration of the produced artifact in seconds, once known.
    #[serde(default)]
    pub result_duration_secs: Option<u32>,
}

/// Remote media processing service.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Submit a processing job. Returns the remote job id.
    async fn create_upload_job(
        &self,
        request: CreateJobRequest,
    ) -> Result<String, MediaBackendError>;

    /// Fetch the status of many jobs in one call.
    ///
    /// Jobs the backend no longer knows about are simply absent from the
    /// returned map; that absence is not an error.
    async fn fetch_job_status_map(
        &self,
        job_ids: &[String],
    ) -> Result<HashMap<String, RemoteJobState>, MediaBackendError>;
}
