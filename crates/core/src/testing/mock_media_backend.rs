//! Mock media backend for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::media_backend::{CreateJobRequest, MediaBackend, MediaBackendError, RemoteJobState};

/// Scriptable media backend: records submitted jobs and serves canned
/// status maps.
pub struct MockMediaBackend {
    created_jobs: Mutex<Vec<CreateJobRequest>>,
    statuses: Mutex<HashMap<String, RemoteJobState>>,
    next_job_id: AtomicU32,
    fail_create: Mutex<bool>,
    fail_fetch: Mutex<bool>,
}

impl MockMediaBackend {
    pub fn new() -> Self {
        Self {
            created_jobs: Mutex::new(Vec::new()),
            statuses: Mutex::new(HashMap::new()),
            next_job_id: AtomicU32::new(1),
            fail_create: Mutex::new(false),
            fail_fetch: Mutex::new(false),
        }
    }

    /// Script the status returned for a job id.
    pub fn set_status(
        &self,
        job_id: &str,
        status: &str,
        byte_length: Option<u64>,
        duration_secs: Option<u32>,
    ) {
        self.statuses.lock().unwrap().insert(
            job_id.to_string(),
            RemoteJobState {
                status: status.to_string(),
                result_byte_length: byte_length,
                result_duration_secs: duration_secs,
            },
        );
    }

    /// Remove a job from the status map (simulates a job the backend no
    /// longer knows about).
    pub fn forget_job(&self, job_id: &str) {
        self.statuses.lock().unwrap().remove(job_id);
    }

    /// Make `create_upload_job` fail.
    pub fn set_fail_create(&self, fail: bool) {
        *self.fail_create.lock().unwrap() = fail;
    }

    /// Make `fetch_job_status_map` fail.
    pub fn set_fail_fetch(&self, fail: bool) {
        *self.fail_fetch.lock().unwrap() = fail;
    }

    /// Jobs submitted so far.
    pub fn created_jobs(&self) -> Vec<CreateJobRequest> {
        self.created_jobs.lock().unwrap().clone()
    }
}

impl Default for MockMediaBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaBackend for MockMediaBackend {
    async fn create_upload_job(
        &self,
        request: CreateJobRequest,
    ) -> Result<String, MediaBackendError> {
        if *self.fail_create.lock().unwrap() {
            return Err(MediaBackendError::ApiError("mock create failure".to_string()));
        }
        self.created_jobs.lock().unwrap().push(request);
        let id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("job-{}", id))
    }

    async fn fetch_job_status_map(
        &self,
        job_ids: &[String],
    ) -> Result<HashMap<String, RemoteJobState>, MediaBackendError> {
        if *self.fail_fetch.lock().unwrap() {
            return Err(MediaBackendError::ConnectionFailed(
                "mock fetch failure".to_string(),
            ));
        }
        let statuses = self.statuses.lock().unwrap();
        Ok(job_ids
            .iter()
            .filter_map(|id| statuses.get(id).map(|state| (id.clone(), state.clone())))
            .collect())
    }
}
