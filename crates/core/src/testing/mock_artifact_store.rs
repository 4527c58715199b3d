//! Mock artifact store for testing.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::artifact_store::{ArtifactStore, ArtifactStoreError};

/// In-memory artifact store: records puts and deletes.
pub struct MockArtifactStore {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    deleted: Mutex<Vec<String>>,
    fail_delete: Mutex<bool>,
}

impl MockArtifactStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            deleted: Mutex::new(Vec::new()),
            fail_delete: Mutex::new(false),
        }
    }

    /// Make `delete` fail.
    pub fn set_fail_delete(&self, fail: bool) {
        *self.fail_delete.lock().unwrap() = fail;
    }

    /// Stored object bytes and content type, if present.
    pub fn object(&self, key: &str) -> Option<(Vec<u8>, String)> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Keys deleted so far, in order.
    pub fn deleted_keys(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

impl Default for MockArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactStore for MockArtifactStore {
    async fn presigned_url(&self, key: &str) -> Result<String, ArtifactStoreError> {
        Ok(format!("https://upload.mock/{}", key))
    }

    fn url(&self, key: &str) -> String {
        format!("https://store.mock/{}", key)
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ArtifactStoreError> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ArtifactStoreError> {
        if *self.fail_delete.lock().unwrap() {
            return Err(ArtifactStoreError::ApiError("mock delete failure".to_string()));
        }
        self.objects.lock().unwrap().remove(key);
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }
}
