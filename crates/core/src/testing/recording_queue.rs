//! Recording queue for testing.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::queue::{MessageHandler, Queue, QueueError};

/// Queue that records published messages instead of delivering them.
///
/// Useful for asserting exactly what a component enqueues without running
/// consumer loops.
pub struct RecordingQueue {
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
        }
    }

    /// All published `(topic, payload)` pairs, in order.
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().unwrap().clone()
    }

    /// Decoded payloads published on a topic, in order.
    pub fn published_on<T: DeserializeOwned>(&self, topic: &str) -> Vec<T> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| serde_json::from_slice(payload).expect("Invalid test payload"))
            .collect()
    }

    /// Drop all recorded messages.
    pub fn clear(&self) {
        self.published.lock().unwrap().clear();
    }
}

impl Default for RecordingQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Queue for RecordingQueue {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), QueueError> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn subscribe(&self, _topic: &str, _handler: Arc<dyn MessageHandler>) {
        // Recording queues never deliver.
    }
}
