//! Status-change event stream exposed to external listeners.
//!
//! Handlers emit one batch per processed message; the UI layer consumes
//! batches to notify users. The channel is bounded: a full buffer blocks
//! the emitting handler, which is the accepted backpressure point.

use tokio::sync::mpsc;

use crate::episode::{Episode, EpisodeStatus};

/// One observed episode status transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    /// Episode after the transition was applied.
    pub episode: Episode,
    /// Status before the transition (`Undefined` for creation).
    pub old_status: EpisodeStatus,
    /// Status after the transition.
    pub new_status: EpisodeStatus,
}

/// Handle for emitting status-change batches.
///
/// Cheaply cloneable; clones share the same channel.
#[derive(Clone)]
pub struct EventHandle {
    tx: mpsc::Sender<Vec<StatusChange>>,
}

impl EventHandle {
    /// Create a new event handle from a channel sender.
    pub fn new(tx: mpsc::Sender<Vec<StatusChange>>) -> Self {
        Self { tx }
    }

    /// Emit a batch of status changes.
    ///
    /// Blocks while the buffer is full. Delivery is best-effort: if the
    /// listener is gone the batch is dropped and logged, not failed.
    pub async fn emit(&self, changes: Vec<StatusChange>) {
        if changes.is_empty() {
            return;
        }
        if self.tx.send(changes).await.is_err() {
            tracing::debug!("No status-change listener, batch dropped");
        }
    }
}

/// Create a bounded status-change channel.
///
/// Returns the emitting handle (clone it to share across handlers) and the
/// receiving side for the external listener.
pub fn create_event_channel(
    buffer_size: usize,
) -> (EventHandle, mpsc::Receiver<Vec<StatusChange>>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EventHandle::new(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn change(new_status: EpisodeStatus) -> StatusChange {
        let episode = Episode {
            id: "1".to_string(),
            user_id: "u1".to_string(),
            title: "Ep".to_string(),
            created_at: Utc::now(),
            source_url: String::new(),
            source_files: vec![],
            remote_job_id: None,
            storage_key: String::new(),
            artifact_url: String::new(),
            status: new_status,
            duration_secs: None,
            byte_length: None,
            media_format: "mp3".to_string(),
            updated_at: Utc::now(),
        };
        StatusChange {
            old_status: EpisodeStatus::Undefined,
            new_status,
            episode,
        }
    }

    #[tokio::test]
    async fn test_emit_batch() {
        let (handle, mut rx) = create_event_channel(8);
        handle
            .emit(vec![change(EpisodeStatus::Created), change(EpisodeStatus::Complete)])
            .await;

        let batch = rx.recv().await.expect("Should receive batch");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].new_status, EpisodeStatus::Created);
    }

    #[tokio::test]
    async fn test_empty_batch_is_not_sent() {
        let (handle, mut rx) = create_event_channel(8);
        handle.emit(vec![]).await;
        drop(handle);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_emit_without_listener_does_not_fail() {
        let (handle, rx) = create_event_channel(8);
        drop(rx);
        // Should not panic or hang.
        handle.emit(vec![change(EpisodeStatus::Created)]).await;
    }

    #[tokio::test]
    async fn test_cloned_handles_share_channel() {
        let (handle, mut rx) = create_event_channel(8);
        let clone = handle.clone();
        clone.emit(vec![change(EpisodeStatus::Pending)]).await;
        let batch = rx.recv().await.unwrap();
        assert_eq!(batch[0].new_status, EpisodeStatus::Pending);
    }
}
