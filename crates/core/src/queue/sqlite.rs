//! SQLite-backed durable queue implementation.
//!
//! Messages are rows; a claim sets a lock expiry so that a consumer death
//! makes the message re-deliverable after the visibility timeout. While a
//! handler runs, the consumer keeps extending its lock, so long-running
//! handlers (e.g. a scheduled poll sleeping until its not-before time) are
//! not spuriously redelivered.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use super::config::QueueConfig;
use super::{HandlerError, MessageHandler, Queue, QueueError, ShutdownSignal};
use crate::metrics;

fn storage_err(e: impl std::fmt::Display) -> QueueError {
    QueueError::Storage(e.to_string())
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// A message claimed by a consumer.
struct ClaimedMessage {
    id: String,
    payload: Vec<u8>,
    attempts: u32,
}

/// A dead-lettered message, surfaced for operator inspection.
#[derive(Debug, Clone)]
pub struct DeadMessage {
    pub id: String,
    pub topic: String,
    pub attempts: u32,
    pub payload: Vec<u8>,
}

struct QueueInner {
    conn: Mutex<Connection>,
    config: QueueConfig,
}

impl QueueInner {
    fn initialize_schema(conn: &Connection) -> Result<(), QueueError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS queue_messages (
                id TEXT PRIMARY KEY,
                topic TEXT NOT NULL,
                payload BLOB NOT NULL,
                enqueued_at INTEGER NOT NULL,
                available_at INTEGER NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                locked_until INTEGER,
                dead INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_queue_due
                ON queue_messages(topic, dead, available_at);
            "#,
        )
        .map_err(storage_err)?;
        Ok(())
    }

    fn insert(&self, topic: &str, payload: &[u8]) -> Result<(), QueueError> {
        let conn = self.conn.lock().unwrap();
        let now = now_ms();
        conn.execute(
            "INSERT INTO queue_messages (id, topic, payload, enqueued_at, available_at) \
             VALUES (?, ?, ?, ?, ?)",
            params![uuid::Uuid::new_v4().to_string(), topic, payload, now, now],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    /// Claim the oldest due message on a topic, locking it for the
    /// visibility timeout. Expired locks are treated as free.
    fn claim(&self, topic: &str) -> Result<Option<ClaimedMessage>, QueueError> {
        let conn = self.conn.lock().unwrap();
        let now = now_ms();
        let locked_until = now + self.config.visibility_timeout().as_millis() as i64;
        conn.query_row(
            "UPDATE queue_messages SET locked_until = ?1
             WHERE id = (
                 SELECT id FROM queue_messages
                 WHERE topic = ?2 AND dead = 0 AND available_at <= ?3
                   AND (locked_until IS NULL OR locked_until <= ?3)
                 ORDER BY available_at ASC, enqueued_at ASC
                 LIMIT 1
             )
             RETURNING id, payload, attempts",
            params![locked_until, topic, now],
            |row| {
                Ok(ClaimedMessage {
                    id: row.get(0)?,
                    payload: row.get(1)?,
                    attempts: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(storage_err)
    }

    fn extend_lock(&self, id: &str) -> Result<(), QueueError> {
        let conn = self.conn.lock().unwrap();
        let locked_until = now_ms() + self.config.visibility_timeout().as_millis() as i64;
        conn.execute(
            "UPDATE queue_messages SET locked_until = ? WHERE id = ?",
            params![locked_until, id],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    fn ack(&self, id: &str) -> Result<(), QueueError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM queue_messages WHERE id = ?", params![id])
            .map_err(storage_err)?;
        Ok(())
    }

    /// Release a claim without consuming a retry attempt (shutdown path).
    fn release(&self, id: &str) -> Result<(), QueueError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE queue_messages SET locked_until = NULL WHERE id = ?",
            params![id],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    /// Record a handler failure: schedule the next retry per the escalating
    /// delay sequence, or dead-letter the message once it is exhausted.
    /// Returns true if the message was dead-lettered.
    fn retry_or_dead(&self, id: &str, attempts: u32) -> Result<bool, QueueError> {
        let conn = self.conn.lock().unwrap();
        let next_attempt = attempts as usize;
        match self.config.retry_delays_secs.get(next_attempt) {
            Some(delay_secs) => {
                let available_at = now_ms() + (*delay_secs as i64) * 1000;
                conn.execute(
                    "UPDATE queue_messages \
                     SET attempts = attempts + 1, available_at = ?, locked_until = NULL \
                     WHERE id = ?",
                    params![available_at, id],
                )
                .map_err(storage_err)?;
                Ok(false)
            }
            None => {
                conn.execute(
                    "UPDATE queue_messages \
                     SET attempts = attempts + 1, dead = 1, locked_until = NULL \
                     WHERE id = ?",
                    params![id],
                )
                .map_err(storage_err)?;
                Ok(true)
            }
        }
    }

    fn pending_count(&self, topic: &str) -> Result<u64, QueueError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM queue_messages WHERE topic = ? AND dead = 0",
            params![topic],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n as u64)
        .map_err(storage_err)
    }

    fn dead_messages(&self) -> Result<Vec<DeadMessage>, QueueError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, topic, attempts, payload FROM queue_messages \
                 WHERE dead = 1 ORDER BY enqueued_at ASC",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(DeadMessage {
                    id: row.get(0)?,
                    topic: row.get(1)?,
                    attempts: row.get(2)?,
                    payload: row.get(3)?,
                })
            })
            .map_err(storage_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
    }
}

/// SQLite-backed durable queue.
///
/// Cheaply cloneable; clones share the same storage and shutdown signal.
/// Multiple subscriptions to the same topic load-balance message claims.
#[derive(Clone)]
pub struct SqliteQueue {
    inner: Arc<QueueInner>,
    shutdown: ShutdownSignal,
}

impl SqliteQueue {
    /// Open (or create) a queue at the given path.
    pub fn new(path: &Path, config: QueueConfig) -> Result<Self, QueueError> {
        let conn = Connection::open(path).map_err(storage_err)?;
        // The repository shares the database file through its own connection.
        conn.busy_timeout(Duration::from_secs(5)).map_err(storage_err)?;
        QueueInner::initialize_schema(&conn)?;
        Ok(Self {
            inner: Arc::new(QueueInner {
                conn: Mutex::new(conn),
                config,
            }),
            shutdown: ShutdownSignal::new(),
        })
    }

    /// Create an in-memory queue (useful for testing).
    pub fn in_memory(config: QueueConfig) -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        QueueInner::initialize_schema(&conn)?;
        Ok(Self {
            inner: Arc::new(QueueInner {
                conn: Mutex::new(conn),
                config,
            }),
            shutdown: ShutdownSignal::new(),
        })
    }

    /// The shutdown signal propagated to consumers and handlers.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Stop all consumer loops. Claimed messages are released by their
    /// consumers on the way out (or by lock expiry at the latest).
    pub fn stop(&self) {
        self.shutdown.trigger();
    }

    /// Number of live (not dead-lettered) messages on a topic.
    pub fn pending_count(&self, topic: &str) -> Result<u64, QueueError> {
        self.inner.pending_count(topic)
    }

    /// Dead-lettered messages awaiting operator inspection.
    pub fn dead_messages(&self) -> Result<Vec<DeadMessage>, QueueError> {
        self.inner.dead_messages()
    }

    /// Run one claimed message through the handler, extending the claim's
    /// lock at half the visibility timeout while the handler runs.
    ///
    /// Returns false when the handler was cancelled and draining should
    /// stop (the message was released, claiming it again would spin).
    async fn process_message(
        inner: &QueueInner,
        topic: &str,
        message: ClaimedMessage,
        handler: &dyn MessageHandler,
        shutdown: &ShutdownSignal,
    ) -> bool {
        let extend_every = inner.config.visibility_timeout() / 2;
        let handler_fut = handler.handle(&message.payload, shutdown);
        tokio::pin!(handler_fut);

        let result = loop {
            tokio::select! {
                result = &mut handler_fut => break result,
                _ = tokio::time::sleep(extend_every.max(Duration::from_millis(100))) => {
                    if let Err(e) = inner.extend_lock(&message.id) {
                        warn!("Failed to extend lock for message {}: {}", message.id, e);
                    }
                }
            }
        };

        match result {
            Ok(()) => {
                if let Err(e) = inner.ack(&message.id) {
                    warn!("Failed to ack message {} on {}: {}", message.id, topic, e);
                }
                true
            }
            Err(HandlerError::Cancelled) => {
                debug!("Message {} on {} released on shutdown", message.id, topic);
                if let Err(e) = inner.release(&message.id) {
                    warn!("Failed to release message {}: {}", message.id, e);
                }
                false
            }
            Err(e) => {
                metrics::QUEUE_HANDLER_FAILURES.with_label_values(&[topic]).inc();
                match inner.retry_or_dead(&message.id, message.attempts) {
                    Ok(true) => {
                        metrics::QUEUE_MESSAGES_DEAD.with_label_values(&[topic]).inc();
                        warn!(
                            "Message {} on {} dead-lettered after {} attempts: {}",
                            message.id,
                            topic,
                            message.attempts + 1,
                            e
                        );
                    }
                    Ok(false) => {
                        warn!(
                            "Message {} on {} failed (attempt {}), will retry: {}",
                            message.id,
                            topic,
                            message.attempts + 1,
                            e
                        );
                    }
                    Err(storage_e) => {
                        warn!(
                            "Failed to schedule retry for message {}: {}",
                            message.id, storage_e
                        );
                    }
                }
                true
            }
        }
    }
}

#[async_trait]
impl Queue for SqliteQueue {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), QueueError> {
        self.inner.insert(topic, payload)?;
        metrics::QUEUE_MESSAGES_PUBLISHED.with_label_values(&[topic]).inc();
        Ok(())
    }

    fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>) {
        let inner = Arc::clone(&self.inner);
        let shutdown = self.shutdown.clone();
        let topic = topic.to_string();

        tokio::spawn(async move {
            info!("Queue consumer started for topic {}", topic);
            let poll_interval = inner.config.poll_interval();
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {
                        // Drain everything currently due, then go back to sleep.
                        while !shutdown.is_triggered() {
                            let claimed = match inner.claim(&topic) {
                                Ok(claimed) => claimed,
                                Err(e) => {
                                    warn!("Failed to claim message on {}: {}", topic, e);
                                    break;
                                }
                            };
                            let Some(message) = claimed else { break };
                            let keep_draining = Self::process_message(
                                &inner,
                                &topic,
                                message,
                                handler.as_ref(),
                                &shutdown,
                            )
                            .await;
                            if !keep_draining {
                                break;
                            }
                        }
                    }
                }
            }
            info!("Queue consumer stopped for topic {}", topic);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> QueueConfig {
        QueueConfig {
            poll_interval_ms: 10,
            visibility_timeout_secs: 5,
            retry_delays_secs: vec![0, 0],
        }
    }

    struct CountingHandler {
        calls: AtomicU32,
        fail_first: u32,
    }

    impl CountingHandler {
        fn new(fail_first: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first,
            }
        }
    }

    #[async_trait]
    impl MessageHandler for CountingHandler {
        async fn handle(
            &self,
            _payload: &[u8],
            _shutdown: &ShutdownSignal,
        ) -> Result<(), HandlerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(HandlerError::Failed("induced failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_publish_and_consume() {
        let queue = SqliteQueue::in_memory(fast_config()).unwrap();
        let handler = Arc::new(CountingHandler::new(0));

        queue.publish("test.topic", b"payload").await.unwrap();
        assert_eq!(queue.pending_count("test.topic").unwrap(), 1);

        queue.subscribe("test.topic", Arc::clone(&handler) as Arc<dyn MessageHandler>);

        let drained = wait_until(
            || queue.pending_count("test.topic").unwrap() == 0,
            Duration::from_secs(2),
        )
        .await;
        assert!(drained, "message should be consumed and acked");
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        queue.stop();
    }

    #[tokio::test]
    async fn test_failed_handler_is_retried() {
        let queue = SqliteQueue::in_memory(fast_config()).unwrap();
        let handler = Arc::new(CountingHandler::new(2));

        queue.publish("retry.topic", b"payload").await.unwrap();
        queue.subscribe("retry.topic", Arc::clone(&handler) as Arc<dyn MessageHandler>);

        let drained = wait_until(
            || queue.pending_count("retry.topic").unwrap() == 0,
            Duration::from_secs(2),
        )
        .await;
        assert!(drained, "message should eventually succeed");
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert!(queue.dead_messages().unwrap().is_empty());
        queue.stop();
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_letter() {
        let queue = SqliteQueue::in_memory(fast_config()).unwrap();
        // Always fails: 1 initial attempt + 2 retries, then dead.
        let handler = Arc::new(CountingHandler::new(u32::MAX));

        queue.publish("dead.topic", b"payload").await.unwrap();
        queue.subscribe("dead.topic", Arc::clone(&handler) as Arc<dyn MessageHandler>);

        let dead = wait_until(
            || !queue.dead_messages().unwrap().is_empty(),
            Duration::from_secs(2),
        )
        .await;
        assert!(dead, "message should be dead-lettered");

        let dead_messages = queue.dead_messages().unwrap();
        assert_eq!(dead_messages.len(), 1);
        assert_eq!(dead_messages[0].topic, "dead.topic");
        assert_eq!(dead_messages[0].attempts, 3);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);

        // Dead messages are no longer delivered.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        queue.stop();
    }

    #[tokio::test]
    async fn test_consumers_load_balance() {
        let queue = SqliteQueue::in_memory(fast_config()).unwrap();
        let handler = Arc::new(CountingHandler::new(0));

        for i in 0..10u8 {
            queue.publish("lb.topic", &[i]).await.unwrap();
        }
        // Two consumers on the same topic; each message is claimed once.
        queue.subscribe("lb.topic", Arc::clone(&handler) as Arc<dyn MessageHandler>);
        queue.subscribe("lb.topic", Arc::clone(&handler) as Arc<dyn MessageHandler>);

        let drained = wait_until(
            || queue.pending_count("lb.topic").unwrap() == 0,
            Duration::from_secs(2),
        )
        .await;
        assert!(drained);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 10);
        queue.stop();
    }

    #[tokio::test]
    async fn test_cancelled_handler_releases_message() {
        struct CancellingHandler;

        #[async_trait]
        impl MessageHandler for CancellingHandler {
            async fn handle(
                &self,
                _payload: &[u8],
                _shutdown: &ShutdownSignal,
            ) -> Result<(), HandlerError> {
                Err(HandlerError::Cancelled)
            }
        }

        let queue = SqliteQueue::in_memory(fast_config()).unwrap();
        queue.publish("cancel.topic", b"payload").await.unwrap();
        queue.subscribe("cancel.topic", Arc::new(CancellingHandler));

        tokio::time::sleep(Duration::from_millis(100)).await;
        queue.stop();

        // Still pending, no retry attempt consumed.
        assert_eq!(queue.pending_count("cancel.topic").unwrap(), 1);
        assert!(queue.dead_messages().unwrap().is_empty());
    }
}
