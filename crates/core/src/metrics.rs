//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Queue (published, handler failures, dead letters)
//! - Episode creation and status polling
//! - Publication reconciliation and feed regeneration

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

// =============================================================================
// Queue Metrics
// =============================================================================

/// Messages published, by topic.
pub static QUEUE_MESSAGES_PUBLISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "podcastino_queue_messages_published_total",
            "Total messages published to the queue",
        ),
        &["topic"],
    )
    .unwrap()
});

/// Handler failures, by topic.
pub static QUEUE_HANDLER_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "podcastino_queue_handler_failures_total",
            "Total message handler failures",
        ),
        &["topic"],
    )
    .unwrap()
});

/// Messages dead-lettered after exhausting the retry schedule, by topic.
pub static QUEUE_MESSAGES_DEAD: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "podcastino_queue_messages_dead_total",
            "Total messages dead-lettered for operator inspection",
        ),
        &["topic"],
    )
    .unwrap()
});

// =============================================================================
// Episode Metrics
// =============================================================================

/// Episodes created total.
pub static EPISODES_CREATED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("podcastino_episodes_created_total", "Total episodes created").unwrap()
});

/// Status transitions observed by the polling loop, by new status.
pub static STATUS_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "podcastino_status_transitions_total",
            "Total episode status transitions",
        ),
        &["to"],
    )
    .unwrap()
});

/// Poll messages requeued with backoff.
pub static POLL_REQUEUES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "podcastino_poll_requeues_total",
        "Total status-poll messages requeued with backoff",
    )
    .unwrap()
});

/// Episodes abandoned after exceeding the requeue cap.
pub static POLL_ABANDONED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "podcastino_poll_abandoned_total",
        "Total episodes abandoned after the requeue cap",
    )
    .unwrap()
});

// =============================================================================
// Feed Metrics
// =============================================================================

/// Feed artifacts regenerated total.
pub static FEED_REGENERATIONS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "podcastino_feed_regenerations_total",
        "Total feed artifacts rebuilt and uploaded",
    )
    .unwrap()
});

/// Register all core metrics on a registry.
pub fn register_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(QUEUE_MESSAGES_PUBLISHED.clone()))?;
    registry.register(Box::new(QUEUE_HANDLER_FAILURES.clone()))?;
    registry.register(Box::new(QUEUE_MESSAGES_DEAD.clone()))?;
    registry.register(Box::new(EPISODES_CREATED.clone()))?;
    registry.register(Box::new(STATUS_TRANSITIONS.clone()))?;
    registry.register(Box::new(POLL_REQUEUES.clone()))?;
    registry.register(Box::new(POLL_ABANDONED.clone()))?;
    registry.register(Box::new(FEED_REGENERATIONS.clone()))?;
    Ok(())
}
