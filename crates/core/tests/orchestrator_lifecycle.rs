//! Orchestrator lifecycle integration tests.
//!
//! These tests run the real queue consumers over an in-memory SQLite queue
//! and repository, with mocked media backend and artifact store, and drive
//! episodes through: created -> (remote processing) -> complete, with feed
//! publication and artifact regeneration.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use podcastino_core::{
    testing::{MockArtifactStore, MockMediaBackend},
    EpisodeStatus, EventsConfig, FeedConfig, Orchestrator, PollingConfig, ProcessingMode, Queue,
    QueueConfig, Repository, RepositoryOps, SqliteQueue, SqliteRepository, StatusChange,
    DEFAULT_FEED_ID,
};

/// Test helper bundling the orchestrator with all its collaborators.
struct TestHarness {
    repository: Arc<SqliteRepository>,
    media_backend: Arc<MockMediaBackend>,
    artifact_store: Arc<MockArtifactStore>,
    queue: SqliteQueue,
    events_rx: mpsc::Receiver<Vec<StatusChange>>,
    orchestrator: Orchestrator,
}

impl TestHarness {
    fn new() -> Self {
        let repository = Arc::new(SqliteRepository::in_memory().expect("repository"));
        let media_backend = Arc::new(MockMediaBackend::new());
        let artifact_store = Arc::new(MockArtifactStore::new());
        // Zero-delay retries would burn the whole schedule inside an
        // induced-failure window; one-second steps keep retries observable.
        let queue = SqliteQueue::in_memory(QueueConfig {
            poll_interval_ms: 10,
            visibility_timeout_secs: 5,
            retry_delays_secs: vec![1, 1, 1, 1, 1],
        })
        .expect("queue");

        // Fast backoff so tests converge quickly.
        let polling = PollingConfig {
            initial_delay_secs: 0.02,
            growth_factor: 1.5,
            max_delay_secs: 0.1,
            max_requeue_count: 5,
        };

        let (orchestrator, events_rx) = Orchestrator::new(
            Arc::clone(&repository) as Arc<dyn Repository>,
            Arc::clone(&media_backend) as Arc<dyn podcastino_core::MediaBackend>,
            Arc::clone(&artifact_store) as Arc<dyn podcastino_core::ArtifactStore>,
            Arc::new(queue.clone()) as Arc<dyn Queue>,
            polling,
            FeedConfig::default(),
            EventsConfig::default(),
        );
        orchestrator.start();

        Self {
            repository,
            media_backend,
            artifact_store,
            queue,
            events_rx,
            orchestrator,
        }
    }

    /// Poll a condition until it holds or the timeout elapses.
    async fn wait_for(&self, mut condition: impl FnMut(&Self) -> bool, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if condition(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    fn episode_status(&self, id: &str) -> Option<EpisodeStatus> {
        self.repository
            .get_episode("u1", id)
            .ok()
            .flatten()
            .map(|episode| episode.status)
    }
}

#[tokio::test]
async fn test_full_lifecycle_from_creation_to_published_feed() {
    let mut harness = TestHarness::new();

    // Create one episode in concatenate mode, two variants under a common
    // directory prefix.
    harness
        .orchestrator
        .request_episode_creation(
            "u1",
            "magnet:?xt=urn:btih:abc",
            vec![vec![
                "Show/Ep 01/part1.mp3".to_string(),
                "Show/Ep 01/part2.mp3".to_string(),
            ]],
            ProcessingMode::Concatenate,
        )
        .await
        .unwrap();

    // The creation consumer picks the message up and persists the episode.
    assert!(
        harness
            .wait_for(
                |h| !h.repository.list_episodes("u1").unwrap().is_empty(),
                Duration::from_secs(5)
            )
            .await,
        "episode should be created"
    );

    let episodes = harness.repository.list_episodes("u1").unwrap();
    assert_eq!(episodes.len(), 1);
    let episode = &episodes[0];
    assert_eq!(episode.title, "Ep 01");
    assert_eq!(episode.status, EpisodeStatus::Created);
    let episode_id = episode.id.clone();
    let job_id = episode.remote_job_id.clone().unwrap();

    // Publish to the default feed.
    harness
        .orchestrator
        .publish_episodes("u1", &[episode_id.clone()], &[DEFAULT_FEED_ID.to_string()])
        .await
        .unwrap();
    let feed_episodes = harness
        .orchestrator
        .list_feed_episodes("u1", DEFAULT_FEED_ID)
        .unwrap();
    assert_eq!(
        feed_episodes.iter().map(|e| e.id.clone()).collect::<Vec<_>>(),
        vec![episode_id.clone()]
    );

    // Remote job completes with a known byte length.
    harness
        .media_backend
        .set_status(&job_id, "complete", Some(1000), Some(90));

    assert!(
        harness
            .wait_for(
                |h| h.episode_status(&episode_id) == Some(EpisodeStatus::Complete),
                Duration::from_secs(5)
            )
            .await,
        "episode should reach complete"
    );

    let episode = harness
        .repository
        .get_episode("u1", &episode_id)
        .unwrap()
        .unwrap();
    assert_eq!(episode.byte_length, Some(1000));
    assert_eq!(episode.duration_secs, Some(90));

    // The feed artifact is regenerated with the completed episode. An
    // earlier artifact from the publish-time regeneration may exist; wait
    // for the rebuild that carries the final byte length.
    assert!(
        harness
            .wait_for(
                |h| match h.artifact_store.object("u1/feeds/1.xml") {
                    Some((bytes, _)) =>
                        String::from_utf8_lossy(&bytes).contains("length=\"1000\""),
                    None => false,
                },
                Duration::from_secs(5)
            )
            .await,
        "feed artifact should be rebuilt with the completed episode"
    );
    let (bytes, content_type) = harness.artifact_store.object("u1/feeds/1.xml").unwrap();
    assert_eq!(content_type, "application/rss+xml");
    let xml = String::from_utf8(bytes).unwrap();
    assert!(xml.contains("<title>Ep 01</title>"));

    // Events: first batch undefined -> created, and some later batch
    // carries created -> complete.
    let first_batch = harness.events_rx.recv().await.unwrap();
    assert_eq!(first_batch.len(), 1);
    assert_eq!(first_batch[0].old_status, EpisodeStatus::Undefined);
    assert_eq!(first_batch[0].new_status, EpisodeStatus::Created);

    let mut saw_complete = false;
    while let Ok(batch) =
        tokio::time::timeout(Duration::from_secs(2), harness.events_rx.recv()).await
    {
        let Some(batch) = batch else { break };
        if batch.iter().any(|change| {
            change.old_status == EpisodeStatus::Created
                && change.new_status == EpisodeStatus::Complete
        }) {
            saw_complete = true;
            break;
        }
    }
    assert!(saw_complete, "should observe created -> complete event");

    harness.queue.stop();
}

#[tokio::test]
async fn test_status_advances_through_intermediate_states_forward_only() {
    let harness = TestHarness::new();

    harness
        .orchestrator
        .request_episode_creation(
            "u1",
            "https://example.com/show.mp3",
            vec![vec!["show.mp3".to_string()]],
            ProcessingMode::UploadOriginal,
        )
        .await
        .unwrap();

    assert!(
        harness
            .wait_for(
                |h| !h.repository.list_episodes("u1").unwrap().is_empty(),
                Duration::from_secs(5)
            )
            .await
    );
    let episode = harness.repository.list_episodes("u1").unwrap().remove(0);
    let job_id = episode.remote_job_id.clone().unwrap();

    harness.media_backend.set_status(&job_id, "downloading", None, None);
    assert!(
        harness
            .wait_for(
                |h| h.episode_status(&episode.id) == Some(EpisodeStatus::Downloading),
                Duration::from_secs(5)
            )
            .await
    );

    // A stale remote report must not move the episode backward.
    harness.media_backend.set_status(&job_id, "accepted", None, None);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        harness.episode_status(&episode.id),
        Some(EpisodeStatus::Downloading)
    );

    harness.media_backend.set_status(&job_id, "complete", Some(10), None);
    assert!(
        harness
            .wait_for(
                |h| h.episode_status(&episode.id) == Some(EpisodeStatus::Complete),
                Duration::from_secs(5)
            )
            .await
    );

    harness.queue.stop();
}

#[tokio::test]
async fn test_transient_backend_failure_is_retried_by_queue() {
    let harness = TestHarness::new();

    harness
        .orchestrator
        .request_episode_creation(
            "u1",
            "magnet:?xt=urn:btih:abc&dn=Retry+Me",
            vec![vec!["a.mp3".to_string()]],
            ProcessingMode::UploadOriginal,
        )
        .await
        .unwrap();

    assert!(
        harness
            .wait_for(
                |h| !h.repository.list_episodes("u1").unwrap().is_empty(),
                Duration::from_secs(5)
            )
            .await
    );
    let episode = harness.repository.list_episodes("u1").unwrap().remove(0);
    let job_id = episode.remote_job_id.clone().unwrap();

    // First status fetches fail; the poll message is retried by the
    // queue's schedule and eventually succeeds.
    harness.media_backend.set_fail_fetch(true);
    harness.media_backend.set_status(&job_id, "complete", Some(1), None);
    tokio::time::sleep(Duration::from_millis(150)).await;
    harness.media_backend.set_fail_fetch(false);

    assert!(
        harness
            .wait_for(
                |h| h.episode_status(&episode.id) == Some(EpisodeStatus::Complete),
                Duration::from_secs(5)
            )
            .await,
        "episode should complete after transient failures"
    );

    harness.queue.stop();
}

#[tokio::test]
async fn test_unreporting_job_is_abandoned_after_requeue_cap() {
    let harness = TestHarness::new();

    harness
        .orchestrator
        .request_episode_creation(
            "u1",
            "magnet:?xt=urn:btih:abc",
            vec![vec!["silent.mp3".to_string()]],
            ProcessingMode::UploadOriginal,
        )
        .await
        .unwrap();

    assert!(
        harness
            .wait_for(
                |h| !h.repository.list_episodes("u1").unwrap().is_empty(),
                Duration::from_secs(5)
            )
            .await
    );
    let episode = harness.repository.list_episodes("u1").unwrap().remove(0);

    // The job never reports. After the requeue cap the poll topic drains
    // and stays empty: the episode is abandoned, not polled forever.
    assert!(
        harness
            .wait_for(
                |h| h.queue.pending_count("episodes.poll-status").unwrap() == 0,
                Duration::from_secs(10)
            )
            .await,
        "poll topic should drain after the requeue cap"
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.queue.pending_count("episodes.poll-status").unwrap(), 0);
    assert_eq!(
        harness.episode_status(&episode.id),
        Some(EpisodeStatus::Created)
    );

    harness.queue.stop();
}
