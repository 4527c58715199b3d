//! Publication reconciliation integration tests.
//!
//! Runs the orchestrator's publish/unpublish/rename/delete surface with the
//! real queue consumers, asserting membership and the regenerated feed
//! artifacts stay consistent.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use podcastino_core::{
    testing::{MockArtifactStore, MockMediaBackend},
    Episode, EpisodeStatus, EventsConfig, FeedConfig, Orchestrator, PollingConfig, Queue,
    QueueConfig, Repository, RepositoryOps, SqliteQueue, SqliteRepository, DEFAULT_FEED_ID,
};

struct TestHarness {
    repository: Arc<SqliteRepository>,
    artifact_store: Arc<MockArtifactStore>,
    queue: SqliteQueue,
    orchestrator: Orchestrator,
}

impl TestHarness {
    fn new() -> Self {
        let repository = Arc::new(SqliteRepository::in_memory().expect("repository"));
        let artifact_store = Arc::new(MockArtifactStore::new());
        let queue = SqliteQueue::in_memory(QueueConfig {
            poll_interval_ms: 10,
            visibility_timeout_secs: 5,
            retry_delays_secs: vec![0, 0],
        })
        .expect("queue");

        let (orchestrator, _events_rx) = Orchestrator::new(
            Arc::clone(&repository) as Arc<dyn Repository>,
            Arc::new(MockMediaBackend::new()),
            Arc::clone(&artifact_store) as Arc<dyn podcastino_core::ArtifactStore>,
            Arc::new(queue.clone()) as Arc<dyn Queue>,
            PollingConfig::default(),
            FeedConfig::default(),
            EventsConfig::default(),
        );
        orchestrator.start();

        Self {
            repository,
            artifact_store,
            queue,
            orchestrator,
        }
    }

    /// Seed a completed episode directly in the repository.
    fn seed_episode(&self, id: &str, title: &str) -> String {
        let now = Utc::now();
        self.repository
            .upsert_episode(&Episode {
                id: id.to_string(),
                user_id: "u1".to_string(),
                title: title.to_string(),
                created_at: now,
                source_url: String::new(),
                source_files: vec![],
                remote_job_id: None,
                storage_key: format!("u1/episodes/{}.mp3", id),
                artifact_url: format!("https://store.mock/u1/episodes/{}.mp3", id),
                status: EpisodeStatus::Complete,
                duration_secs: Some(60),
                byte_length: Some(1000),
                media_format: "mp3".to_string(),
                updated_at: now,
            })
            .unwrap();
        id.to_string()
    }

    /// Wait until the feed artifact exists and satisfies a predicate.
    async fn wait_for_artifact(
        &self,
        feed_id: &str,
        mut predicate: impl FnMut(&str) -> bool,
    ) -> bool {
        let key = format!("u1/feeds/{}.xml", feed_id);
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_secs(5) {
            if let Some((bytes, _)) = self.artifact_store.object(&key) {
                if predicate(&String::from_utf8(bytes).unwrap()) {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    fn feed_episode_ids(&self, feed_id: &str) -> Vec<String> {
        self.orchestrator
            .list_feed_episodes("u1", feed_id)
            .unwrap()
            .into_iter()
            .map(|episode| episode.id)
            .collect()
    }
}

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[tokio::test]
async fn test_publish_regenerates_default_feed_artifact() {
    let harness = TestHarness::new();
    harness.seed_episode("1", "Morning news");

    harness
        .orchestrator
        .publish_episodes("u1", &ids(&["1"]), &ids(&[DEFAULT_FEED_ID]))
        .await
        .unwrap();

    assert!(
        harness
            .wait_for_artifact(DEFAULT_FEED_ID, |xml| xml.contains("Morning news"))
            .await,
        "published episode should appear in the regenerated artifact"
    );
    harness.queue.stop();
}

#[tokio::test]
async fn test_membership_follows_desired_set_exactly() {
    let harness = TestHarness::new();
    harness.seed_episode("1", "Ep one");
    let feed_a = harness.orchestrator.create_feed("u1", "A").unwrap();
    let feed_b = harness.orchestrator.create_feed("u1", "B").unwrap();
    let feed_c = harness.orchestrator.create_feed("u1", "C").unwrap();

    harness
        .orchestrator
        .publish_episodes("u1", &ids(&["1"]), &[feed_a.id.clone(), feed_b.id.clone()])
        .await
        .unwrap();
    assert_eq!(harness.feed_episode_ids(&feed_a.id), vec!["1"]);
    assert_eq!(harness.feed_episode_ids(&feed_b.id), vec!["1"]);

    harness
        .orchestrator
        .publish_episodes("u1", &ids(&["1"]), &[feed_b.id.clone(), feed_c.id.clone()])
        .await
        .unwrap();
    assert!(harness.feed_episode_ids(&feed_a.id).is_empty());
    assert_eq!(harness.feed_episode_ids(&feed_b.id), vec!["1"]);
    assert_eq!(harness.feed_episode_ids(&feed_c.id), vec!["1"]);

    harness.queue.stop();
}

#[tokio::test]
async fn test_feed_ordering_is_publication_order() {
    let harness = TestHarness::new();
    // Seeded out of id order; publication order decides.
    harness.seed_episode("5", "First published");
    harness.seed_episode("2", "Second published");

    harness
        .orchestrator
        .publish_episodes("u1", &ids(&["5"]), &ids(&[DEFAULT_FEED_ID]))
        .await
        .unwrap();
    // Later insertion must sort after the earlier one.
    tokio::time::sleep(Duration::from_millis(5)).await;
    harness
        .orchestrator
        .publish_episodes("u1", &ids(&["2"]), &ids(&[DEFAULT_FEED_ID]))
        .await
        .unwrap();

    assert_eq!(harness.feed_episode_ids(DEFAULT_FEED_ID), vec!["5", "2"]);

    assert!(
        harness
            .wait_for_artifact(DEFAULT_FEED_ID, |xml| {
                match (xml.find("First published"), xml.find("Second published")) {
                    (Some(first), Some(second)) => first < second,
                    _ => false,
                }
            })
            .await
    );
    harness.queue.stop();
}

#[tokio::test]
async fn test_rename_episode_updates_artifact() {
    let harness = TestHarness::new();
    harness.seed_episode("1", "Old title");
    harness
        .orchestrator
        .publish_episodes("u1", &ids(&["1"]), &ids(&[DEFAULT_FEED_ID]))
        .await
        .unwrap();
    assert!(
        harness
            .wait_for_artifact(DEFAULT_FEED_ID, |xml| xml.contains("Old title"))
            .await
    );

    harness
        .orchestrator
        .rename_episodes("u1", &[("1".to_string(), "New title".to_string())])
        .await
        .unwrap();

    assert!(
        harness
            .wait_for_artifact(DEFAULT_FEED_ID, |xml| {
                xml.contains("New title") && !xml.contains("Old title")
            })
            .await,
        "rename should propagate to the feed artifact"
    );
    harness.queue.stop();
}

#[tokio::test]
async fn test_delete_episode_cascades_and_empties_feed() {
    let harness = TestHarness::new();
    harness.seed_episode("1", "Doomed");
    harness
        .orchestrator
        .publish_episodes("u1", &ids(&["1"]), &ids(&[DEFAULT_FEED_ID]))
        .await
        .unwrap();
    assert!(
        harness
            .wait_for_artifact(DEFAULT_FEED_ID, |xml| xml.contains("Doomed"))
            .await
    );

    harness
        .orchestrator
        .delete_episodes("u1", &ids(&["1"]))
        .await
        .unwrap();

    // Membership is gone immediately.
    assert!(harness.feed_episode_ids(DEFAULT_FEED_ID).is_empty());
    // The artifact is rebuilt without the episode.
    assert!(
        harness
            .wait_for_artifact(DEFAULT_FEED_ID, |xml| !xml.contains("Doomed"))
            .await
    );
    // The episode artifact was deleted from the store.
    assert!(harness
        .artifact_store
        .deleted_keys()
        .contains(&"u1/episodes/1.mp3".to_string()));

    harness.queue.stop();
}

#[tokio::test]
async fn test_unpublish_keeps_other_feed_memberships() {
    let harness = TestHarness::new();
    harness.seed_episode("1", "Shared");
    let feed = harness.orchestrator.create_feed("u1", "Second").unwrap();

    harness
        .orchestrator
        .publish_episodes(
            "u1",
            &ids(&["1"]),
            &[DEFAULT_FEED_ID.to_string(), feed.id.clone()],
        )
        .await
        .unwrap();

    harness
        .orchestrator
        .unpublish_episodes("u1", &ids(&["1"]), DEFAULT_FEED_ID)
        .await
        .unwrap();

    assert!(harness.feed_episode_ids(DEFAULT_FEED_ID).is_empty());
    assert_eq!(harness.feed_episode_ids(&feed.id), vec!["1"]);
    harness.queue.stop();
}
