//! Podcastino core: asynchronous orchestration engine turning
//! externally-sourced media into podcast episodes and published feeds.
//!
//! The building blocks, leaf-first: a durable at-least-once [`queue`], the
//! [`episode`] repository, clients for the external [`media_backend`] and
//! [`artifact_store`], the [`creation`] pipeline, the [`polling`] state
//! machine, the [`publication`] reconciler, the [`feed`] regenerator and
//! the [`orchestrator`] façade tying them together.

pub mod artifact_store;
pub mod config;
pub mod creation;
pub mod episode;
pub mod events;
pub mod feed;
pub mod media_backend;
pub mod metrics;
pub mod orchestrator;
pub mod polling;
pub mod publication;
pub mod queue;
pub mod testing;

pub use artifact_store::{ArtifactStore, ArtifactStoreError, HttpArtifactStore};
pub use config::{
    load_config, load_config_from_str, validate_config, ArtifactStoreConfig, Config, ConfigError,
    DatabaseConfig, EventsConfig, FeedConfig, MediaBackendConfig,
};
pub use creation::{CreateError, EpisodeCreator};
pub use episode::{
    Episode, EpisodeStatus, Feed, ProcessingMode, Publication, Repository, RepositoryError,
    RepositoryOps, SqliteRepository, DEFAULT_FEED_ID,
};
pub use events::{create_event_channel, EventHandle, StatusChange};
pub use feed::{feed_storage_key, render_feed, FeedRegenerator, RegenerateError};
pub use media_backend::{
    CreateJobRequest, HttpMediaBackend, MediaBackend, MediaBackendError, RemoteJobState,
};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use polling::{PollError, PollOutcome, PollingConfig, StatusPoller};
pub use publication::{PublicationReconciler, ReconcileError, ReconcileOutcome};
pub use queue::{
    CreateEpisodesMessage, HandlerError, MessageHandler, PollEpisodesStatusMessage, Queue,
    QueueConfig, QueueError, RegenerateFeedsMessage, ShutdownSignal, SqliteQueue,
    TOPIC_CREATE_EPISODES, TOPIC_POLL_STATUS, TOPIC_REGENERATE_FEEDS,
};
