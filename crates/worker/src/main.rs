use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use podcastino_core::{
    load_config, metrics::register_metrics, validate_config, ArtifactStore, HttpArtifactStore,
    HttpMediaBackend, MediaBackend, Orchestrator, Queue, Repository, SqliteQueue,
    SqliteRepository,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("PODCASTINO_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);
    info!("Media backend: {}", config.media_backend.url);

    // Compute config hash for traceability across deployments
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(version = VERSION, config_hash = &config_hash[..16], "Worker starting");

    // Register metrics
    let registry = prometheus::Registry::new();
    register_metrics(&registry).context("Failed to register metrics")?;

    // Create SQLite repository
    let repository: Arc<dyn Repository> = Arc::new(
        SqliteRepository::new(&config.database.path).context("Failed to create repository")?,
    );
    info!("Repository initialized");

    // Create SQLite queue (same database file, own tables)
    let queue = SqliteQueue::new(&config.database.path, config.queue.clone())
        .context("Failed to create queue")?;
    info!("Queue initialized");

    // Create external service clients
    let media_backend: Arc<dyn MediaBackend> = Arc::new(
        HttpMediaBackend::new(config.media_backend.clone())
            .context("Failed to create media backend client")?,
    );
    let artifact_store: Arc<dyn ArtifactStore> = Arc::new(
        HttpArtifactStore::new(config.artifact_store.clone())
            .context("Failed to create artifact store client")?,
    );

    // Wire the orchestrator and subscribe queue consumers
    let (orchestrator, mut events_rx) = Orchestrator::new(
        repository,
        media_backend,
        artifact_store,
        Arc::new(queue.clone()) as Arc<dyn Queue>,
        config.polling.clone(),
        config.feed.clone(),
        config.events.clone(),
    );
    orchestrator.start();
    info!("Orchestrator started");

    // Drain the status-change stream into the log. A real UI layer would
    // consume this channel to notify users.
    let events_task = tokio::spawn(async move {
        while let Some(batch) = events_rx.recv().await {
            for change in batch {
                info!(
                    user = %change.episode.user_id,
                    episode = %change.episode.id,
                    from = %change.old_status,
                    to = %change.new_status,
                    "Episode status changed"
                );
            }
        }
    });

    // Wait for shutdown signal
    signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
    info!("Shutdown signal received");

    // Stop consumers; in-flight messages are released for redelivery.
    queue.stop();
    events_task.abort();

    info!("Worker stopped");
    Ok(())
}
