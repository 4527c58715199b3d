use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Required URL fields are non-empty
/// - Polling backoff parameters are sane
/// - Queue retry schedule is non-empty
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.media_backend.url.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "media_backend.url cannot be empty".to_string(),
        ));
    }

    if config.artifact_store.url.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "artifact_store.url cannot be empty".to_string(),
        ));
    }

    if config.artifact_store.public_url.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "artifact_store.public_url cannot be empty".to_string(),
        ));
    }

    if config.polling.growth_factor <= 1.0 {
        return Err(ConfigError::ValidationError(
            "polling.growth_factor must be greater than 1.0".to_string(),
        ));
    }

    if config.polling.max_delay_secs < config.polling.initial_delay_secs {
        return Err(ConfigError::ValidationError(
            "polling.max_delay_secs must be >= polling.initial_delay_secs".to_string(),
        ));
    }

    if config.queue.retry_delays_secs.is_empty() {
        return Err(ConfigError::ValidationError(
            "queue.retry_delays_secs cannot be empty".to_string(),
        ));
    }

    Ok(())
}
