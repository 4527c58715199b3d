//! Queue configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the durable queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How often each consumer polls for due messages (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// How long a claimed message stays invisible to other consumers
    /// (seconds). A consumer that dies mid-processing loses its claim after
    /// this timeout and the message becomes re-deliverable.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,

    /// Escalating delays applied between handler retries (seconds). Once
    /// the sequence is exhausted the message is dead-lettered for operator
    /// inspection.
    #[serde(default = "default_retry_delays")]
    pub retry_delays_secs: Vec<u64>,
}

fn default_poll_interval() -> u64 {
    500
}

fn default_visibility_timeout() -> u64 {
    30
}

fn default_retry_delays() -> Vec<u64> {
    // 1s, 1m, 5m, 10m, 30m, 1h, 2h, 4h
    vec![1, 60, 300, 600, 1800, 3600, 7200, 14400]
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            visibility_timeout_secs: default_visibility_timeout(),
            retry_delays_secs: default_retry_delays(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.visibility_timeout_secs, 30);
        assert_eq!(config.retry_delays_secs.len(), 8);
        assert_eq!(config.retry_delays_secs[0], 1);
        assert_eq!(*config.retry_delays_secs.last().unwrap(), 14400);
    }

    #[test]
    fn test_retry_delays_escalate() {
        let delays = QueueConfig::default().retry_delays_secs;
        for pair in delays.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_deserialize_minimal() {
        let config: QueueConfig = toml::from_str("").unwrap();
        assert_eq!(config.poll_interval_ms, 500);
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
            poll_interval_ms = 100
            visibility_timeout_secs = 5
            retry_delays_secs = [1, 2, 3]
        "#;
        let config: QueueConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.visibility_timeout_secs, 5);
        assert_eq!(config.retry_delays_secs, vec![1, 2, 3]);
    }
}
