//! Status polling configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the status polling loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Delay before the first poll after episode creation (seconds).
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: f64,

    /// Multiplier applied to the delay on every requeue.
    #[serde(default = "default_growth_factor")]
    pub growth_factor: f64,

    /// Upper bound on the poll delay (seconds).
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: f64,

    /// How many times episodes whose remote job never reports a status are
    /// requeued before being abandoned with a warning.
    #[serde(default = "default_max_requeue_count")]
    pub max_requeue_count: u32,
}

fn default_initial_delay() -> f64 {
    10.0
}

fn default_growth_factor() -> f64 {
    1.1
}

fn default_max_delay() -> f64 {
    3600.0 // 60 minutes
}

fn default_max_requeue_count() -> u32 {
    60
}

impl PollingConfig {
    /// Next backoff delay: current delay grown by the factor, capped.
    pub fn next_delay(&self, current_secs: f64) -> f64 {
        (current_secs * self.growth_factor).min(self.max_delay_secs)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay(),
            growth_factor: default_growth_factor(),
            max_delay_secs: default_max_delay(),
            max_requeue_count: default_max_requeue_count(),
        }
    }
}
