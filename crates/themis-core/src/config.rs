//! Runtime configuration for the durability layer.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the bus persistence coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurabilityConfig {
    /// Maximum number of events the in-memory fallback buffer retains
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Seconds a buffered event is retained before TTL expiry
    #[serde(default = "default_memory_ttl_secs")]
    pub memory_ttl_secs: u64,
    /// Seconds between drain-loop health probes
    #[serde(default = "default_drain_interval_secs")]
    pub drain_interval_secs: u64,
}

fn default_queue_capacity() -> usize {
    1000
}

// One day
fn default_memory_ttl_secs() -> u64 {
    86_400
}

fn default_drain_interval_secs() -> u64 {
    5
}

impl Default for DurabilityConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            memory_ttl_secs: default_memory_ttl_secs(),
            drain_interval_secs: default_drain_interval_secs(),
        }
    }
}

impl DurabilityConfig {
    /// How long a buffered event survives without backend recovery.
    #[must_use]
    pub fn memory_ttl(&self) -> Duration {
        Duration::from_secs(self.memory_ttl_secs)
    }

    /// Interval between drain-loop iterations.
    #[must_use]
    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }
}
