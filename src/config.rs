//! Engine tunables, persisted alongside connection profiles.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long an exact COUNT probe may run before it is killed.
    pub probe_timeout_secs: u64,
    /// Estimates below this floor are never trusted; an exact count runs instead.
    pub exact_count_floor: u64,
    /// Upper bound on a single generated statement, in bytes.
    pub max_packet: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: 2,
            exact_count_floor: 10_000,
            max_packet: 1_000_000,
        }
    }
}

impl EngineConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}
