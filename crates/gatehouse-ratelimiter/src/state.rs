use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Persisted per-key state, one variant per algorithm.
///
/// Created lazily on the first check for a key and expired by the store
/// after `2 x window_seconds` of inactivity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum AlgorithmState {
    SlidingWindow {
        /// Timestamps of allowed requests inside the current window.
        timestamps_ms: Vec<u64>,
    },
    TokenBucket {
        tokens: f64,
        last_update_ms: u64,
    },
    LeakyBucket {
        level: f64,
        last_drain_ms: u64,
    },
}

/// Wall-clock milliseconds since the Unix epoch. Distributed state must use
/// wall time, not a process-local monotonic clock.
pub(crate) fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
