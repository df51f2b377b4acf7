//! Pure state transitions for the rate-limit algorithms.
//!
//! Each function maps `(previous state, now)` to a decision plus the state
//! to persist. Denied checks return no new state so a denial never writes.
//! Keeping these free of I/O makes the contracts directly testable with
//! synthetic clocks.

use crate::config::{RateLimitAlgorithm, RateLimitConfig};
use crate::state::AlgorithmState;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Check {
    pub allowed: bool,
    pub remaining: u64,
    pub reset_at_ms: u64,
    pub retry_after_secs: Option<u64>,
}

/// Evaluate one request against the configured algorithm.
pub(crate) fn evaluate(
    config: &RateLimitConfig,
    limit: u64,
    state: Option<AlgorithmState>,
    now_ms: u64,
) -> (Check, Option<AlgorithmState>) {
    match config.algorithm {
        RateLimitAlgorithm::SlidingWindow | RateLimitAlgorithm::Adaptive => {
            sliding_window(config, limit, state, now_ms)
        }
        RateLimitAlgorithm::TokenBucket => token_bucket(config, state, now_ms),
        RateLimitAlgorithm::LeakyBucket => leaky_bucket(config, state, now_ms),
    }
}

fn sliding_window(
    config: &RateLimitConfig,
    limit: u64,
    state: Option<AlgorithmState>,
    now_ms: u64,
) -> (Check, Option<AlgorithmState>) {
    let window_ms = config.window_seconds * 1000;

    let mut timestamps = match state {
        Some(AlgorithmState::SlidingWindow { timestamps_ms }) => timestamps_ms,
        _ => Vec::new(),
    };
    // Keep entries strictly inside (now - window, now]; subtraction-free so
    // small relative clocks cannot underflow the lower bound.
    timestamps.retain(|ts| *ts + window_ms > now_ms);

    let count = timestamps.len() as u64;
    let oldest = timestamps.iter().copied().min();

    if count < limit {
        timestamps.push(now_ms);
        let reset_at_ms = timestamps
            .iter()
            .copied()
            .min()
            .map(|oldest| oldest + window_ms)
            .unwrap_or(now_ms + window_ms);
        (
            Check {
                allowed: true,
                remaining: limit - count - 1,
                reset_at_ms,
                retry_after_secs: None,
            },
            Some(AlgorithmState::SlidingWindow {
                timestamps_ms: timestamps,
            }),
        )
    } else {
        let reset_at_ms = oldest
            .map(|oldest| oldest + window_ms)
            .unwrap_or(now_ms + window_ms);
        let retry_after_secs = ceil_secs(reset_at_ms.saturating_sub(now_ms)).max(1);
        (
            Check {
                allowed: false,
                remaining: 0,
                reset_at_ms,
                retry_after_secs: Some(retry_after_secs),
            },
            None,
        )
    }
}

fn token_bucket(
    config: &RateLimitConfig,
    state: Option<AlgorithmState>,
    now_ms: u64,
) -> (Check, Option<AlgorithmState>) {
    let burst = config.burst() as f64;
    let rate = config.rate_per_second();

    let (tokens, last_update_ms) = match state {
        Some(AlgorithmState::TokenBucket {
            tokens,
            last_update_ms,
        }) => (tokens, last_update_ms),
        _ => (burst, now_ms),
    };

    let elapsed = now_ms.saturating_sub(last_update_ms) as f64 / 1000.0;
    let tokens = (tokens + elapsed * rate).min(burst);

    if tokens >= 1.0 {
        let tokens = tokens - 1.0;
        (
            Check {
                allowed: true,
                remaining: tokens as u64,
                reset_at_ms: now_ms,
                retry_after_secs: None,
            },
            Some(AlgorithmState::TokenBucket {
                tokens,
                last_update_ms: now_ms,
            }),
        )
    } else {
        let wait_secs = (1.0 - tokens) / rate;
        let retry_after_secs = (wait_secs.ceil() as u64).max(1);
        (
            Check {
                allowed: false,
                remaining: 0,
                reset_at_ms: now_ms + (wait_secs * 1000.0).ceil() as u64,
                retry_after_secs: Some(retry_after_secs),
            },
            None,
        )
    }
}

fn leaky_bucket(
    config: &RateLimitConfig,
    state: Option<AlgorithmState>,
    now_ms: u64,
) -> (Check, Option<AlgorithmState>) {
    let capacity = config.burst() as f64;
    let rate = config.rate_per_second();

    let (level, last_drain_ms) = match state {
        Some(AlgorithmState::LeakyBucket {
            level,
            last_drain_ms,
        }) => (level, last_drain_ms),
        _ => (0.0, now_ms),
    };

    let elapsed = now_ms.saturating_sub(last_drain_ms) as f64 / 1000.0;
    let level = (level - elapsed * rate).max(0.0);

    if level < capacity {
        let level = level + 1.0;
        (
            Check {
                allowed: true,
                remaining: (capacity - level).max(0.0) as u64,
                reset_at_ms: now_ms,
                retry_after_secs: None,
            },
            Some(AlgorithmState::LeakyBucket {
                level,
                last_drain_ms: now_ms,
            }),
        )
    } else {
        // Seconds until the bucket drains enough to admit one unit.
        let wait_secs = (level - capacity + 1.0) / rate;
        let retry_after_secs = (wait_secs.ceil() as u64).max(1);
        (
            Check {
                allowed: false,
                remaining: 0,
                reset_at_ms: now_ms + (wait_secs * 1000.0).ceil() as u64,
                retry_after_secs: Some(retry_after_secs),
            },
            None,
        )
    }
}

fn ceil_secs(ms: u64) -> u64 {
    ms.div_ceil(1000)
}
