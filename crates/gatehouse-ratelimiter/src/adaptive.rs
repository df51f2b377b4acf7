//! Load-adaptive limit adjustment.
//!
//! The controller keeps a short load history and scales the configured
//! limit inversely with smoothed load: high load tightens the budget, idle
//! capacity loosens it, always clamped to `[min_requests, max_requests]`.

use crate::config::RateLimitConfig;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const HISTORY_CAPACITY: usize = 100;
const SMOOTHING_SAMPLES: usize = 5;

/// Source of the load factor sampled on every adaptive check.
///
/// The factor is centered on 1.0 (nominal); values above 1.0 mean the
/// system is under pressure, below 1.0 that it has headroom. Sampling is
/// synchronous and must be cheap; it runs on the request path.
pub trait LoadSampler: Send + Sync {
    fn sample(&self) -> f64;
}

impl<F> LoadSampler for F
where
    F: Fn() -> f64 + Send + Sync,
{
    fn sample(&self) -> f64 {
        self()
    }
}

/// Default load source: the limiter's own recent denial rate.
///
/// `load = 1 + denied/total`, so a limiter denying half its traffic reads
/// as load 1.5. This is the declared `load_source` for the crate; callers
/// with a better signal (CPU, queue depth) plug in their own sampler.
pub struct DenialRateSampler {
    pub(crate) stats: Arc<Mutex<crate::limiter::StatsInner>>,
}

impl LoadSampler for DenialRateSampler {
    fn sample(&self) -> f64 {
        let stats = self.stats.lock().unwrap();
        if stats.total == 0 {
            return 1.0;
        }
        1.0 + stats.denied as f64 / stats.total as f64
    }
}

/// Adjusts limits based on observed load.
pub struct AdaptiveController {
    load_history: VecDeque<f64>,
}

impl AdaptiveController {
    pub fn new() -> Self {
        Self {
            load_history: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Record a load sample and return the adjusted limit.
    pub fn record_and_adjust(&mut self, config: &RateLimitConfig, load_factor: f64) -> u64 {
        if self.load_history.len() == HISTORY_CAPACITY {
            self.load_history.pop_front();
        }
        self.load_history.push_back(load_factor);

        let adjustment = self.adjustment(load_factor, config.scale_factor);
        let adjusted = (config.requests_per_window as f64 * adjustment) as u64;
        let adjusted = adjusted.clamp(config.min_requests, config.max_requests);

        #[cfg(feature = "metrics")]
        {
            metrics::gauge!("ratelimit_adaptive_adjustment_factor").set(adjustment);
            metrics::gauge!("ratelimit_adaptive_limit").set(adjusted as f64);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            load = load_factor,
            adjustment,
            limit = adjusted,
            "adaptive rate limit adjusted"
        );

        adjusted
    }

    /// Inverse-load adjustment, blended 0.7/0.3 with the recent average and
    /// clamped to `[0.1, 2.0]`.
    fn adjustment(&self, load_factor: f64, scale_factor: f64) -> f64 {
        let base = 2.0 - load_factor;

        let adjustment = if self.load_history.len() > SMOOTHING_SAMPLES {
            let recent: f64 = self
                .load_history
                .iter()
                .rev()
                .take(SMOOTHING_SAMPLES)
                .sum::<f64>()
                / SMOOTHING_SAMPLES as f64;
            let smoothed = 2.0 - recent;
            0.7 * base + 0.3 * smoothed
        } else {
            base
        };

        let adjustment = 1.0 + (adjustment - 1.0) * scale_factor;
        adjustment.clamp(0.1, 2.0)
    }

    pub fn reset(&mut self) {
        self.load_history.clear();
    }
}

impl Default for AdaptiveController {
    fn default() -> Self {
        Self::new()
    }
}
