//! Store-backed rate limiting.
//!
//! Decides, for a request key, whether to allow one unit of work now. Keys
//! are scoped (`global`, `user`, `ip`, `endpoint`, `combined`) and state
//! lives in the shared key-value store so every process sees the same
//! budget. Four algorithms are available: sliding window, token bucket,
//! leaky bucket, and an adaptive wrapper that scales the limit with
//! observed load.
//!
//! Per-key state updates go through the store's atomic read-modify-write,
//! so concurrent checks across processes cannot double-spend a budget.
//! Store failures fail **open**: the request is allowed and a metric is
//! recorded.
//!
//! ```no_run
//! use std::sync::Arc;
//! use gatehouse_core::MemoryStore;
//! use gatehouse_ratelimiter::{RateLimitConfig, RateLimiter};
//!
//! # async fn example() {
//! let config = RateLimitConfig::builder()
//!     .requests_per_window(100)
//!     .window_seconds(60)
//!     .build();
//! let limiter = RateLimiter::new(Arc::new(MemoryStore::new()), config);
//! let decision = limiter.check(Some("user-1"), Some("10.0.0.1"), Some("/api")).await;
//! assert!(decision.allowed);
//! # }
//! ```

mod adaptive;
mod algorithms;
mod config;
mod error;
mod events;
mod key;
mod limiter;
mod state;

pub use adaptive::{AdaptiveController, DenialRateSampler, LoadSampler};
pub use config::{RateLimitAlgorithm, RateLimitConfig, RateLimitConfigBuilder, RateLimitScope};
pub use error::RateLimitError;
pub use events::RateLimitEvent;
pub use key::RateLimitKey;
pub use limiter::{RateLimitDecision, RateLimiter, RateLimiterStats};
pub use state::AlgorithmState;
