//! Three-state circuit breaker for outbound calls.
//!
//! A named circuit gates an upstream call site. Consecutive failures, a
//! high error rate over the recent window, or a high average response time
//! trip the circuit open; after a timeout it admits limited probe traffic
//! (half-open) and closes again once enough consecutive successes land.
//!
//! Extras beyond the basic machine:
//! - **Backpressure**: an optional inflight+queue ceiling that trips the
//!   circuit before the upstream melts down.
//! - **Gradual recovery**: half-open admission starts at a configured
//!   fraction of traffic and ramps to 100% as successes accumulate.
//! - **Distributed state**: circuit state and metrics can be mirrored into
//!   the shared store so sibling processes agree on open/closed.
//!
//! ```no_run
//! use gatehouse_circuitbreaker::{CircuitBreaker, CircuitConfig};
//!
//! # async fn example() {
//! let breaker: CircuitBreaker<String, std::io::Error> = CircuitBreaker::new(
//!     CircuitConfig::builder().name("upstream-api").build(),
//! );
//! let result = breaker.call(|| async { Ok("response".to_string()) }).await;
//! # let _ = result;
//! # }
//! ```

mod backpressure;
mod breaker;
mod circuit;
mod config;
mod error;
mod events;

pub use backpressure::{BackpressureHandler, BackpressureLoad};
pub use breaker::{CircuitBreaker, CircuitBreakerGroup, CircuitStats};
pub use circuit::{CircuitMetrics, CircuitState, TripReason};
pub use config::{CircuitConfig, CircuitConfigBuilder};
pub use error::CircuitBreakerError;
pub use events::CircuitBreakerEvent;
