//! Gatehouse: the request-control runtime.
//!
//! One umbrella over the per-concern crates. Every API and GraphQL request
//! of the host platform traverses the [`pipeline::Coordinator`]: a health
//! gate, the rate limiter, service discovery, and a circuit breaker, with
//! failed work captured into the dead-letter queue. All distributed state
//! flows through the shared store in [`core`].
//!
//! Wire everything explicitly at startup:
//!
//! ```no_run
//! use std::sync::Arc;
//! use gatehouse::prelude::*;
//!
//! # async fn wire() {
//! let store: SharedStore = Arc::new(MemoryStore::new());
//!
//! let health = Arc::new(HealthMonitor::new(
//!     Arc::clone(&store),
//!     "gateway",
//!     HealthConfig::builder().build(),
//! ));
//! let limiter = Arc::new(RateLimiter::new(
//!     Arc::clone(&store),
//!     RateLimitConfig::builder().build(),
//! ));
//! let discovery = Arc::new(ServiceDiscovery::new(
//!     Arc::clone(&store),
//!     DiscoveryConfig::builder().build(),
//! ));
//! let dlq = Arc::new(DeadLetterQueue::new(
//!     Arc::clone(&store),
//!     RetryConfig::builder().build(),
//! ));
//!
//! let coordinator = Coordinator::builder()
//!     .health(health)
//!     .rate_limiter(limiter)
//!     .discovery(discovery)
//!     .dlq(dlq)
//!     .circuit_store(store)
//!     .build();
//! # let _ = coordinator;
//! # }
//! ```

pub use gatehouse_cache as cache;
pub use gatehouse_circuitbreaker as circuitbreaker;
pub use gatehouse_core as core;
pub use gatehouse_discovery as discovery;
pub use gatehouse_dlq as dlq;
pub use gatehouse_healthcheck as healthcheck;
pub use gatehouse_pipeline as pipeline;
pub use gatehouse_ratelimiter as ratelimiter;

/// The names most integrations need.
pub mod prelude {
    pub use gatehouse_cache::{CacheConfig, TieredCache};
    pub use gatehouse_circuitbreaker::{CircuitBreaker, CircuitConfig, CircuitState};
    pub use gatehouse_core::{KvStore, MemoryStore, RedisStore, SharedStore};
    pub use gatehouse_discovery::{
        DiscoveryConfig, ServiceDiscovery, ServiceRegistration,
    };
    pub use gatehouse_dlq::{DeadLetterQueue, RetryConfig, RetryHandler};
    pub use gatehouse_healthcheck::{HealthCheck, HealthConfig, HealthMonitor, HealthStatus};
    pub use gatehouse_pipeline::{
        Coordinator, Middleware, RequestEnvelope, RequestHandler, ResponseEnvelope,
    };
    pub use gatehouse_ratelimiter::{RateLimitConfig, RateLimiter};
}
