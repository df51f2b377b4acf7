//! Three-tier read-through / write-through cache.
//!
//! Tier 1 is a bounded in-process TTL-LRU map, tier 2 the shared
//! distributed store, tier 3 an optional durable store. Reads walk down
//! the tiers and repopulate the ones above; writes fan out to every
//! enabled tier with its own TTL, and a failure in one tier never aborts
//! the others.
//!
//! Values serialize under the configured format (JSON or MessagePack)
//! and gzip-compress above a size threshold when compression actually
//! pays for itself.

mod codec;
mod config;
mod error;
mod local;
mod tiered;

pub use config::{CacheConfig, CacheConfigBuilder, SerializationFormat};
pub use error::CacheError;
pub use local::LocalCache;
pub use tiered::{CacheStats, TierStats, TieredCache};
