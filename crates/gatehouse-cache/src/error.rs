use gatehouse_core::StoreError;
use thiserror::Error;

/// Errors surfaced by cache operations.
///
/// The tiered read/write paths swallow per-tier store failures (logging
/// them and counting an error metric); this type covers operations with no
/// meaningful degraded mode, like tag invalidation.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cache serialization error: {0}")]
    Serialization(String),
}
