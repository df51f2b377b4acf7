use gatehouse_core::StoreError;
use thiserror::Error;

/// Errors returned by rate limiter administration.
///
/// The check path itself never surfaces store errors: it fails open.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// The shared store rejected an administrative operation.
    #[error(transparent)]
    Store(#[from] StoreError),
}
