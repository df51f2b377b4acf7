use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`crate::CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum CircuitBreakerError<T, E> {
    /// The circuit is open; the call was not attempted.
    #[error("circuit {name} is open; retry after {retry_after:?}")]
    Open {
        name: String,
        retry_after: Duration,
        /// Value produced by the configured fallback, when present.
        fallback: Option<T>,
    },

    /// Queued plus in-flight work exceeded the backpressure threshold.
    #[error("circuit {name} tripped by backpressure")]
    Backpressure { name: String, fallback: Option<T> },

    /// The inner call failed and no fallback was configured.
    #[error("inner call error: {0}")]
    Inner(E),
}

impl<T, E> CircuitBreakerError<T, E> {
    /// Whether the call was rejected without reaching the upstream.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, CircuitBreakerError::Inner(_))
    }

    /// Seconds the caller should wait before retrying, when known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CircuitBreakerError::Open { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Consume the error, yielding the fallback value if one was computed.
    pub fn into_fallback(self) -> Option<T> {
        match self {
            CircuitBreakerError::Open { fallback, .. }
            | CircuitBreakerError::Backpressure { fallback, .. } => fallback,
            CircuitBreakerError::Inner(_) => None,
        }
    }

    /// The inner error, if the upstream was actually called.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitBreakerError::Inner(err) => Some(err),
            _ => None,
        }
    }
}
