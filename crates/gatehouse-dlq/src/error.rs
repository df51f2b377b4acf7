use gatehouse_core::StoreError;
use thiserror::Error;

/// Errors returned by dead-letter queue operations.
#[derive(Debug, Error)]
pub enum DlqError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// No retry handler is registered for the queue.
    #[error("no retry handler registered for queue {queue}")]
    NoHandler { queue: String },

    /// The referenced message does not exist.
    #[error("message {id} not found in queue {queue}")]
    NotFound { queue: String, id: String },

    /// The message is quarantined and cannot be retried.
    #[error("message {id} in queue {queue} is poison")]
    Poisoned { queue: String, id: String },
}
