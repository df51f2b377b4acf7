use gatehouse_core::StoreError;
use thiserror::Error;

/// Errors returned by discovery operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// No healthy instance is available for the service.
    #[error("no healthy instance available for service {service}")]
    Unavailable { service: String },

    /// The referenced instance does not exist.
    #[error("instance {instance} of service {service} not found")]
    NotFound { service: String, instance: String },

    /// The provider cannot perform writes (DNS-backed discovery).
    #[error("provider is read-only; registration is managed externally")]
    ReadOnlyProvider,

    /// Name resolution failed.
    #[error("dns resolution failed: {0}")]
    Dns(String),
}
