use gatehouse_core::StoreError;
use thiserror::Error;

/// Errors returned by the health subsystem.
#[derive(Debug, Error)]
pub enum HealthError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Adding the edge would make the dependency graph cyclic.
    #[error("dependency cycle: {component} -> {dependency}")]
    CycleDetected {
        component: String,
        dependency: String,
    },
}
