//! Discovery providers.

pub mod dns;
pub mod kv;

use crate::error::DiscoveryError;
use crate::instance::{ServiceInstance, ServiceRegistration, ServiceStatus};
use async_trait::async_trait;

/// Backing registry for service instances.
///
/// The KV provider supports the full read/write surface; the DNS provider
/// is read-only and returns [`DiscoveryError::ReadOnlyProvider`] from the
/// mutating operations.
#[async_trait]
pub trait DiscoveryProvider: Send + Sync {
    /// Register an instance, returning it with its assigned id.
    async fn register(
        &self,
        registration: ServiceRegistration,
    ) -> Result<ServiceInstance, DiscoveryError>;

    /// Remove an instance. Returns whether it existed.
    async fn deregister(&self, service: &str, instance: &str) -> Result<bool, DiscoveryError>;

    /// All live instances of a service.
    async fn instances(&self, service: &str) -> Result<Vec<ServiceInstance>, DiscoveryError>;

    /// One instance, if live.
    async fn instance(
        &self,
        service: &str,
        instance: &str,
    ) -> Result<Option<ServiceInstance>, DiscoveryError>;

    /// Refresh an instance's TTL. Returns whether it existed.
    async fn heartbeat(&self, service: &str, instance: &str) -> Result<bool, DiscoveryError>;

    /// Update an instance's status.
    async fn update_status(
        &self,
        service: &str,
        instance: &str,
        status: ServiceStatus,
    ) -> Result<bool, DiscoveryError>;

    /// Update the load metrics the balancer feeds on.
    async fn update_metrics(
        &self,
        service: &str,
        instance: &str,
        active_connections: Option<u32>,
        response_time_ms: Option<f64>,
        error_rate: Option<f64>,
    ) -> Result<bool, DiscoveryError>;

    /// Names of all registered services.
    async fn list_services(&self) -> Result<Vec<String>, DiscoveryError>;

    /// Reconcile the index against surviving detail entries. Returns how
    /// many stale index entries were dropped.
    async fn cleanup_expired(&self) -> Result<u64, DiscoveryError>;
}
