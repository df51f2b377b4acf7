//! DNS-backed discovery provider.
//!
//! Read-only: registration, heartbeats, and status updates are managed by
//! whoever owns the DNS zone. Resolution goes through the system resolver
//! and results are cached briefly to keep the hot path off the network.

use super::DiscoveryProvider;
use crate::error::DiscoveryError;
use crate::instance::{
    epoch_ms, ServiceEndpoint, ServiceInstance, ServiceRegistration, ServiceStatus,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::net::lookup_host;

const CACHE_TTL: Duration = Duration::from_secs(60);

pub struct DnsDiscoveryProvider {
    domain: String,
    port: u16,
    cache: Mutex<HashMap<String, (Vec<ServiceInstance>, Instant)>>,
}

impl DnsDiscoveryProvider {
    pub fn new(domain: impl Into<String>, port: u16) -> Self {
        Self {
            domain: domain.into(),
            port,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, service: &str) -> Option<Vec<ServiceInstance>> {
        let cache = self.cache.lock().unwrap();
        cache.get(service).and_then(|(instances, fetched)| {
            (fetched.elapsed() < CACHE_TTL).then(|| instances.clone())
        })
    }

    async fn resolve(&self, service: &str) -> Result<Vec<ServiceInstance>, DiscoveryError> {
        let authority = format!("{service}.{}:{}", self.domain, self.port);
        let addrs = lookup_host(&authority)
            .await
            .map_err(|e| DiscoveryError::Dns(format!("{authority}: {e}")))?;

        let now = epoch_ms();
        let instances: Vec<ServiceInstance> = addrs
            .map(|addr| ServiceInstance {
                id: format!("{service}-{}", addr.ip()),
                name: service.to_string(),
                endpoint: ServiceEndpoint::new(addr.ip().to_string(), addr.port()),
                // DNS answers carry no health signal; resolved addresses
                // are assumed serviceable.
                status: ServiceStatus::Healthy,
                version: None,
                metadata: serde_json::Value::Object(Default::default()),
                registered_at_ms: now,
                last_heartbeat_ms: now,
                active_connections: 0,
                response_time_ms: 0.0,
                error_rate: 0.0,
                weight: 1,
            })
            .collect();

        self.cache
            .lock()
            .unwrap()
            .insert(service.to_string(), (instances.clone(), Instant::now()));
        Ok(instances)
    }
}

#[async_trait]
impl DiscoveryProvider for DnsDiscoveryProvider {
    async fn register(
        &self,
        _registration: ServiceRegistration,
    ) -> Result<ServiceInstance, DiscoveryError> {
        Err(DiscoveryError::ReadOnlyProvider)
    }

    async fn deregister(&self, _service: &str, _instance: &str) -> Result<bool, DiscoveryError> {
        Err(DiscoveryError::ReadOnlyProvider)
    }

    async fn instances(&self, service: &str) -> Result<Vec<ServiceInstance>, DiscoveryError> {
        if let Some(cached) = self.cached(service) {
            return Ok(cached);
        }
        self.resolve(service).await
    }

    async fn instance(
        &self,
        service: &str,
        instance: &str,
    ) -> Result<Option<ServiceInstance>, DiscoveryError> {
        Ok(self
            .instances(service)
            .await?
            .into_iter()
            .find(|candidate| candidate.id == instance))
    }

    async fn heartbeat(&self, _service: &str, _instance: &str) -> Result<bool, DiscoveryError> {
        Err(DiscoveryError::ReadOnlyProvider)
    }

    async fn update_status(
        &self,
        _service: &str,
        _instance: &str,
        _status: ServiceStatus,
    ) -> Result<bool, DiscoveryError> {
        Err(DiscoveryError::ReadOnlyProvider)
    }

    async fn update_metrics(
        &self,
        _service: &str,
        _instance: &str,
        _active_connections: Option<u32>,
        _response_time_ms: Option<f64>,
        _error_rate: Option<f64>,
    ) -> Result<bool, DiscoveryError> {
        Err(DiscoveryError::ReadOnlyProvider)
    }

    async fn list_services(&self) -> Result<Vec<String>, DiscoveryError> {
        // The zone cannot be enumerated; report what has been resolved.
        let cache = self.cache.lock().unwrap();
        let mut services: Vec<String> = cache.keys().cloned().collect();
        services.sort();
        Ok(services)
    }

    async fn cleanup_expired(&self) -> Result<u64, DiscoveryError> {
        let mut cache = self.cache.lock().unwrap();
        let before = cache.len();
        cache.retain(|_, (_, fetched)| fetched.elapsed() < CACHE_TTL);
        Ok((before - cache.len()) as u64)
    }
}
