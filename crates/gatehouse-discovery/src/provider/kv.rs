//! Store-backed discovery provider.
//!
//! Detail entries live at `discovery:instance:{service}:{id}` with a TTL
//! equal to the registration TTL; the per-service index set lives at
//! `discovery:services:{service}`. Heartbeats rewrite the detail entry,
//! refreshing its TTL; instances that stop heartbeating expire naturally
//! and the cleanup sweep drops their index entries.

use super::DiscoveryProvider;
use crate::error::DiscoveryError;
use crate::instance::{ServiceInstance, ServiceRegistration, ServiceStatus};
use async_trait::async_trait;
use gatehouse_core::{keys, KvStoreExt, SharedStore};
use std::time::Duration;
use uuid::Uuid;

pub struct KvDiscoveryProvider {
    store: SharedStore,
    default_ttl: Duration,
}

impl KvDiscoveryProvider {
    pub fn new(store: SharedStore, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    fn entry_ttl(&self, registration_ttl_seconds: u64) -> Duration {
        if registration_ttl_seconds == 0 {
            self.default_ttl
        } else {
            Duration::from_secs(registration_ttl_seconds)
        }
    }

    async fn save(
        &self,
        instance: &ServiceInstance,
        ttl: Duration,
    ) -> Result<(), DiscoveryError> {
        self.store
            .set_json(
                &keys::discovery_instance(&instance.name, &instance.id),
                instance,
                Some(ttl),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DiscoveryProvider for KvDiscoveryProvider {
    async fn register(
        &self,
        registration: ServiceRegistration,
    ) -> Result<ServiceInstance, DiscoveryError> {
        let ttl = self.entry_ttl(registration.ttl_seconds);
        let id = format!(
            "{}-{}",
            registration.name,
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let mut instance = registration.into_instance(id);
        instance.status = ServiceStatus::Healthy;

        self.save(&instance, ttl).await?;
        let registry_key = keys::discovery_registry(&instance.name);
        self.store.sadd(&registry_key, &instance.id).await?;
        // The index outlives any single entry so a slow sweep cannot lose
        // the whole service.
        self.store.expire(&registry_key, ttl * 2).await?;

        #[cfg(feature = "tracing")]
        tracing::info!(service = %instance.name, instance = %instance.id, "registered service instance");

        Ok(instance)
    }

    async fn deregister(&self, service: &str, instance: &str) -> Result<bool, DiscoveryError> {
        let removed = self
            .store
            .delete(&[keys::discovery_instance(service, instance)])
            .await?;
        self.store
            .srem(&keys::discovery_registry(service), instance)
            .await?;

        #[cfg(feature = "tracing")]
        tracing::info!(service, instance, "deregistered service instance");

        Ok(removed > 0)
    }

    async fn instances(&self, service: &str) -> Result<Vec<ServiceInstance>, DiscoveryError> {
        let ids = self
            .store
            .smembers(&keys::discovery_registry(service))
            .await?;
        let mut instances = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(instance) = self.instance(service, &id).await? {
                instances.push(instance);
            }
        }
        Ok(instances)
    }

    async fn instance(
        &self,
        service: &str,
        instance: &str,
    ) -> Result<Option<ServiceInstance>, DiscoveryError> {
        Ok(self
            .store
            .get_json(&keys::discovery_instance(service, instance))
            .await?)
    }

    async fn heartbeat(&self, service: &str, instance: &str) -> Result<bool, DiscoveryError> {
        let Some(mut found) = self.instance(service, instance).await? else {
            return Ok(false);
        };
        found.touch_heartbeat();
        self.save(&found, self.default_ttl).await?;

        #[cfg(feature = "metrics")]
        metrics::counter!("discovery_heartbeats_total", "service" => service.to_string())
            .increment(1);

        Ok(true)
    }

    async fn update_status(
        &self,
        service: &str,
        instance: &str,
        status: ServiceStatus,
    ) -> Result<bool, DiscoveryError> {
        let Some(mut found) = self.instance(service, instance).await? else {
            return Ok(false);
        };
        found.status = status;
        self.save(&found, self.default_ttl).await?;
        Ok(true)
    }

    async fn update_metrics(
        &self,
        service: &str,
        instance: &str,
        active_connections: Option<u32>,
        response_time_ms: Option<f64>,
        error_rate: Option<f64>,
    ) -> Result<bool, DiscoveryError> {
        let Some(mut found) = self.instance(service, instance).await? else {
            return Ok(false);
        };
        if let Some(connections) = active_connections {
            found.active_connections = connections;
        }
        if let Some(response_time) = response_time_ms {
            found.response_time_ms = response_time;
        }
        if let Some(error_rate) = error_rate {
            found.error_rate = error_rate;
        }
        self.save(&found, self.default_ttl).await?;
        Ok(true)
    }

    async fn list_services(&self) -> Result<Vec<String>, DiscoveryError> {
        let keys = self.store.scan_keys("discovery:services:*").await?;
        let mut services: Vec<String> = keys
            .iter()
            .filter_map(|key| key.split(':').nth(2).map(str::to_string))
            .collect();
        services.sort();
        services.dedup();
        Ok(services)
    }

    async fn cleanup_expired(&self) -> Result<u64, DiscoveryError> {
        let mut removed = 0;
        for service in self.list_services().await? {
            let registry_key = keys::discovery_registry(&service);
            for id in self.store.smembers(&registry_key).await? {
                let exists = self
                    .store
                    .exists(&keys::discovery_instance(&service, &id))
                    .await?;
                if !exists {
                    self.store.srem(&registry_key, &id).await?;
                    removed += 1;

                    #[cfg(feature = "tracing")]
                    tracing::info!(service = %service, instance = %id, "cleaned up expired instance");
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::MemoryStore;
    use std::sync::Arc;

    fn provider() -> KvDiscoveryProvider {
        KvDiscoveryProvider::new(Arc::new(MemoryStore::new()), Duration::from_secs(30))
    }

    #[tokio::test]
    async fn register_and_list() {
        let provider = provider();
        let instance = provider
            .register(ServiceRegistration::new("users", "10.0.0.1", 8080))
            .await
            .unwrap();
        assert!(instance.id.starts_with("users-"));
        assert_eq!(instance.status, ServiceStatus::Healthy);

        let instances = provider.instances("users").await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(provider.list_services().await.unwrap(), vec!["users"]);
    }

    #[tokio::test]
    async fn deregister_removes_everywhere() {
        let provider = provider();
        let instance = provider
            .register(ServiceRegistration::new("users", "10.0.0.1", 8080))
            .await
            .unwrap();
        assert!(provider.deregister("users", &instance.id).await.unwrap());
        assert!(provider.instances("users").await.unwrap().is_empty());
        assert!(!provider.deregister("users", &instance.id).await.unwrap());
    }

    #[tokio::test]
    async fn missed_heartbeats_expire_instances() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        // ttl_seconds 0 falls back to the provider default, which is tiny
        // here so expiry is observable.
        let provider = KvDiscoveryProvider::new(store, Duration::from_millis(30));
        let registration = ServiceRegistration::new("users", "10.0.0.1", 8080).ttl_seconds(0);
        let instance = provider.register(registration).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(provider
            .instance("users", &instance.id)
            .await
            .unwrap()
            .is_none());

        // The sweep reconciles the index set.
        let removed = provider.cleanup_expired().await.unwrap();
        assert_eq!(removed, 1);
        assert!(provider.instances("users").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn heartbeat_refreshes_the_entry() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let provider = KvDiscoveryProvider::new(store, Duration::from_millis(80));
        let registration = ServiceRegistration::new("users", "10.0.0.1", 8080).ttl_seconds(0);
        let instance = provider.register(registration).await.unwrap();

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            assert!(provider.heartbeat("users", &instance.id).await.unwrap());
        }
        // Well past the original TTL, the heartbeats kept it alive.
        assert!(provider
            .instance("users", &instance.id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn status_and_metrics_updates_persist() {
        let provider = provider();
        let instance = provider
            .register(ServiceRegistration::new("users", "10.0.0.1", 8080))
            .await
            .unwrap();

        provider
            .update_status("users", &instance.id, ServiceStatus::Unhealthy)
            .await
            .unwrap();
        provider
            .update_metrics("users", &instance.id, Some(7), Some(12.5), Some(0.1))
            .await
            .unwrap();

        let stored = provider
            .instance("users", &instance.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ServiceStatus::Unhealthy);
        assert_eq!(stored.active_connections, 7);
        assert!((stored.response_time_ms - 12.5).abs() < f64::EPSILON);
    }
}
