use crate::balancer::LoadBalancer;
use crate::config::{DiscoveryConfig, ProviderType};
use crate::error::DiscoveryError;
use crate::events::DiscoveryEvent;
use crate::instance::{ServiceInstance, ServiceRegistration, ServiceStatus};
use crate::provider::dns::DnsDiscoveryProvider;
use crate::provider::kv::KvDiscoveryProvider;
use crate::provider::DiscoveryProvider;
use gatehouse_core::{EventListener, EventListeners, SharedStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Rollup of registry state.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryStats {
    pub total_services: usize,
    pub total_instances: usize,
    pub healthy_instances: usize,
    pub per_service: HashMap<String, (usize, usize)>,
    pub active_sessions: usize,
}

/// Facade over the registry, balancer, and expiry sweep.
pub struct ServiceDiscovery {
    config: DiscoveryConfig,
    provider: Arc<dyn DiscoveryProvider>,
    balancer: LoadBalancer,
    events: EventListeners<DiscoveryEvent>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ServiceDiscovery {
    /// Build with the provider selected by the configuration.
    pub fn new(store: SharedStore, config: DiscoveryConfig) -> Self {
        let provider: Arc<dyn DiscoveryProvider> = match config.provider_type {
            ProviderType::Kv => Arc::new(KvDiscoveryProvider::new(
                store,
                config.registration_ttl,
            )),
            ProviderType::Dns => Arc::new(DnsDiscoveryProvider::new(
                config.dns_domain.clone(),
                config.dns_port,
            )),
        };
        Self::with_provider(provider, config)
    }

    /// Build around an externally-constructed provider.
    pub fn with_provider(provider: Arc<dyn DiscoveryProvider>, config: DiscoveryConfig) -> Self {
        let balancer = LoadBalancer::new(
            config.default_strategy,
            config.sticky_sessions,
            config.session_timeout,
        );
        Self {
            config,
            provider,
            balancer,
            events: EventListeners::new(),
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Register an event listener. Call before `start`.
    pub fn add_listener<L>(&mut self, listener: L)
    where
        L: EventListener<DiscoveryEvent> + 'static,
    {
        self.events.add(listener);
    }

    pub fn provider(&self) -> &Arc<dyn DiscoveryProvider> {
        &self.provider
    }

    /// Register one instance.
    pub async fn register(
        &self,
        registration: ServiceRegistration,
    ) -> Result<ServiceInstance, DiscoveryError> {
        let instance = self.provider.register(registration).await?;

        #[cfg(feature = "metrics")]
        metrics::counter!("discovery_registrations_total", "service" => instance.name.clone())
            .increment(1);

        self.events.emit(&DiscoveryEvent::InstanceRegistered {
            service: instance.name.clone(),
            instance: instance.id.clone(),
            timestamp: Instant::now(),
        });
        Ok(instance)
    }

    /// Remove one instance.
    pub async fn deregister(&self, service: &str, instance: &str) -> Result<bool, DiscoveryError> {
        let removed = self.provider.deregister(service, instance).await?;
        if removed {
            #[cfg(feature = "metrics")]
            metrics::counter!("discovery_deregistrations_total", "service" => service.to_string())
                .increment(1);

            self.events.emit(&DiscoveryEvent::InstanceDeregistered {
                service: service.to_string(),
                instance: instance.to_string(),
                timestamp: Instant::now(),
            });
        }
        Ok(removed)
    }

    /// Select an instance for `endpoint`, treating its first path segment
    /// as the service name.
    pub async fn discover(
        &self,
        endpoint: &str,
        session_id: Option<&str>,
        client_ip: Option<&str>,
    ) -> Result<ServiceInstance, DiscoveryError> {
        let service = Self::service_name(endpoint);
        let instances = self.provider.instances(&service).await?;
        let selected = self
            .balancer
            .select(&instances, session_id, client_ip)
            .ok_or_else(|| DiscoveryError::Unavailable {
                service: service.clone(),
            })?;

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "discovery_selections_total",
            "service" => service,
            "strategy" => self.balancer.strategy().as_str()
        )
        .increment(1);

        Ok(selected)
    }

    /// Refresh an instance's TTL.
    pub async fn heartbeat(&self, service: &str, instance: &str) -> Result<bool, DiscoveryError> {
        self.provider.heartbeat(service, instance).await
    }

    /// Update an instance's status, emitting a status event.
    pub async fn update_status(
        &self,
        service: &str,
        instance: &str,
        status: ServiceStatus,
    ) -> Result<bool, DiscoveryError> {
        let updated = self.provider.update_status(service, instance, status).await?;
        if updated {
            self.events.emit(&DiscoveryEvent::StatusChanged {
                service: service.to_string(),
                instance: instance.to_string(),
                status,
                timestamp: Instant::now(),
            });
        }
        Ok(updated)
    }

    /// All instances of a service.
    pub async fn instances(&self, service: &str) -> Result<Vec<ServiceInstance>, DiscoveryError> {
        self.provider.instances(service).await
    }

    /// Run one expiry sweep.
    pub async fn run_cleanup(&self) -> Result<u64, DiscoveryError> {
        let removed = self.provider.cleanup_expired().await?;

        #[cfg(feature = "metrics")]
        if removed > 0 {
            metrics::counter!("discovery_expired_cleaned_total").increment(removed);
        }

        Ok(removed)
    }

    /// Start the periodic expiry sweep.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let discovery = Arc::clone(self);
        *self.task.lock().unwrap() = Some(tokio::spawn(async move {
            while discovery.running.load(Ordering::SeqCst) {
                tokio::time::sleep(discovery.config.cleanup_interval).await;
                if let Err(_err) = discovery.run_cleanup().await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %_err, "discovery cleanup sweep failed");
                }
            }
        }));
    }

    /// Stop the periodic expiry sweep.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }

    /// Registry rollup.
    pub async fn stats(&self) -> Result<DiscoveryStats, DiscoveryError> {
        let mut per_service = HashMap::new();
        let mut total_instances = 0;
        let mut healthy_instances = 0;

        for service in self.provider.list_services().await? {
            let instances = self.provider.instances(&service).await?;
            let healthy = instances.iter().filter(|i| i.is_healthy()).count();
            total_instances += instances.len();
            healthy_instances += healthy;
            per_service.insert(service, (instances.len(), healthy));
        }

        Ok(DiscoveryStats {
            total_services: per_service.len(),
            total_instances,
            healthy_instances,
            per_service,
            active_sessions: self.balancer.active_sessions(),
        })
    }

    /// `/users/123` selects service `users`.
    fn service_name(endpoint: &str) -> String {
        endpoint
            .trim_matches('/')
            .split('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .unwrap_or("default")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::MemoryStore;

    fn discovery() -> ServiceDiscovery {
        ServiceDiscovery::new(
            Arc::new(MemoryStore::new()),
            DiscoveryConfig::builder().build(),
        )
    }

    #[tokio::test]
    async fn discover_routes_by_first_path_segment() {
        let discovery = discovery();
        discovery
            .register(ServiceRegistration::new("users", "10.0.0.1", 8080))
            .await
            .unwrap();

        let instance = discovery.discover("/users/42", None, None).await.unwrap();
        assert_eq!(instance.name, "users");

        let missing = discovery.discover("/orders/7", None, None).await;
        assert!(matches!(
            missing,
            Err(DiscoveryError::Unavailable { service }) if service == "orders"
        ));
    }

    #[tokio::test]
    async fn unhealthy_only_services_are_unavailable() {
        let discovery = discovery();
        let instance = discovery
            .register(ServiceRegistration::new("users", "10.0.0.1", 8080))
            .await
            .unwrap();
        discovery
            .update_status("users", &instance.id, ServiceStatus::Unhealthy)
            .await
            .unwrap();

        let result = discovery.discover("/users/42", None, None).await;
        assert!(matches!(result, Err(DiscoveryError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn stats_roll_up_instances() {
        let discovery = discovery();
        discovery
            .register(ServiceRegistration::new("users", "10.0.0.1", 8080))
            .await
            .unwrap();
        let down = discovery
            .register(ServiceRegistration::new("users", "10.0.0.2", 8080))
            .await
            .unwrap();
        discovery
            .update_status("users", &down.id, ServiceStatus::Unhealthy)
            .await
            .unwrap();

        let stats = discovery.stats().await.unwrap();
        assert_eq!(stats.total_services, 1);
        assert_eq!(stats.total_instances, 2);
        assert_eq!(stats.healthy_instances, 1);
        assert_eq!(stats.per_service["users"], (2, 1));
    }

    #[test]
    fn service_name_extraction() {
        assert_eq!(ServiceDiscovery::service_name("/users/42"), "users");
        assert_eq!(ServiceDiscovery::service_name("users"), "users");
        assert_eq!(ServiceDiscovery::service_name("/"), "default");
        assert_eq!(ServiceDiscovery::service_name(""), "default");
    }
}
