//! Active instance health checking.
//!
//! An out-of-band loop probes every registered instance at the configured
//! interval. `unhealthy_threshold` consecutive probe failures flip an
//! instance to unhealthy; `healthy_threshold` consecutive successes flip
//! it back. Flips propagate to the provider so selection sees them.

use crate::config::DiscoveryConfig;
use crate::instance::{ServiceInstance, ServiceStatus};
use crate::provider::DiscoveryProvider;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;

/// Probe one instance; `true` means serviceable.
#[async_trait]
pub trait InstanceProbe: Send + Sync {
    async fn probe(&self, instance: &ServiceInstance) -> bool;
}

/// Default probe: a TCP connect to the instance's authority.
pub struct TcpConnectProbe;

#[async_trait]
impl InstanceProbe for TcpConnectProbe {
    async fn probe(&self, instance: &ServiceInstance) -> bool {
        TcpStream::connect(instance.endpoint.authority()).await.is_ok()
    }
}

#[derive(Default, Clone, Copy)]
struct ProbeStreak {
    failures: u32,
    successes: u32,
}

/// Periodically probes registered instances and flips their status.
pub struct InstanceHealthMonitor {
    provider: Arc<dyn DiscoveryProvider>,
    probe: Arc<dyn InstanceProbe>,
    config: DiscoveryConfig,
    streaks: Mutex<HashMap<String, ProbeStreak>>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl InstanceHealthMonitor {
    pub fn new(
        provider: Arc<dyn DiscoveryProvider>,
        probe: Arc<dyn InstanceProbe>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            provider,
            probe,
            config,
            streaks: Mutex::new(HashMap::new()),
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Run one probe pass over every instance of every service.
    pub async fn run_once(&self) {
        let services = match self.provider.list_services().await {
            Ok(services) => services,
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_err, "health monitor could not list services");
                return;
            }
        };

        for service in services {
            let instances = match self.provider.instances(&service).await {
                Ok(instances) => instances,
                Err(_) => continue,
            };
            for instance in instances {
                self.probe_instance(&instance).await;
            }
        }
    }

    async fn probe_instance(&self, instance: &ServiceInstance) {
        let healthy = tokio::time::timeout(
            self.config.health_check_timeout,
            self.probe.probe(instance),
        )
        .await
        .unwrap_or(false);

        let flip = {
            let mut streaks = self.streaks.lock().unwrap();
            let streak = streaks.entry(instance.id.clone()).or_default();
            if healthy {
                streak.successes += 1;
                streak.failures = 0;
                (!instance.is_healthy() && streak.successes >= self.config.healthy_threshold)
                    .then_some(ServiceStatus::Healthy)
            } else {
                streak.failures += 1;
                streak.successes = 0;
                (instance.is_healthy() && streak.failures >= self.config.unhealthy_threshold)
                    .then_some(ServiceStatus::Unhealthy)
            }
        };

        if let Some(status) = flip {
            #[cfg(feature = "tracing")]
            tracing::info!(
                service = %instance.name,
                instance = %instance.id,
                status = status.as_str(),
                "instance health flipped"
            );

            #[cfg(feature = "metrics")]
            metrics::counter!(
                "discovery_health_flips_total",
                "service" => instance.name.clone(),
                "status" => status.as_str()
            )
            .increment(1);

            let _ = self
                .provider
                .update_status(&instance.name, &instance.id, status)
                .await;
        }
    }

    /// Start the background probe loop.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let monitor = Arc::clone(self);
        *self.task.lock().unwrap() = Some(tokio::spawn(async move {
            while monitor.running.load(Ordering::SeqCst) {
                monitor.run_once().await;
                tokio::time::sleep(monitor.config.health_check_interval).await;
            }
        }));
    }

    /// Stop the background probe loop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryConfig;
    use crate::instance::ServiceRegistration;
    use crate::provider::kv::KvDiscoveryProvider;
    use gatehouse_core::MemoryStore;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct ScriptedProbe {
        calls: AtomicUsize,
        healthy_after: usize,
    }

    #[async_trait]
    impl InstanceProbe for ScriptedProbe {
        async fn probe(&self, _: &ServiceInstance) -> bool {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            call >= self.healthy_after
        }
    }

    fn config() -> DiscoveryConfig {
        DiscoveryConfig::builder()
            .unhealthy_threshold(2)
            .healthy_threshold(2)
            .health_check_timeout(Duration::from_millis(100))
            .build()
    }

    #[tokio::test]
    async fn consecutive_failures_flip_to_unhealthy_and_back() {
        let provider = Arc::new(KvDiscoveryProvider::new(
            Arc::new(MemoryStore::new()),
            Duration::from_secs(30),
        ));
        let instance = provider
            .register(ServiceRegistration::new("users", "10.0.0.1", 1))
            .await
            .unwrap();

        // Fails twice, then recovers.
        let probe = Arc::new(ScriptedProbe {
            calls: AtomicUsize::new(0),
            healthy_after: 2,
        });
        let monitor = InstanceHealthMonitor::new(provider.clone(), probe, config());

        // One failure is not enough.
        monitor.run_once().await;
        let current = provider.instance("users", &instance.id).await.unwrap().unwrap();
        assert_eq!(current.status, ServiceStatus::Healthy);

        // Second consecutive failure flips the status.
        monitor.run_once().await;
        let current = provider.instance("users", &instance.id).await.unwrap().unwrap();
        assert_eq!(current.status, ServiceStatus::Unhealthy);

        // Two consecutive successes flip it back.
        monitor.run_once().await;
        monitor.run_once().await;
        let current = provider.instance("users", &instance.id).await.unwrap().unwrap();
        assert_eq!(current.status, ServiceStatus::Healthy);
    }

    #[tokio::test]
    async fn probe_timeouts_count_as_failures() {
        struct HangingProbe;

        #[async_trait]
        impl InstanceProbe for HangingProbe {
            async fn probe(&self, _: &ServiceInstance) -> bool {
                tokio::time::sleep(Duration::from_secs(60)).await;
                true
            }
        }

        let provider = Arc::new(KvDiscoveryProvider::new(
            Arc::new(MemoryStore::new()),
            Duration::from_secs(30),
        ));
        let instance = provider
            .register(ServiceRegistration::new("users", "10.0.0.1", 1))
            .await
            .unwrap();

        let monitor = InstanceHealthMonitor::new(provider.clone(), Arc::new(HangingProbe), config());
        monitor.run_once().await;
        monitor.run_once().await;

        let current = provider.instance("users", &instance.id).await.unwrap().unwrap();
        assert_eq!(current.status, ServiceStatus::Unhealthy);
    }
}
