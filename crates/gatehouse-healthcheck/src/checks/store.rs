//! Shared-store probe: round-trip latency plus memory fragmentation.

use crate::check::HealthCheck;
use crate::models::{HealthCheckResult, HealthStatus};
use async_trait::async_trait;
use gatehouse_core::SharedStore;
use serde_json::json;
use std::time::Duration;

pub struct StoreHealthCheck {
    name: String,
    store: SharedStore,
    timeout: Duration,
    /// Ping latency above this is degraded.
    latency_warn: Duration,
    /// Fragmentation ratio above this is degraded.
    fragmentation_warn: f64,
}

impl StoreHealthCheck {
    pub fn new(store: SharedStore) -> Self {
        Self {
            name: "store".to_string(),
            store,
            timeout: Duration::from_secs(5),
            latency_warn: Duration::from_millis(100),
            fragmentation_warn: 1.5,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn latency_warn(mut self, threshold: Duration) -> Self {
        self.latency_warn = threshold;
        self
    }

    pub fn fragmentation_warn(mut self, ratio: f64) -> Self {
        self.fragmentation_warn = ratio;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl HealthCheck for StoreHealthCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn check(&self) -> HealthCheckResult {
        let latency = match self.store.ping().await {
            Ok(latency) => latency,
            Err(err) => {
                return HealthCheckResult::unhealthy(&self.name, format!("store ping failed: {err}"))
            }
        };

        let memory = match self.store.memory_info().await {
            Ok(memory) => memory,
            Err(_) => None,
        };

        let mut status = HealthStatus::Healthy;
        let mut notes = vec![format!("ping {:.1}ms", latency.as_secs_f64() * 1000.0)];

        if latency > self.latency_warn {
            status = status.worst(HealthStatus::Degraded);
            notes.push("latency above threshold".to_string());
        }
        if let Some(memory) = &memory {
            if memory.fragmentation_ratio > self.fragmentation_warn {
                status = status.worst(HealthStatus::Degraded);
                notes.push(format!(
                    "fragmentation {:.2} above threshold",
                    memory.fragmentation_ratio
                ));
            }
        }

        HealthCheckResult::new(&self.name, status, notes.join("; ")).with_details(json!({
            "latency_ms": latency.as_secs_f64() * 1000.0,
            "used_memory_bytes": memory.as_ref().map(|m| m.used_bytes),
            "fragmentation_ratio": memory.as_ref().map(|m| m.fragmentation_ratio),
        }))
    }
}
