//! System resource probe: CPU, memory, swap, and disk thresholds.

use crate::check::HealthCheck;
use crate::models::{HealthCheckResult, HealthStatus};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use sysinfo::{Disks, System};

pub struct SystemHealthCheck {
    name: String,
    timeout: Duration,
    cpu_warn: f32,
    cpu_critical: f32,
    memory_warn: f64,
    memory_critical: f64,
    swap_warn: f64,
    disk_warn: f64,
}

impl SystemHealthCheck {
    pub fn new() -> Self {
        Self {
            name: "system".to_string(),
            timeout: Duration::from_secs(5),
            cpu_warn: 80.0,
            cpu_critical: 95.0,
            memory_warn: 0.85,
            memory_critical: 0.95,
            swap_warn: 0.5,
            disk_warn: 0.9,
        }
    }

    pub fn cpu_thresholds(mut self, warn: f32, critical: f32) -> Self {
        self.cpu_warn = warn;
        self.cpu_critical = critical;
        self
    }

    pub fn memory_thresholds(mut self, warn: f64, critical: f64) -> Self {
        self.memory_warn = warn;
        self.memory_critical = critical;
        self
    }

    pub fn swap_warn(mut self, ratio: f64) -> Self {
        self.swap_warn = ratio;
        self
    }

    pub fn disk_warn(mut self, ratio: f64) -> Self {
        self.disk_warn = ratio;
        self
    }
}

impl Default for SystemHealthCheck {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthCheck for SystemHealthCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn check(&self) -> HealthCheckResult {
        let mut system = System::new();
        system.refresh_memory();
        system.refresh_cpu_usage();
        // CPU usage needs two samples a beat apart.
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        system.refresh_cpu_usage();

        let cpu_usage = system.global_cpu_usage();
        let memory_ratio = if system.total_memory() == 0 {
            0.0
        } else {
            system.used_memory() as f64 / system.total_memory() as f64
        };
        let swap_ratio = if system.total_swap() == 0 {
            0.0
        } else {
            system.used_swap() as f64 / system.total_swap() as f64
        };

        let disks = Disks::new_with_refreshed_list();
        let worst_disk_ratio = disks
            .iter()
            .filter(|disk| disk.total_space() > 0)
            .map(|disk| {
                1.0 - disk.available_space() as f64 / disk.total_space() as f64
            })
            .fold(0.0f64, f64::max);

        let mut status = HealthStatus::Healthy;
        let mut notes = Vec::new();

        if cpu_usage >= self.cpu_critical {
            status = status.worst(HealthStatus::Unhealthy);
            notes.push(format!("cpu {cpu_usage:.0}% critical"));
        } else if cpu_usage >= self.cpu_warn {
            status = status.worst(HealthStatus::Degraded);
            notes.push(format!("cpu {cpu_usage:.0}% elevated"));
        }

        if memory_ratio >= self.memory_critical {
            status = status.worst(HealthStatus::Unhealthy);
            notes.push(format!("memory {:.0}% critical", memory_ratio * 100.0));
        } else if memory_ratio >= self.memory_warn {
            status = status.worst(HealthStatus::Degraded);
            notes.push(format!("memory {:.0}% elevated", memory_ratio * 100.0));
        }

        if swap_ratio >= self.swap_warn {
            status = status.worst(HealthStatus::Degraded);
            notes.push(format!("swap {:.0}% in use", swap_ratio * 100.0));
        }

        if worst_disk_ratio >= self.disk_warn {
            status = status.worst(HealthStatus::Degraded);
            notes.push(format!("disk {:.0}% full", worst_disk_ratio * 100.0));
        }

        let message = if notes.is_empty() {
            "resources nominal".to_string()
        } else {
            notes.join("; ")
        };

        HealthCheckResult::new(&self.name, status, message).with_details(json!({
            "cpu_percent": cpu_usage,
            "memory_ratio": memory_ratio,
            "swap_ratio": swap_ratio,
            "worst_disk_ratio": worst_disk_ratio,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_resource_details() {
        let check = SystemHealthCheck::new();
        let result = check.check().await;
        assert_ne!(result.status, HealthStatus::Unknown);
        assert!(result.details["cpu_percent"].is_number());
        assert!(result.details["memory_ratio"].is_number());
    }

    #[tokio::test]
    async fn impossible_thresholds_never_trip() {
        let check = SystemHealthCheck::new()
            .cpu_thresholds(101.0, 102.0)
            .memory_thresholds(1.1, 1.2)
            .swap_warn(1.1)
            .disk_warn(1.1);
        let result = check.check().await;
        assert_eq!(result.status, HealthStatus::Healthy);
    }
}
