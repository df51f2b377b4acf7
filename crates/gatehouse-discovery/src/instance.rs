use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Service instance status. Only `Healthy` instances are selectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Healthy,
    Unhealthy,
    Starting,
    Stopping,
    Unknown,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Unhealthy => "unhealthy",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Stopping => "stopping",
            ServiceStatus::Unknown => "unknown",
        }
    }
}

/// Where an instance listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub path: String,
}

impl ServiceEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            protocol: "http".to_string(),
            path: "/".to_string(),
        }
    }

    pub fn url(&self) -> String {
        format!("{}://{}:{}{}", self.protocol, self.host, self.port, self.path)
    }

    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A registered upstream instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub name: String,
    pub endpoint: ServiceEndpoint,
    pub status: ServiceStatus,
    pub version: Option<String>,
    pub metadata: Value,
    pub registered_at_ms: u64,
    pub last_heartbeat_ms: u64,
    pub active_connections: u32,
    pub response_time_ms: f64,
    pub error_rate: f64,
    /// Selection weight for weighted strategies; at least 1.
    pub weight: u32,
}

impl ServiceInstance {
    pub fn is_healthy(&self) -> bool {
        self.status == ServiceStatus::Healthy
    }

    /// Seconds since the last heartbeat.
    pub fn heartbeat_age(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.last_heartbeat_ms))
    }

    /// An instance is expired once its heartbeat age exceeds the TTL.
    pub fn is_expired(&self, now_ms: u64, ttl: Duration) -> bool {
        self.heartbeat_age(now_ms) > ttl
    }

    pub fn touch_heartbeat(&mut self) {
        self.last_heartbeat_ms = epoch_ms();
    }
}

/// Registration request for one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub path: String,
    pub version: Option<String>,
    pub metadata: Value,
    /// Registration TTL refreshed by heartbeats.
    pub ttl_seconds: u64,
    pub weight: u32,
}

impl ServiceRegistration {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            protocol: "http".to_string(),
            path: "/".to_string(),
            version: None,
            metadata: Value::Object(Default::default()),
            ttl_seconds: 30,
            weight: 1,
        }
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }

    pub fn ttl_seconds(mut self, ttl: u64) -> Self {
        self.ttl_seconds = ttl;
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub(crate) fn into_instance(self, id: String) -> ServiceInstance {
        let now = epoch_ms();
        ServiceInstance {
            id,
            name: self.name,
            endpoint: ServiceEndpoint {
                host: self.host,
                port: self.port,
                protocol: self.protocol,
                path: self.path,
            },
            status: ServiceStatus::Starting,
            version: self.version,
            metadata: self.metadata,
            registered_at_ms: now,
            last_heartbeat_ms: now,
            active_connections: 0,
            response_time_ms: 0.0,
            error_rate: 0.0,
            weight: self.weight.max(1),
        }
    }
}

pub(crate) fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_includes_every_part() {
        let endpoint = ServiceEndpoint {
            host: "10.0.0.5".to_string(),
            port: 8080,
            protocol: "https".to_string(),
            path: "/api".to_string(),
        };
        assert_eq!(endpoint.url(), "https://10.0.0.5:8080/api");
        assert_eq!(endpoint.authority(), "10.0.0.5:8080");
    }

    #[test]
    fn expiry_follows_heartbeat_age() {
        let registration = ServiceRegistration::new("users", "localhost", 8080);
        let mut instance = registration.into_instance("users-1".to_string());
        let now = epoch_ms();
        assert!(!instance.is_expired(now, Duration::from_secs(30)));

        instance.last_heartbeat_ms = now.saturating_sub(31_000);
        assert!(instance.is_expired(now, Duration::from_secs(30)));
    }

    #[test]
    fn weight_has_a_floor_of_one() {
        let registration = ServiceRegistration::new("users", "localhost", 8080).weight(0);
        let instance = registration.into_instance("users-1".to_string());
        assert_eq!(instance.weight, 1);
    }
}
