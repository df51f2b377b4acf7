use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Health status levels, ordered by severity for rollups:
/// `unhealthy > degraded > healthy > unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }

    fn severity(&self) -> u8 {
        match self {
            HealthStatus::Unknown => 0,
            HealthStatus::Healthy => 1,
            HealthStatus::Degraded => 2,
            HealthStatus::Unhealthy => 3,
        }
    }

    /// The worse of two statuses.
    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

/// Component operational states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Running,
    Starting,
    Stopping,
    Stopped,
    Failed,
}

/// Result of a single probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
    pub details: Value,
    pub timestamp_ms: u64,
    pub duration_ms: f64,
}

impl HealthCheckResult {
    pub fn new(name: impl Into<String>, status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            message: message.into(),
            details: Value::Object(Default::default()),
            timestamp_ms: epoch_ms(),
            duration_ms: 0.0,
        }
    }

    pub fn healthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, HealthStatus::Healthy, message)
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, HealthStatus::Degraded, message)
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, HealthStatus::Unhealthy, message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn is_unhealthy(&self) -> bool {
        self.status == HealthStatus::Unhealthy
    }
}

/// Aggregate health of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component_name: String,
    pub status: HealthStatus,
    pub state: HealthState,
    pub checks: Vec<HealthCheckResult>,
    pub dependencies: HashMap<String, HealthStatus>,
    pub uptime_seconds: f64,
    pub last_check_ms: u64,
}

impl ComponentHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// The system can serve traffic when at least degraded.
    pub fn is_serviceable(&self) -> bool {
        matches!(self.status, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &HealthCheckResult> {
        self.checks.iter().filter(|check| check.is_unhealthy())
    }
}

/// An alert raised after sustained probe failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthAlert {
    pub component_name: String,
    pub check_name: String,
    pub message: String,
    pub failure_count: u32,
    pub raised_at_ms: u64,
    pub resolved: bool,
    pub resolved_at_ms: Option<u64>,
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
    fn worst_follows_severity_order() {
        use HealthStatus::*;
        assert_eq!(Healthy.worst(Degraded), Degraded);
        assert_eq!(Degraded.worst(Unhealthy), Unhealthy);
        assert_eq!(Unknown.worst(Healthy), Healthy);
        assert_eq!(Unhealthy.worst(Healthy), Unhealthy);
    }

    #[test]
    fn serviceable_includes_degraded() {
        let mut health = ComponentHealth {
            component_name: "api".to_string(),
            status: HealthStatus::Degraded,
            state: HealthState::Running,
            checks: Vec::new(),
            dependencies: HashMap::new(),
            uptime_seconds: 1.0,
            last_check_ms: epoch_ms(),
        };
        assert!(health.is_serviceable());
        health.status = HealthStatus::Unhealthy;
        assert!(!health.is_serviceable());
    }
}
