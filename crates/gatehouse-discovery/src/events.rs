use crate::instance::ServiceStatus;
use gatehouse_core::ControlEvent;
use std::time::Instant;

/// Events emitted by the discovery subsystem.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    InstanceRegistered {
        service: String,
        instance: String,
        timestamp: Instant,
    },
    InstanceDeregistered {
        service: String,
        instance: String,
        timestamp: Instant,
    },
    StatusChanged {
        service: String,
        instance: String,
        status: ServiceStatus,
        timestamp: Instant,
    },
    InstanceExpired {
        service: String,
        instance: String,
        timestamp: Instant,
    },
}

impl ControlEvent for DiscoveryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DiscoveryEvent::InstanceRegistered { .. } => "instance_registered",
            DiscoveryEvent::InstanceDeregistered { .. } => "instance_deregistered",
            DiscoveryEvent::StatusChanged { .. } => "status_changed",
            DiscoveryEvent::InstanceExpired { .. } => "instance_expired",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            DiscoveryEvent::InstanceRegistered { timestamp, .. }
            | DiscoveryEvent::InstanceDeregistered { timestamp, .. }
            | DiscoveryEvent::StatusChanged { timestamp, .. }
            | DiscoveryEvent::InstanceExpired { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            DiscoveryEvent::InstanceRegistered { service, .. }
            | DiscoveryEvent::InstanceDeregistered { service, .. }
            | DiscoveryEvent::StatusChanged { service, .. }
            | DiscoveryEvent::InstanceExpired { service, .. } => service,
        }
    }
}
