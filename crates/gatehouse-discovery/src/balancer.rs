//! Instance selection strategies.

use crate::instance::{epoch_ms, ServiceInstance};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Load balancing strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerStrategy {
    /// Monotonic counter per service, modulo healthy count.
    RoundRobin,
    /// Instance appears `weight` times in a virtual ring.
    WeightedRoundRobin,
    /// Minimum `active_connections`.
    LeastConnections,
    /// Uniform random among healthy.
    Random,
    /// `hash(client_ip) mod healthy_count`; stable for one client while
    /// the instance set is stable.
    IpHash,
    /// Minimum `response_time_ms`.
    LeastResponseTime,
}

impl LoadBalancerStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalancerStrategy::RoundRobin => "round_robin",
            LoadBalancerStrategy::WeightedRoundRobin => "weighted_round_robin",
            LoadBalancerStrategy::LeastConnections => "least_connections",
            LoadBalancerStrategy::Random => "random",
            LoadBalancerStrategy::IpHash => "ip_hash",
            LoadBalancerStrategy::LeastResponseTime => "least_response_time",
        }
    }
}

/// Picks one healthy instance per request.
pub struct LoadBalancer {
    strategy: LoadBalancerStrategy,
    sticky_sessions: bool,
    session_timeout: Duration,
    counters: Mutex<HashMap<String, u64>>,
    sessions: Mutex<HashMap<String, SessionBinding>>,
}

struct SessionBinding {
    instance_id: String,
    expires_at_ms: u64,
}

impl LoadBalancer {
    pub fn new(
        strategy: LoadBalancerStrategy,
        sticky_sessions: bool,
        session_timeout: Duration,
    ) -> Self {
        Self {
            strategy,
            sticky_sessions,
            session_timeout,
            counters: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn strategy(&self) -> LoadBalancerStrategy {
        self.strategy
    }

    /// Select among `instances`; only healthy ones are eligible.
    pub fn select(
        &self,
        instances: &[ServiceInstance],
        session_id: Option<&str>,
        client_ip: Option<&str>,
    ) -> Option<ServiceInstance> {
        let healthy: Vec<&ServiceInstance> =
            instances.iter().filter(|i| i.is_healthy()).collect();
        if healthy.is_empty() {
            return None;
        }

        // An existing sticky binding wins while its instance stays healthy.
        if self.sticky_sessions {
            if let Some(session_id) = session_id {
                if let Some(bound) = self.session_instance(session_id, &healthy) {
                    return Some(bound);
                }
            }
        }

        let selected = match self.strategy {
            LoadBalancerStrategy::RoundRobin => self.round_robin(&healthy),
            LoadBalancerStrategy::WeightedRoundRobin => self.weighted_round_robin(&healthy),
            LoadBalancerStrategy::LeastConnections => {
                Self::min_by(&healthy, |i| i.active_connections as f64)
            }
            LoadBalancerStrategy::Random => {
                healthy[rand::rng().random_range(0..healthy.len())].clone()
            }
            LoadBalancerStrategy::IpHash => self.ip_hash(&healthy, client_ip),
            LoadBalancerStrategy::LeastResponseTime => {
                Self::min_by(&healthy, |i| i.response_time_ms)
            }
        };

        if self.sticky_sessions {
            if let Some(session_id) = session_id {
                self.bind_session(session_id, &selected.id);
            }
        }

        Some(selected)
    }

    /// Drop a sticky binding.
    pub fn clear_session(&self, session_id: &str) {
        self.sessions.lock().unwrap().remove(session_id);
    }

    pub fn active_sessions(&self) -> usize {
        let now = epoch_ms();
        self.sessions
            .lock()
            .unwrap()
            .values()
            .filter(|binding| binding.expires_at_ms > now)
            .count()
    }

    fn session_instance(
        &self,
        session_id: &str,
        healthy: &[&ServiceInstance],
    ) -> Option<ServiceInstance> {
        let now = epoch_ms();
        let sessions = self.sessions.lock().unwrap();
        let binding = sessions.get(session_id)?;
        if binding.expires_at_ms <= now {
            return None;
        }
        healthy
            .iter()
            .find(|instance| instance.id == binding.instance_id)
            .map(|instance| (*instance).clone())
    }

    fn bind_session(&self, session_id: &str, instance_id: &str) {
        self.sessions.lock().unwrap().insert(
            session_id.to_string(),
            SessionBinding {
                instance_id: instance_id.to_string(),
                expires_at_ms: epoch_ms() + self.session_timeout.as_millis() as u64,
            },
        );
    }

    fn round_robin(&self, healthy: &[&ServiceInstance]) -> ServiceInstance {
        let service = healthy[0].name.clone();
        let mut counters = self.counters.lock().unwrap();
        let counter = counters.entry(service).or_insert(0);
        let index = (*counter % healthy.len() as u64) as usize;
        *counter += 1;
        healthy[index].clone()
    }

    fn weighted_round_robin(&self, healthy: &[&ServiceInstance]) -> ServiceInstance {
        let mut ring: Vec<usize> = Vec::new();
        for (index, instance) in healthy.iter().enumerate() {
            for _ in 0..instance.weight.max(1) {
                ring.push(index);
            }
        }

        let service = format!("{}:weighted", healthy[0].name);
        let mut counters = self.counters.lock().unwrap();
        let counter = counters.entry(service).or_insert(0);
        let slot = (*counter % ring.len() as u64) as usize;
        *counter += 1;
        healthy[ring[slot]].clone()
    }

    fn ip_hash(&self, healthy: &[&ServiceInstance], client_ip: Option<&str>) -> ServiceInstance {
        let Some(client_ip) = client_ip else {
            return self.round_robin(healthy);
        };
        let digest = Sha256::digest(client_ip.as_bytes());
        let hash = u64::from_be_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ]);
        healthy[(hash % healthy.len() as u64) as usize].clone()
    }

    fn min_by<F: Fn(&ServiceInstance) -> f64>(
        healthy: &[&ServiceInstance],
        metric: F,
    ) -> ServiceInstance {
        healthy
            .iter()
            .min_by(|a, b| metric(a).total_cmp(&metric(b)))
            .map(|instance| (*instance).clone())
            // healthy is never empty here
            .unwrap_or_else(|| healthy[0].clone())
    }
}
