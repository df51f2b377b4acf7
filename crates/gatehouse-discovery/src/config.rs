use crate::balancer::LoadBalancerStrategy;
use std::time::Duration;

/// Which registry backs discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    /// Shared key-value store; full read/write registry.
    Kv,
    /// DNS resolution; read-only, registration managed externally.
    Dns,
}

/// Configuration for the discovery subsystem.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub(crate) provider_type: ProviderType,
    pub(crate) health_check_interval: Duration,
    pub(crate) health_check_timeout: Duration,
    pub(crate) unhealthy_threshold: u32,
    pub(crate) healthy_threshold: u32,
    pub(crate) registration_ttl: Duration,
    pub(crate) cleanup_interval: Duration,
    pub(crate) default_strategy: LoadBalancerStrategy,
    pub(crate) sticky_sessions: bool,
    pub(crate) session_timeout: Duration,
    pub(crate) dns_domain: String,
    pub(crate) dns_port: u16,
}

impl DiscoveryConfig {
    pub fn builder() -> DiscoveryConfigBuilder {
        DiscoveryConfigBuilder::new()
    }
}

/// Builder for [`DiscoveryConfig`].
pub struct DiscoveryConfigBuilder {
    provider_type: ProviderType,
    health_check_interval: Duration,
    health_check_timeout: Duration,
    unhealthy_threshold: u32,
    healthy_threshold: u32,
    registration_ttl: Duration,
    cleanup_interval: Duration,
    default_strategy: LoadBalancerStrategy,
    sticky_sessions: bool,
    session_timeout: Duration,
    dns_domain: String,
    dns_port: u16,
}

impl DiscoveryConfigBuilder {
    pub fn new() -> Self {
        Self {
            provider_type: ProviderType::Kv,
            health_check_interval: Duration::from_secs(10),
            health_check_timeout: Duration::from_secs(5),
            unhealthy_threshold: 3,
            healthy_threshold: 2,
            registration_ttl: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(30),
            default_strategy: LoadBalancerStrategy::RoundRobin,
            sticky_sessions: false,
            session_timeout: Duration::from_secs(300),
            dns_domain: "local".to_string(),
            dns_port: 80,
        }
    }

    /// Registry backend.
    ///
    /// Default: Kv
    pub fn provider_type(mut self, provider_type: ProviderType) -> Self {
        self.provider_type = provider_type;
        self
    }

    /// How often the active monitor probes each instance.
    ///
    /// Default: 10 seconds
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Per-probe deadline.
    ///
    /// Default: 5 seconds
    pub fn health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout = timeout;
        self
    }

    /// Consecutive probe failures before an instance flips unhealthy.
    ///
    /// Default: 3
    pub fn unhealthy_threshold(mut self, n: u32) -> Self {
        self.unhealthy_threshold = n;
        self
    }

    /// Consecutive probe successes before an instance flips healthy.
    ///
    /// Default: 2
    pub fn healthy_threshold(mut self, n: u32) -> Self {
        self.healthy_threshold = n;
        self
    }

    /// Registration TTL refreshed by heartbeats.
    ///
    /// Default: 30 seconds
    pub fn registration_ttl(mut self, ttl: Duration) -> Self {
        self.registration_ttl = ttl;
        self
    }

    /// How often the expiry sweep reconciles the index.
    ///
    /// Default: 30 seconds
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Selection strategy.
    ///
    /// Default: RoundRobin
    pub fn default_strategy(mut self, strategy: LoadBalancerStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    /// Pin sessions to their first selected instance.
    ///
    /// Default: false
    pub fn sticky_sessions(mut self, enabled: bool) -> Self {
        self.sticky_sessions = enabled;
        self
    }

    /// Sticky binding lifetime.
    ///
    /// Default: 5 minutes
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Domain suffix for DNS-backed discovery.
    ///
    /// Default: "local"
    pub fn dns_domain(mut self, domain: impl Into<String>) -> Self {
        self.dns_domain = domain.into();
        self
    }

    /// Port assumed for DNS-resolved instances.
    ///
    /// Default: 80
    pub fn dns_port(mut self, port: u16) -> Self {
        self.dns_port = port;
        self
    }

    /// Apply `GATEHOUSE_DISCOVERY_*` environment overrides:
    /// `PROVIDER_TYPE` (kv|dns), `HEALTH_CHECK_INTERVAL_SECONDS`,
    /// `HEALTH_CHECK_TIMEOUT_SECONDS`, `UNHEALTHY_THRESHOLD`,
    /// `HEALTHY_THRESHOLD`, `REGISTRATION_TTL_SECONDS`,
    /// `CLEANUP_INTERVAL_SECONDS`, `DEFAULT_STRATEGY`, `STICKY_SESSIONS`,
    /// `SESSION_TIMEOUT_SECONDS`, `DNS_DOMAIN`, `DNS_PORT`.
    pub fn from_env(mut self) -> Self {
        if let Ok(provider) = std::env::var("GATEHOUSE_DISCOVERY_PROVIDER_TYPE") {
            self.provider_type = match provider.as_str() {
                "kv" => ProviderType::Kv,
                "dns" => ProviderType::Dns,
                other => panic!("unknown GATEHOUSE_DISCOVERY_PROVIDER_TYPE: {other}"),
            };
        }
        if let Some(secs) = env_parse::<u64>("GATEHOUSE_DISCOVERY_HEALTH_CHECK_INTERVAL_SECONDS") {
            self.health_check_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("GATEHOUSE_DISCOVERY_HEALTH_CHECK_TIMEOUT_SECONDS") {
            self.health_check_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse("GATEHOUSE_DISCOVERY_UNHEALTHY_THRESHOLD") {
            self.unhealthy_threshold = n;
        }
        if let Some(n) = env_parse("GATEHOUSE_DISCOVERY_HEALTHY_THRESHOLD") {
            self.healthy_threshold = n;
        }
        if let Some(secs) = env_parse::<u64>("GATEHOUSE_DISCOVERY_REGISTRATION_TTL_SECONDS") {
            self.registration_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("GATEHOUSE_DISCOVERY_CLEANUP_INTERVAL_SECONDS") {
            self.cleanup_interval = Duration::from_secs(secs);
        }
        if let Ok(strategy) = std::env::var("GATEHOUSE_DISCOVERY_DEFAULT_STRATEGY") {
            self.default_strategy = match strategy.as_str() {
                "round_robin" => LoadBalancerStrategy::RoundRobin,
                "weighted_round_robin" => LoadBalancerStrategy::WeightedRoundRobin,
                "least_connections" => LoadBalancerStrategy::LeastConnections,
                "random" => LoadBalancerStrategy::Random,
                "ip_hash" => LoadBalancerStrategy::IpHash,
                "least_response_time" => LoadBalancerStrategy::LeastResponseTime,
                other => panic!("unknown GATEHOUSE_DISCOVERY_DEFAULT_STRATEGY: {other}"),
            };
        }
        if let Some(enabled) = env_parse("GATEHOUSE_DISCOVERY_STICKY_SESSIONS") {
            self.sticky_sessions = enabled;
        }
        if let Some(secs) = env_parse::<u64>("GATEHOUSE_DISCOVERY_SESSION_TIMEOUT_SECONDS") {
            self.session_timeout = Duration::from_secs(secs);
        }
        if let Ok(domain) = std::env::var("GATEHOUSE_DISCOVERY_DNS_DOMAIN") {
            self.dns_domain = domain;
        }
        if let Some(port) = env_parse("GATEHOUSE_DISCOVERY_DNS_PORT") {
            self.dns_port = port;
        }
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> DiscoveryConfig {
        if self.unhealthy_threshold == 0 || self.healthy_threshold == 0 {
            panic!("health flip thresholds must be at least 1");
        }
        if self.registration_ttl.is_zero() {
            panic!("registration_ttl must be positive");
        }

        DiscoveryConfig {
            provider_type: self.provider_type,
            health_check_interval: self.health_check_interval,
            health_check_timeout: self.health_check_timeout,
            unhealthy_threshold: self.unhealthy_threshold,
            healthy_threshold: self.healthy_threshold,
            registration_ttl: self.registration_ttl,
            cleanup_interval: self.cleanup_interval,
            default_strategy: self.default_strategy,
            sticky_sessions: self.sticky_sessions,
            session_timeout: self.session_timeout,
            dns_domain: self.dns_domain,
            dns_port: self.dns_port,
        }
    }
}

impl Default for DiscoveryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => panic!("invalid value for {name}: {raw}"),
        },
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = DiscoveryConfig::builder().build();
        assert_eq!(config.provider_type, ProviderType::Kv);
        assert_eq!(config.registration_ttl, Duration::from_secs(30));
        assert_eq!(config.default_strategy, LoadBalancerStrategy::RoundRobin);
        assert!(!config.sticky_sessions);
    }

    #[test]
    #[should_panic(expected = "thresholds")]
    fn zero_thresholds_are_rejected() {
        DiscoveryConfig::builder().unhealthy_threshold(0).build();
    }
}
