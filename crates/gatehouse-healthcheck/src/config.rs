use std::time::Duration;

/// How dependency statuses fold into a component's own status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyPolicy {
    /// Dependencies are reported but never change the component's status.
    Ignore,
    /// An unhealthy dependency demotes a healthy component to degraded.
    DemoteToDegraded,
    /// The component takes the worst dependency status.
    Inherit,
}

/// Configuration for one health monitor.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub(crate) check_interval: Duration,
    pub(crate) alert_threshold: u32,
    pub(crate) dependency_policy: DependencyPolicy,
}

impl HealthConfig {
    pub fn builder() -> HealthConfigBuilder {
        HealthConfigBuilder::new()
    }
}

/// Builder for [`HealthConfig`].
pub struct HealthConfigBuilder {
    check_interval: Duration,
    alert_threshold: u32,
    dependency_policy: DependencyPolicy,
}

impl HealthConfigBuilder {
    pub fn new() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            alert_threshold: 3,
            dependency_policy: DependencyPolicy::DemoteToDegraded,
        }
    }

    /// Pause between background check passes. Published health carries a
    /// TTL of twice this.
    ///
    /// Default: 30 seconds
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Consecutive failures of one check before an alert is raised.
    ///
    /// Default: 3
    pub fn alert_threshold(mut self, n: u32) -> Self {
        self.alert_threshold = n;
        self
    }

    /// Dependency rollup policy.
    ///
    /// Default: DemoteToDegraded
    pub fn dependency_policy(mut self, policy: DependencyPolicy) -> Self {
        self.dependency_policy = policy;
        self
    }

    /// Apply `GATEHOUSE_HEALTH_*` environment overrides:
    /// `CHECK_INTERVAL_SECONDS`, `ALERT_THRESHOLD`, `DEPENDENCY_POLICY`
    /// (ignore|demote|inherit).
    pub fn from_env(mut self) -> Self {
        if let Ok(raw) = std::env::var("GATEHOUSE_HEALTH_CHECK_INTERVAL_SECONDS") {
            match raw.parse() {
                Ok(secs) => self.check_interval = Duration::from_secs(secs),
                Err(_) => panic!("invalid value for GATEHOUSE_HEALTH_CHECK_INTERVAL_SECONDS: {raw}"),
            }
        }
        if let Ok(raw) = std::env::var("GATEHOUSE_HEALTH_ALERT_THRESHOLD") {
            match raw.parse() {
                Ok(n) => self.alert_threshold = n,
                Err(_) => panic!("invalid value for GATEHOUSE_HEALTH_ALERT_THRESHOLD: {raw}"),
            }
        }
        if let Ok(policy) = std::env::var("GATEHOUSE_HEALTH_DEPENDENCY_POLICY") {
            self.dependency_policy = match policy.as_str() {
                "ignore" => DependencyPolicy::Ignore,
                "demote" => DependencyPolicy::DemoteToDegraded,
                "inherit" => DependencyPolicy::Inherit,
                other => panic!("unknown GATEHOUSE_HEALTH_DEPENDENCY_POLICY: {other}"),
            };
        }
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> HealthConfig {
        if self.alert_threshold == 0 {
            panic!("alert_threshold must be at least 1");
        }
        HealthConfig {
            check_interval: self.check_interval,
            alert_threshold: self.alert_threshold,
            dependency_policy: self.dependency_policy,
        }
    }
}

impl Default for HealthConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
