use crate::models::HealthCheckResult;
use async_trait::async_trait;
use std::time::Duration;

/// A named probe.
///
/// The monitor enforces [`HealthCheck::timeout`] around every execution; a
/// probe that overruns is reported unhealthy.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    async fn check(&self) -> HealthCheckResult;
}
