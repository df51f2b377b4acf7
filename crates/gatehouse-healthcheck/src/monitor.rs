use crate::check::HealthCheck;
use crate::config::{DependencyPolicy, HealthConfig};
use crate::dependency::DependencyGraph;
use crate::error::HealthError;
use crate::models::{
    epoch_ms, ComponentHealth, HealthAlert, HealthCheckResult, HealthState, HealthStatus,
};
use futures::future::join_all;
use gatehouse_core::{keys, KvStoreExt, SharedStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

type AlertHook = Arc<dyn Fn(&HealthAlert) + Send + Sync>;

/// Runs all registered probes in parallel and rolls results up into a
/// published [`ComponentHealth`].
pub struct HealthMonitor {
    component_name: String,
    config: HealthConfig,
    store: SharedStore,
    checks: RwLock<Vec<Arc<dyn HealthCheck>>>,
    graph: RwLock<DependencyGraph>,
    failure_counts: Mutex<HashMap<String, u32>>,
    active_alerts: Mutex<HashMap<String, HealthAlert>>,
    alert_hook: Option<AlertHook>,
    started_at: Instant,
    running: Arc<AtomicBool>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(store: SharedStore, component_name: impl Into<String>, config: HealthConfig) -> Self {
        Self {
            component_name: component_name.into(),
            config,
            store,
            checks: RwLock::new(Vec::new()),
            graph: RwLock::new(DependencyGraph::new()),
            failure_counts: Mutex::new(HashMap::new()),
            active_alerts: Mutex::new(HashMap::new()),
            alert_hook: None,
            started_at: Instant::now(),
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Install a hook invoked when alerts are raised and resolved.
    pub fn with_alert_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HealthAlert) + Send + Sync + 'static,
    {
        self.alert_hook = Some(Arc::new(hook));
        self
    }

    /// Register a probe.
    pub fn register_check(&self, check: Arc<dyn HealthCheck>) {
        #[cfg(feature = "tracing")]
        tracing::info!(check = check.name(), "registered health check");
        self.checks.write().unwrap().push(check);
    }

    /// Record that this component depends on another.
    pub fn add_dependency(&self, dependency: &str) -> Result<(), HealthError> {
        self.graph
            .write()
            .unwrap()
            .add_dependency(&self.component_name, dependency)
    }

    /// Alerts currently held open.
    pub fn active_alerts(&self) -> Vec<HealthAlert> {
        self.active_alerts.lock().unwrap().values().cloned().collect()
    }

    /// Execute every probe in parallel, roll up, publish, and return the
    /// component health. Store failures during publication and dependency
    /// lookup degrade gracefully; they never fail the check itself.
    pub async fn check_health(&self) -> ComponentHealth {
        let checks: Vec<Arc<dyn HealthCheck>> = self.checks.read().unwrap().clone();
        let results = join_all(checks.iter().map(|check| Self::execute(Arc::clone(check)))).await;

        for result in &results {
            self.track_alerts(result);

            #[cfg(feature = "metrics")]
            {
                metrics::histogram!(
                    "health_check_duration_seconds",
                    "check" => result.name.clone()
                )
                .record(result.duration_ms / 1000.0);
                metrics::counter!(
                    "health_check_results_total",
                    "check" => result.name.clone(),
                    "status" => result.status.as_str()
                )
                .increment(1);
            }
        }

        let mut status = results
            .iter()
            .fold(HealthStatus::Unknown, |acc, result| acc.worst(result.status));
        if results.is_empty() {
            status = HealthStatus::Unknown;
        }

        let dependencies = self.dependency_statuses().await;
        status = self.apply_dependency_policy(status, &dependencies);

        let health = ComponentHealth {
            component_name: self.component_name.clone(),
            status,
            state: if self.running.load(Ordering::SeqCst) {
                HealthState::Running
            } else {
                HealthState::Stopped
            },
            checks: results,
            dependencies,
            uptime_seconds: self.started_at.elapsed().as_secs_f64(),
            last_check_ms: epoch_ms(),
        };

        let ttl = self.config.check_interval * 2;
        if let Err(_err) = self
            .store
            .set_json(&keys::health_status(&self.component_name), &health, Some(ttl))
            .await
        {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_err, "failed to publish component health");
        }

        health
    }

    async fn execute(check: Arc<dyn HealthCheck>) -> HealthCheckResult {
        let start = Instant::now();
        let outcome = tokio::time::timeout(check.timeout(), check.check()).await;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        let mut result = match outcome {
            Ok(result) => result,
            Err(_) => HealthCheckResult::unhealthy(
                check.name(),
                format!("check timed out after {:?}", check.timeout()),
            ),
        };
        result.duration_ms = duration_ms;
        result
    }

    async fn dependency_statuses(&self) -> HashMap<String, HealthStatus> {
        let dependencies = self
            .graph
            .read()
            .unwrap()
            .dependencies_of(&self.component_name);

        let mut statuses = HashMap::new();
        for dependency in dependencies {
            let status = match self
                .store
                .get_json::<ComponentHealth>(&keys::health_status(&dependency))
                .await
            {
                Ok(Some(health)) => health.status,
                // Absent or unreadable published health reads as unknown.
                _ => HealthStatus::Unknown,
            };
            statuses.insert(dependency, status);
        }
        statuses
    }

    fn apply_dependency_policy(
        &self,
        own: HealthStatus,
        dependencies: &HashMap<String, HealthStatus>,
    ) -> HealthStatus {
        match self.config.dependency_policy {
            DependencyPolicy::Ignore => own,
            DependencyPolicy::DemoteToDegraded => {
                if dependencies
                    .values()
                    .any(|status| *status == HealthStatus::Unhealthy)
                {
                    own.worst(HealthStatus::Degraded)
                } else {
                    own
                }
            }
            DependencyPolicy::Inherit => dependencies
                .values()
                .fold(own, |acc, status| acc.worst(*status)),
        }
    }

    fn track_alerts(&self, result: &HealthCheckResult) {
        let mut counts = self.failure_counts.lock().unwrap();
        if result.is_unhealthy() {
            let count = counts.entry(result.name.clone()).or_insert(0);
            *count += 1;
            if *count == self.config.alert_threshold {
                let alert = HealthAlert {
                    component_name: self.component_name.clone(),
                    check_name: result.name.clone(),
                    message: format!("health check '{}' failing: {}", result.name, result.message),
                    failure_count: *count,
                    raised_at_ms: epoch_ms(),
                    resolved: false,
                    resolved_at_ms: None,
                };

                #[cfg(feature = "tracing")]
                tracing::error!(check = %result.name, "health alert raised");

                self.active_alerts
                    .lock()
                    .unwrap()
                    .insert(result.name.clone(), alert.clone());
                if let Some(hook) = &self.alert_hook {
                    hook(&alert);
                }
            }
        } else {
            counts.remove(&result.name);
            let resolved = self.active_alerts.lock().unwrap().remove(&result.name);
            if let Some(mut alert) = resolved {
                alert.resolved = true;
                alert.resolved_at_ms = Some(epoch_ms());

                #[cfg(feature = "tracing")]
                tracing::info!(check = %result.name, "health alert resolved");

                if let Some(hook) = &self.alert_hook {
                    hook(&alert);
                }
            }
        }
    }

    /// Start the background check loop.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let monitor = Arc::clone(self);
        *self.task.lock().unwrap() = Some(tokio::spawn(async move {
            while monitor.running.load(Ordering::SeqCst) {
                monitor.check_health().await;
                tokio::time::sleep(monitor.config.check_interval).await;
            }
        }));
    }

    /// Stop the background check loop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }
}
