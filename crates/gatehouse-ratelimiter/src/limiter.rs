use crate::adaptive::{AdaptiveController, DenialRateSampler, LoadSampler};
use crate::algorithms;
use crate::config::RateLimitConfig;
use crate::error::RateLimitError;
use crate::events::RateLimitEvent;
use crate::key::RateLimitKey;
use crate::state::{epoch_ms, AlgorithmState};
use gatehouse_core::SharedStore;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: SystemTime,
    /// Seconds until the caller should retry, present when denied.
    pub retry_after: Option<u64>,
}

impl RateLimitDecision {
    /// Normative HTTP headers for this decision.
    pub fn headers(&self) -> Vec<(String, String)> {
        let reset_epoch = self
            .reset_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let mut headers = vec![
            ("X-RateLimit-Limit".to_string(), self.limit.to_string()),
            ("X-RateLimit-Remaining".to_string(), self.remaining.to_string()),
            ("X-RateLimit-Reset".to_string(), reset_epoch.to_string()),
        ];
        if !self.allowed {
            if let Some(retry_after) = self.retry_after {
                headers.push(("Retry-After".to_string(), retry_after.to_string()));
            }
        }
        headers
    }
}

/// Aggregate counters across all keys.
#[derive(Debug, Default)]
pub(crate) struct StatsInner {
    pub(crate) total: u64,
    pub(crate) allowed: u64,
    pub(crate) denied: u64,
    pub(crate) keys: HashSet<String>,
}

/// Snapshot of limiter activity.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub denied_requests: u64,
    pub denial_rate: f64,
    pub unique_keys: usize,
}

/// Store-backed rate limiter.
///
/// Holds a default policy plus optional per-endpoint overrides. All mutable
/// per-key state lives in the shared store; the limiter itself only keeps
/// configuration, adaptive history, and counters.
pub struct RateLimiter {
    store: SharedStore,
    default_config: RateLimitConfig,
    endpoint_configs: RwLock<HashMap<String, RateLimitConfig>>,
    adaptive: Mutex<AdaptiveController>,
    load_sampler: Arc<dyn LoadSampler>,
    stats: Arc<Mutex<StatsInner>>,
}

impl RateLimiter {
    /// Build a limiter with the default load source (own denial rate).
    pub fn new(store: SharedStore, default_config: RateLimitConfig) -> Self {
        let stats = Arc::new(Mutex::new(StatsInner::default()));
        let sampler = DenialRateSampler {
            stats: Arc::clone(&stats),
        };
        Self::with_load_sampler(store, default_config, Arc::new(sampler), stats)
    }

    /// Build a limiter with a custom load source for adaptive adjustment.
    pub fn with_sampler(
        store: SharedStore,
        default_config: RateLimitConfig,
        sampler: Arc<dyn LoadSampler>,
    ) -> Self {
        let stats = Arc::new(Mutex::new(StatsInner::default()));
        Self::with_load_sampler(store, default_config, sampler, stats)
    }

    fn with_load_sampler(
        store: SharedStore,
        default_config: RateLimitConfig,
        load_sampler: Arc<dyn LoadSampler>,
        stats: Arc<Mutex<StatsInner>>,
    ) -> Self {
        Self {
            store,
            default_config,
            endpoint_configs: RwLock::new(HashMap::new()),
            adaptive: Mutex::new(AdaptiveController::new()),
            load_sampler,
            stats,
        }
    }

    /// Install a dedicated policy for one endpoint.
    pub fn configure_endpoint(&self, endpoint: impl Into<String>, config: RateLimitConfig) {
        self.endpoint_configs
            .write()
            .unwrap()
            .insert(endpoint.into(), config);
    }

    /// Check the budget for one request. Never fails: store errors allow
    /// the request and record a metric.
    pub async fn check(
        &self,
        user_id: Option<&str>,
        ip_address: Option<&str>,
        endpoint: Option<&str>,
    ) -> RateLimitDecision {
        let config = self.config_for(endpoint);
        let key = RateLimitKey::for_request(config.scope, user_id, ip_address, endpoint);
        self.check_key(&key, &config).await
    }

    /// Check a fully-specified key against a policy.
    pub async fn check_key(
        &self,
        key: &RateLimitKey,
        config: &RateLimitConfig,
    ) -> RateLimitDecision {
        let now_ms = epoch_ms();

        if config.whitelist.contains(&key.identifier) {
            let decision = RateLimitDecision {
                allowed: true,
                limit: u64::MAX,
                remaining: u64::MAX,
                reset_at: SystemTime::now(),
                retry_after: None,
            };
            self.record(key, &decision, config);
            return decision;
        }
        if config.blacklist.contains(&key.identifier) {
            let decision = RateLimitDecision {
                allowed: false,
                limit: 0,
                remaining: 0,
                reset_at: SystemTime::now() + Duration::from_secs(config.window_seconds),
                retry_after: Some(config.window_seconds),
            };
            self.record(key, &decision, config);
            return decision;
        }

        // Resolve the effective policy first; the adjusted config has
        // adaptation disabled so this never recurses.
        let effective = if config.adaptive_enabled {
            let load = self.load_sampler.sample();
            let adjusted = self
                .adaptive
                .lock()
                .unwrap()
                .record_and_adjust(config, load);
            config.with_limit(adjusted)
        } else {
            config.clone()
        };

        let limit = effective.limit_for(&key.identifier);
        let store_key = key.store_key();
        let state_ttl = Duration::from_secs(effective.window_seconds * 2);

        let mut check = None;
        let outcome = self
            .store
            .fetch_update(
                &store_key,
                Some(state_ttl),
                Box::new(|current| {
                    let state: Option<AlgorithmState> =
                        current.and_then(|raw| serde_json::from_slice(raw).ok());
                    let (result, next) = algorithms::evaluate(&effective, limit, state, now_ms);
                    let write = next
                        .as_ref()
                        .and_then(|state| serde_json::to_vec(state).ok());
                    check = Some(result);
                    write
                }),
            )
            .await;

        let decision = match (outcome, check) {
            (Ok(_), Some(check)) => RateLimitDecision {
                allowed: check.allowed,
                limit,
                remaining: check.remaining,
                reset_at: UNIX_EPOCH + Duration::from_millis(check.reset_at_ms),
                retry_after: check.retry_after_secs,
            },
            (Err(err), _) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(key = %key, error = %err, "rate limit store error, failing open");

                #[cfg(feature = "metrics")]
                metrics::counter!("ratelimit_store_errors_total").increment(1);

                config.event_listeners.emit(&RateLimitEvent::StoreErrorIgnored {
                    error: err.to_string(),
                    timestamp: Instant::now(),
                });

                RateLimitDecision {
                    allowed: true,
                    limit,
                    remaining: limit.saturating_sub(1),
                    reset_at: SystemTime::now() + Duration::from_secs(config.window_seconds),
                    retry_after: None,
                }
            }
            // The closure always runs when the store call succeeds.
            (Ok(_), None) => RateLimitDecision {
                allowed: true,
                limit,
                remaining: limit.saturating_sub(1),
                reset_at: SystemTime::now() + Duration::from_secs(config.window_seconds),
                retry_after: None,
            },
        };

        self.record(key, &decision, config);
        decision
    }

    /// Clear the budgets of one identifier across every scope and
    /// configured endpoint.
    pub async fn reset(&self, identifier: &str) -> Result<(), RateLimitError> {
        let mut endpoints: Vec<Option<String>> = self
            .endpoint_configs
            .read()
            .unwrap()
            .keys()
            .cloned()
            .map(Some)
            .collect();
        endpoints.push(None);

        let mut keys = Vec::new();
        for scope in crate::config::RateLimitScope::ALL {
            for endpoint in &endpoints {
                keys.push(RateLimitKey::new(scope, identifier, endpoint.as_deref()).store_key());
            }
        }
        self.store.delete(&keys).await?;
        Ok(())
    }

    /// Clear every budget and local counter.
    pub async fn reset_all(&self) -> Result<(), RateLimitError> {
        self.store.delete_pattern("ratelimit:*").await?;
        let mut stats = self.stats.lock().unwrap();
        *stats = StatsInner::default();
        Ok(())
    }

    /// Snapshot of limiter activity.
    pub fn stats(&self) -> RateLimiterStats {
        let stats = self.stats.lock().unwrap();
        let denial_rate = if stats.total == 0 {
            0.0
        } else {
            stats.denied as f64 / stats.total as f64
        };
        RateLimiterStats {
            total_requests: stats.total,
            allowed_requests: stats.allowed,
            denied_requests: stats.denied,
            denial_rate,
            unique_keys: stats.keys.len(),
        }
    }

    fn config_for(&self, endpoint: Option<&str>) -> RateLimitConfig {
        endpoint
            .and_then(|endpoint| self.endpoint_configs.read().unwrap().get(endpoint).cloned())
            .unwrap_or_else(|| self.default_config.clone())
    }

    fn record(&self, key: &RateLimitKey, decision: &RateLimitDecision, config: &RateLimitConfig) {
        {
            let mut stats = self.stats.lock().unwrap();
            stats.total += 1;
            if decision.allowed {
                stats.allowed += 1;
            } else {
                stats.denied += 1;
            }
            stats.keys.insert(key.to_string());
        }

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "ratelimit_checks_total",
            "scope" => key.scope.as_str(),
            "allowed" => if decision.allowed { "true" } else { "false" }
        )
        .increment(1);

        if decision.allowed {
            config.event_listeners.emit(&RateLimitEvent::CheckAllowed {
                key: key.to_string(),
                remaining: decision.remaining,
                timestamp: Instant::now(),
            });
        } else {
            config.event_listeners.emit(&RateLimitEvent::CheckDenied {
                key: key.to_string(),
                retry_after: decision.retry_after,
                timestamp: Instant::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait_stub::FailingStore;
    use gatehouse_core::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn limiter(config: RateLimitConfig) -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryStore::new()), config)
    }

    #[tokio::test]
    async fn allows_until_limit_then_denies() {
        let limiter = limiter(
            RateLimitConfig::builder()
                .requests_per_window(3)
                .window_seconds(60)
                .build(),
        );
        for _ in 0..3 {
            let decision = limiter.check(Some("u"), None, Some("/api")).await;
            assert!(decision.allowed);
        }
        let denied = limiter.check(Some("u"), None, Some("/api")).await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after.is_some());
    }

    #[tokio::test]
    async fn separate_identifiers_have_separate_budgets() {
        let limiter = limiter(
            RateLimitConfig::builder()
                .requests_per_window(1)
                .window_seconds(60)
                .build(),
        );
        assert!(limiter.check(Some("a"), None, None).await.allowed);
        assert!(!limiter.check(Some("a"), None, None).await.allowed);
        assert!(limiter.check(Some("b"), None, None).await.allowed);
    }

    #[tokio::test]
    async fn whitelist_bypasses_and_blacklist_blocks() {
        let limiter = limiter(
            RateLimitConfig::builder()
                .requests_per_window(1)
                .whitelist(["vip"])
                .blacklist(["banned"])
                .build(),
        );
        for _ in 0..5 {
            assert!(limiter.check(Some("vip"), None, None).await.allowed);
        }
        let blocked = limiter.check(Some("banned"), None, None).await;
        assert!(!blocked.allowed);
        assert_eq!(blocked.remaining, 0);
    }

    #[tokio::test]
    async fn denied_response_carries_headers() {
        let limiter = limiter(
            RateLimitConfig::builder()
                .requests_per_window(1)
                .window_seconds(60)
                .build(),
        );
        limiter.check(Some("u"), None, None).await;
        let denied = limiter.check(Some("u"), None, None).await;
        let headers = denied.headers();
        let names: Vec<&str> = headers.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "X-RateLimit-Limit",
                "X-RateLimit-Remaining",
                "X-RateLimit-Reset",
                "Retry-After"
            ]
        );
    }

    #[tokio::test]
    async fn endpoint_config_overrides_default() {
        let limiter = limiter(
            RateLimitConfig::builder()
                .requests_per_window(100)
                .build(),
        );
        limiter.configure_endpoint(
            "/narrow",
            RateLimitConfig::builder()
                .requests_per_window(1)
                .window_seconds(60)
                .build(),
        );
        assert!(limiter.check(Some("u"), None, Some("/narrow")).await.allowed);
        assert!(!limiter.check(Some("u"), None, Some("/narrow")).await.allowed);
        assert!(limiter.check(Some("u"), None, Some("/wide")).await.allowed);
    }

    #[tokio::test]
    async fn store_failure_fails_open() {
        let listener_hits = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&listener_hits);
        let config = RateLimitConfig::builder()
            .requests_per_window(1)
            .on_store_error(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
            .build();
        let limiter = RateLimiter::new(Arc::new(FailingStore), config);

        for _ in 0..3 {
            assert!(limiter.check(Some("u"), None, None).await.allowed);
        }
        assert_eq!(listener_hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn concurrent_checks_never_overspend() {
        let limiter = Arc::new(limiter(
            RateLimitConfig::builder()
                .requests_per_window(10)
                .window_seconds(60)
                .build(),
        ));

        let mut handles = Vec::new();
        for _ in 0..25 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.check(Some("u"), None, None).await.allowed
            }));
        }
        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
    }

    #[tokio::test]
    async fn reset_clears_a_budget() {
        let limiter = limiter(
            RateLimitConfig::builder()
                .requests_per_window(1)
                .window_seconds(60)
                .build(),
        );
        assert!(limiter.check(Some("u"), None, None).await.allowed);
        assert!(!limiter.check(Some("u"), None, None).await.allowed);

        limiter.reset("u").await.unwrap();
        assert!(limiter.check(Some("u"), None, None).await.allowed);
    }

    #[tokio::test]
    async fn stats_track_outcomes() {
        let limiter = limiter(
            RateLimitConfig::builder()
                .requests_per_window(1)
                .window_seconds(60)
                .build(),
        );
        limiter.check(Some("u"), None, None).await;
        limiter.check(Some("u"), None, None).await;

        let stats = limiter.stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.allowed_requests, 1);
        assert_eq!(stats.denied_requests, 1);
        assert!((stats.denial_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.unique_keys, 1);
    }

    #[tokio::test]
    async fn adaptive_tightens_under_synthetic_load() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let config = RateLimitConfig::builder()
            .requests_per_window(100)
            .window_seconds(60)
            .adaptive_enabled(true)
            .min_requests(2)
            .max_requests(200)
            .scale_factor(1.0)
            .build();
        // Constant heavy load: effective limit collapses toward the floor.
        let limiter = RateLimiter::with_sampler(store, config, Arc::new(|| 2.0));

        let mut allowed = 0;
        for _ in 0..50 {
            if limiter.check(Some("u"), None, None).await.allowed {
                allowed += 1;
            }
        }
        // adjustment clamps at 0.1 => effective limit 10.
        assert_eq!(allowed, 10);
    }

    mod async_trait_stub {
        use async_trait::async_trait;
        use gatehouse_core::{KvStore, MemoryInfo, StoreError};
        use std::collections::HashMap;
        use std::time::Duration;

        /// Store stub whose every operation fails.
        pub struct FailingStore;

        fn err() -> StoreError {
            StoreError::Connection("injected failure".to_string())
        }

        #[async_trait]
        impl KvStore for FailingStore {
            async fn get(&self, _: &str) -> Result<Option<Vec<u8>>, StoreError> {
                Err(err())
            }
            async fn set(&self, _: &str, _: &[u8], _: Option<Duration>) -> Result<(), StoreError> {
                Err(err())
            }
            async fn delete(&self, _: &[String]) -> Result<u64, StoreError> {
                Err(err())
            }
            async fn exists(&self, _: &str) -> Result<bool, StoreError> {
                Err(err())
            }
            async fn expire(&self, _: &str, _: Duration) -> Result<bool, StoreError> {
                Err(err())
            }
            async fn incr_by(
                &self,
                _: &str,
                _: i64,
                _: Option<Duration>,
            ) -> Result<i64, StoreError> {
                Err(err())
            }
            async fn zadd(&self, _: &str, _: &str, _: f64) -> Result<(), StoreError> {
                Err(err())
            }
            async fn zrange_by_score(
                &self,
                _: &str,
                _: f64,
                _: f64,
                _: Option<usize>,
            ) -> Result<Vec<String>, StoreError> {
                Err(err())
            }
            async fn zrange(&self, _: &str, _: i64, _: i64) -> Result<Vec<String>, StoreError> {
                Err(err())
            }
            async fn zrem(&self, _: &str, _: &str) -> Result<bool, StoreError> {
                Err(err())
            }
            async fn zcard(&self, _: &str) -> Result<u64, StoreError> {
                Err(err())
            }
            async fn sadd(&self, _: &str, _: &str) -> Result<bool, StoreError> {
                Err(err())
            }
            async fn srem(&self, _: &str, _: &str) -> Result<bool, StoreError> {
                Err(err())
            }
            async fn smembers(&self, _: &str) -> Result<Vec<String>, StoreError> {
                Err(err())
            }
            async fn scard(&self, _: &str) -> Result<u64, StoreError> {
                Err(err())
            }
            async fn hset_all(
                &self,
                _: &str,
                _: &[(String, String)],
                _: Option<Duration>,
            ) -> Result<(), StoreError> {
                Err(err())
            }
            async fn hget_all(&self, _: &str) -> Result<HashMap<String, String>, StoreError> {
                Err(err())
            }
            async fn scan_keys(&self, _: &str) -> Result<Vec<String>, StoreError> {
                Err(err())
            }
            async fn delete_pattern(&self, _: &str) -> Result<u64, StoreError> {
                Err(err())
            }
            async fn fetch_update(
                &self,
                _: &str,
                _: Option<Duration>,
                _: gatehouse_core::store::UpdateFn<'_>,
            ) -> Result<Option<Vec<u8>>, StoreError> {
                Err(err())
            }
            async fn ping(&self) -> Result<Duration, StoreError> {
                Err(err())
            }
            async fn memory_info(&self) -> Result<Option<MemoryInfo>, StoreError> {
                Err(err())
            }
        }
    }
}
