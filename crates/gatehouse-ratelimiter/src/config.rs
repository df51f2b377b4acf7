use crate::events::RateLimitEvent;
use gatehouse_core::{EventListeners, FnListener};
use std::collections::{HashMap, HashSet};

/// Rate limiting algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitAlgorithm {
    /// Exact sliding window over a timestamp log.
    SlidingWindow,
    /// Token bucket: bursts up to capacity, steady refill.
    TokenBucket,
    /// Leaky bucket: smooths bursts into a constant outflow.
    LeakyBucket,
    /// Wraps the base algorithm and scales the limit with observed load.
    Adaptive,
}

impl RateLimitAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitAlgorithm::SlidingWindow => "sliding_window",
            RateLimitAlgorithm::TokenBucket => "token_bucket",
            RateLimitAlgorithm::LeakyBucket => "leaky_bucket",
            RateLimitAlgorithm::Adaptive => "adaptive",
        }
    }
}

/// Rate limit scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitScope {
    Global,
    User,
    Ip,
    Endpoint,
    /// user + ip, identifier `{user|anonymous}:{ip|unknown}`.
    Combined,
}

impl RateLimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitScope::Global => "global",
            RateLimitScope::User => "user",
            RateLimitScope::Ip => "ip",
            RateLimitScope::Endpoint => "endpoint",
            RateLimitScope::Combined => "combined",
        }
    }

    pub const ALL: [RateLimitScope; 5] = [
        RateLimitScope::Global,
        RateLimitScope::User,
        RateLimitScope::Ip,
        RateLimitScope::Endpoint,
        RateLimitScope::Combined,
    ];
}

/// Configuration for one rate-limit policy (default or per endpoint).
#[derive(Clone)]
pub struct RateLimitConfig {
    pub(crate) requests_per_window: u64,
    pub(crate) window_seconds: u64,
    pub(crate) algorithm: RateLimitAlgorithm,
    pub(crate) scope: RateLimitScope,
    pub(crate) burst_size: Option<u64>,
    pub(crate) refill_rate: Option<f64>,
    pub(crate) adaptive_enabled: bool,
    pub(crate) min_requests: u64,
    pub(crate) max_requests: u64,
    pub(crate) scale_factor: f64,
    pub(crate) whitelist: HashSet<String>,
    pub(crate) blacklist: HashSet<String>,
    pub(crate) custom_limits: HashMap<String, u64>,
    pub(crate) event_listeners: EventListeners<RateLimitEvent>,
}

impl RateLimitConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder::new()
    }

    /// Effective burst capacity: explicit `burst_size` or the window limit.
    pub(crate) fn burst(&self) -> u64 {
        self.burst_size.unwrap_or(self.requests_per_window)
    }

    /// Effective refill/leak rate in units per second.
    pub(crate) fn rate_per_second(&self) -> f64 {
        self.refill_rate
            .unwrap_or(self.requests_per_window as f64 / self.window_seconds as f64)
    }

    /// Limit for a specific identifier, honoring custom overrides.
    /// Whitelist and blacklist short-circuit before this is consulted.
    pub(crate) fn limit_for(&self, identifier: &str) -> u64 {
        self.custom_limits
            .get(identifier)
            .copied()
            .unwrap_or(self.requests_per_window)
    }

    /// Copy of this config with an adjusted limit and adaptation disabled,
    /// so an adjusted check can never recurse into adjustment again.
    pub(crate) fn with_limit(&self, limit: u64) -> Self {
        let mut adjusted = self.clone();
        adjusted.requests_per_window = limit;
        adjusted.adaptive_enabled = false;
        adjusted
    }
}

/// Builder for [`RateLimitConfig`].
pub struct RateLimitConfigBuilder {
    requests_per_window: u64,
    window_seconds: u64,
    algorithm: RateLimitAlgorithm,
    scope: RateLimitScope,
    burst_size: Option<u64>,
    refill_rate: Option<f64>,
    adaptive_enabled: bool,
    min_requests: u64,
    max_requests: u64,
    scale_factor: f64,
    whitelist: HashSet<String>,
    blacklist: HashSet<String>,
    custom_limits: HashMap<String, u64>,
    event_listeners: EventListeners<RateLimitEvent>,
}

impl RateLimitConfigBuilder {
    pub fn new() -> Self {
        Self {
            requests_per_window: 100,
            window_seconds: 60,
            algorithm: RateLimitAlgorithm::SlidingWindow,
            scope: RateLimitScope::User,
            burst_size: None,
            refill_rate: None,
            adaptive_enabled: false,
            min_requests: 10,
            max_requests: 1000,
            scale_factor: 1.5,
            whitelist: HashSet::new(),
            blacklist: HashSet::new(),
            custom_limits: HashMap::new(),
            event_listeners: EventListeners::new(),
        }
    }

    /// Requests allowed per window.
    ///
    /// Default: 100
    pub fn requests_per_window(mut self, n: u64) -> Self {
        self.requests_per_window = n;
        self
    }

    /// Window length in seconds.
    ///
    /// Default: 60
    pub fn window_seconds(mut self, seconds: u64) -> Self {
        self.window_seconds = seconds;
        self
    }

    /// Algorithm used for the check.
    ///
    /// Default: SlidingWindow
    pub fn algorithm(mut self, algorithm: RateLimitAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Key scope.
    ///
    /// Default: User
    pub fn scope(mut self, scope: RateLimitScope) -> Self {
        self.scope = scope;
        self
    }

    /// Bucket capacity for token/leaky bucket.
    ///
    /// Default: same as `requests_per_window`
    pub fn burst_size(mut self, n: u64) -> Self {
        self.burst_size = Some(n);
        self
    }

    /// Refill (token bucket) or leak (leaky bucket) rate in units/second.
    ///
    /// Default: `requests_per_window / window_seconds`
    pub fn refill_rate(mut self, rate: f64) -> Self {
        self.refill_rate = Some(rate);
        self
    }

    /// Enable load-adaptive limit adjustment.
    ///
    /// Default: false
    pub fn adaptive_enabled(mut self, enabled: bool) -> Self {
        self.adaptive_enabled = enabled;
        self
    }

    /// Floor for the adaptively adjusted limit.
    ///
    /// Default: 10
    pub fn min_requests(mut self, n: u64) -> Self {
        self.min_requests = n;
        self
    }

    /// Ceiling for the adaptively adjusted limit.
    ///
    /// Default: 1000
    pub fn max_requests(mut self, n: u64) -> Self {
        self.max_requests = n;
        self
    }

    /// How aggressively the adaptive controller reacts to load.
    ///
    /// Default: 1.5
    pub fn scale_factor(mut self, factor: f64) -> Self {
        self.scale_factor = factor;
        self
    }

    /// Identifiers that bypass the limiter entirely.
    pub fn whitelist<I, S>(mut self, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.whitelist = identifiers.into_iter().map(Into::into).collect();
        self
    }

    /// Identifiers that are always denied.
    pub fn blacklist<I, S>(mut self, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blacklist = identifiers.into_iter().map(Into::into).collect();
        self
    }

    /// Per-identifier limit override.
    pub fn custom_limit<S: Into<String>>(mut self, identifier: S, limit: u64) -> Self {
        self.custom_limits.insert(identifier.into(), limit);
        self
    }

    /// Register a callback for denied checks.
    pub fn on_denied<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, Option<u64>) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &RateLimitEvent| {
                if let RateLimitEvent::CheckDenied {
                    key, retry_after, ..
                } = event
                {
                    f(key, *retry_after);
                }
            }));
        self
    }

    /// Register a callback for allowed checks.
    pub fn on_allowed<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, u64) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &RateLimitEvent| {
                if let RateLimitEvent::CheckAllowed { key, remaining, .. } = event {
                    f(key, *remaining);
                }
            }));
        self
    }

    /// Register a callback for ignored (fail-open) store errors.
    pub fn on_store_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &RateLimitEvent| {
                if let RateLimitEvent::StoreErrorIgnored { error, .. } = event {
                    f(error);
                }
            }));
        self
    }

    /// Apply `GATEHOUSE_RATELIMIT_*` environment overrides:
    /// `REQUESTS_PER_WINDOW`, `WINDOW_SECONDS`, `ALGORITHM`, `BURST_SIZE`,
    /// `REFILL_RATE`, `ADAPTIVE_ENABLED`, `MIN_REQUESTS`, `MAX_REQUESTS`,
    /// `SCALE_FACTOR`.
    pub fn from_env(mut self) -> Self {
        if let Some(n) = env_parse("GATEHOUSE_RATELIMIT_REQUESTS_PER_WINDOW") {
            self.requests_per_window = n;
        }
        if let Some(n) = env_parse("GATEHOUSE_RATELIMIT_WINDOW_SECONDS") {
            self.window_seconds = n;
        }
        if let Ok(algorithm) = std::env::var("GATEHOUSE_RATELIMIT_ALGORITHM") {
            self.algorithm = match algorithm.as_str() {
                "sliding_window" => RateLimitAlgorithm::SlidingWindow,
                "token_bucket" => RateLimitAlgorithm::TokenBucket,
                "leaky_bucket" => RateLimitAlgorithm::LeakyBucket,
                "adaptive" => RateLimitAlgorithm::Adaptive,
                other => panic!("unknown GATEHOUSE_RATELIMIT_ALGORITHM: {other}"),
            };
        }
        if let Some(n) = env_parse("GATEHOUSE_RATELIMIT_BURST_SIZE") {
            self.burst_size = Some(n);
        }
        if let Some(rate) = env_parse("GATEHOUSE_RATELIMIT_REFILL_RATE") {
            self.refill_rate = Some(rate);
        }
        if let Some(enabled) = env_parse("GATEHOUSE_RATELIMIT_ADAPTIVE_ENABLED") {
            self.adaptive_enabled = enabled;
        }
        if let Some(n) = env_parse("GATEHOUSE_RATELIMIT_MIN_REQUESTS") {
            self.min_requests = n;
        }
        if let Some(n) = env_parse("GATEHOUSE_RATELIMIT_MAX_REQUESTS") {
            self.max_requests = n;
        }
        if let Some(factor) = env_parse("GATEHOUSE_RATELIMIT_SCALE_FACTOR") {
            self.scale_factor = factor;
        }
        self
    }

    /// Validates and builds the configuration.
    ///
    /// Panics on nonsense values; configuration errors are startup-time
    /// failures.
    pub fn build(self) -> RateLimitConfig {
        if self.requests_per_window == 0 {
            panic!("requests_per_window must be at least 1");
        }
        if self.window_seconds == 0 {
            panic!("window_seconds must be at least 1");
        }
        if self.burst_size == Some(0) {
            panic!("burst_size must be at least 1 when set");
        }
        if let Some(rate) = self.refill_rate {
            if rate <= 0.0 || !rate.is_finite() {
                panic!("refill_rate must be a positive finite number");
            }
        }
        if self.min_requests > self.max_requests {
            panic!("min_requests must not exceed max_requests");
        }
        if self.scale_factor <= 0.0 || !self.scale_factor.is_finite() {
            panic!("scale_factor must be a positive finite number");
        }

        RateLimitConfig {
            requests_per_window: self.requests_per_window,
            window_seconds: self.window_seconds,
            algorithm: self.algorithm,
            scope: self.scope,
            burst_size: self.burst_size,
            refill_rate: self.refill_rate,
            adaptive_enabled: self.adaptive_enabled,
            min_requests: self.min_requests,
            max_requests: self.max_requests,
            scale_factor: self.scale_factor,
            whitelist: self.whitelist,
            blacklist: self.blacklist,
            custom_limits: self.custom_limits,
            event_listeners: self.event_listeners,
        }
    }
}

impl Default for RateLimitConfigBuilder {
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
