use std::time::Duration;

/// Retry strategies for failed messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// `delay = min(max_delay, initial_delay * multiplier^retry_count)`
    ExponentialBackoff,
    /// `delay = min(max_delay, initial_delay * (retry_count + 1))`
    LinearBackoff,
    /// `delay = initial_delay`
    FixedDelay,
    /// `delay = 0`
    Immediate,
}

impl RetryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryStrategy::ExponentialBackoff => "exponential_backoff",
            RetryStrategy::LinearBackoff => "linear_backoff",
            RetryStrategy::FixedDelay => "fixed_delay",
            RetryStrategy::Immediate => "immediate",
        }
    }
}

/// Retry and lifecycle configuration for one dead-letter queue.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub(crate) max_retries: u32,
    pub(crate) initial_delay: Duration,
    pub(crate) max_delay: Duration,
    pub(crate) backoff_multiplier: f64,
    pub(crate) strategy: RetryStrategy,
    pub(crate) poison_threshold: u32,
    pub(crate) ttl: Duration,
    pub(crate) batch_size: usize,
    pub(crate) batch_timeout: Duration,
    pub(crate) cleanup_interval: Duration,
    pub(crate) dedup_window: Duration,
}

impl RetryConfig {
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Delay before the attempt following `retry_count` failures.
    pub(crate) fn delay_for(&self, retry_count: u32) -> Duration {
        match self.strategy {
            RetryStrategy::ExponentialBackoff => {
                let scaled =
                    self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(retry_count as i32);
                Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
            }
            RetryStrategy::LinearBackoff => {
                let scaled = self.initial_delay.as_secs_f64() * (retry_count as f64 + 1.0);
                Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
            }
            RetryStrategy::FixedDelay => self.initial_delay,
            RetryStrategy::Immediate => Duration::ZERO,
        }
    }
}

/// Builder for [`RetryConfig`].
pub struct RetryConfigBuilder {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    strategy: RetryStrategy,
    poison_threshold: u32,
    ttl: Duration,
    batch_size: usize,
    batch_timeout: Duration,
    cleanup_interval: Duration,
    dedup_window: Duration,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(3600),
            backoff_multiplier: 2.0,
            strategy: RetryStrategy::ExponentialBackoff,
            poison_threshold: 5,
            ttl: Duration::from_secs(86_400),
            batch_size: 10,
            batch_timeout: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(300),
            dedup_window: Duration::from_secs(3600),
        }
    }

    /// Retries before a message stops being scheduled.
    ///
    /// Default: 3
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Base delay for the backoff formulas.
    ///
    /// Default: 60 seconds
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Ceiling for computed delays.
    ///
    /// Default: 1 hour
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Exponential backoff multiplier.
    ///
    /// Default: 2.0
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay strategy.
    ///
    /// Default: ExponentialBackoff
    pub fn strategy(mut self, strategy: RetryStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Failure count at which a message is quarantined.
    ///
    /// Default: 5
    pub fn poison_threshold(mut self, n: u32) -> Self {
        self.poison_threshold = n;
        self
    }

    /// Message time-to-live; overdue messages are marked expired and
    /// deleted after twice this.
    ///
    /// Default: 24 hours
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Messages pulled per retry batch.
    ///
    /// Default: 10
    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    /// Pause between retry batches.
    ///
    /// Default: 30 seconds
    pub fn batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    /// Pause between cleanup sweeps.
    ///
    /// Default: 5 minutes
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Horizon within which equal payloads are rejected as duplicates.
    ///
    /// Default: 1 hour
    pub fn dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    /// Apply `GATEHOUSE_DLQ_*` environment overrides: `MAX_RETRIES`,
    /// `INITIAL_DELAY_SECONDS`, `MAX_DELAY_SECONDS`, `BACKOFF_MULTIPLIER`,
    /// `POISON_THRESHOLD`, `TTL_SECONDS`, `BATCH_SIZE`,
    /// `BATCH_TIMEOUT_SECONDS`.
    pub fn from_env(mut self) -> Self {
        if let Some(n) = env_parse("GATEHOUSE_DLQ_MAX_RETRIES") {
            self.max_retries = n;
        }
        if let Some(secs) = env_parse::<u64>("GATEHOUSE_DLQ_INITIAL_DELAY_SECONDS") {
            self.initial_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("GATEHOUSE_DLQ_MAX_DELAY_SECONDS") {
            self.max_delay = Duration::from_secs(secs);
        }
        if let Some(multiplier) = env_parse("GATEHOUSE_DLQ_BACKOFF_MULTIPLIER") {
            self.backoff_multiplier = multiplier;
        }
        if let Some(n) = env_parse("GATEHOUSE_DLQ_POISON_THRESHOLD") {
            self.poison_threshold = n;
        }
        if let Some(secs) = env_parse::<u64>("GATEHOUSE_DLQ_TTL_SECONDS") {
            self.ttl = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse("GATEHOUSE_DLQ_BATCH_SIZE") {
            self.batch_size = n;
        }
        if let Some(secs) = env_parse::<u64>("GATEHOUSE_DLQ_BATCH_TIMEOUT_SECONDS") {
            self.batch_timeout = Duration::from_secs(secs);
        }
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> RetryConfig {
        if self.batch_size == 0 {
            panic!("batch_size must be at least 1");
        }
        if self.backoff_multiplier < 1.0 || !self.backoff_multiplier.is_finite() {
            panic!("backoff_multiplier must be a finite number >= 1");
        }
        if self.max_delay < self.initial_delay {
            panic!("max_delay must not be below initial_delay");
        }
        if self.poison_threshold == 0 {
            panic!("poison_threshold must be at least 1");
        }

        RetryConfig {
            max_retries: self.max_retries,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            backoff_multiplier: self.backoff_multiplier,
            strategy: self.strategy,
            poison_threshold: self.poison_threshold,
            ttl: self.ttl,
            batch_size: self.batch_size,
            batch_timeout: self.batch_timeout,
            cleanup_interval: self.cleanup_interval,
            dedup_window: self.dedup_window,
        }
    }
}

impl Default for RetryConfigBuilder {
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
    fn exponential_delays_double_and_cap() {
        let config = RetryConfig::builder()
            .initial_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(60))
            .backoff_multiplier(2.0)
            .build();
        let delays: Vec<u64> = (0..4).map(|n| config.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8]);
        assert_eq!(config.delay_for(10), Duration::from_secs(60));
    }

    #[test]
    fn linear_and_fixed_and_immediate() {
        let linear = RetryConfig::builder()
            .strategy(RetryStrategy::LinearBackoff)
            .initial_delay(Duration::from_secs(10))
            .build();
        assert_eq!(linear.delay_for(0), Duration::from_secs(10));
        assert_eq!(linear.delay_for(2), Duration::from_secs(30));

        let fixed = RetryConfig::builder()
            .strategy(RetryStrategy::FixedDelay)
            .initial_delay(Duration::from_secs(10))
            .build();
        assert_eq!(fixed.delay_for(9), Duration::from_secs(10));

        let immediate = RetryConfig::builder()
            .strategy(RetryStrategy::Immediate)
            .build();
        assert_eq!(immediate.delay_for(5), Duration::ZERO);
    }

    #[test]
    #[should_panic(expected = "backoff_multiplier")]
    fn sub_unit_multiplier_is_rejected() {
        RetryConfig::builder().backoff_multiplier(0.5).build();
    }
}
