use std::time::Duration;

/// On-wire encoding for cached values. The configured format is
/// authoritative on write; decode additionally tolerates entries written
/// under the other format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationFormat {
    /// JSON.
    Json,
    /// MessagePack.
    Binary,
}

/// Configuration for one cache namespace.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub(crate) namespace: String,
    pub(crate) local_cache_size: usize,
    pub(crate) local_ttl: Duration,
    pub(crate) distributed_ttl: Duration,
    pub(crate) persistence_ttl: Duration,
    pub(crate) compression_enabled: bool,
    pub(crate) compression_threshold: usize,
    pub(crate) serialization_format: SerializationFormat,
}

impl CacheConfig {
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::new()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

/// Builder for [`CacheConfig`].
pub struct CacheConfigBuilder {
    namespace: String,
    local_cache_size: usize,
    local_ttl: Duration,
    distributed_ttl: Duration,
    persistence_ttl: Duration,
    compression_enabled: bool,
    compression_threshold: usize,
    serialization_format: SerializationFormat,
}

impl CacheConfigBuilder {
    pub fn new() -> Self {
        Self {
            namespace: "cache".to_string(),
            local_cache_size: 1000,
            local_ttl: Duration::from_secs(300),
            distributed_ttl: Duration::from_secs(1800),
            persistence_ttl: Duration::from_secs(86_400),
            compression_enabled: true,
            compression_threshold: 1024,
            serialization_format: SerializationFormat::Json,
        }
    }

    /// Key namespace prefix.
    ///
    /// Default: "cache"
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Bounded entry count for the in-process tier.
    ///
    /// Default: 1000
    pub fn local_cache_size(mut self, size: usize) -> Self {
        self.local_cache_size = size;
        self
    }

    /// TTL in the in-process tier.
    ///
    /// Default: 5 minutes
    pub fn local_ttl(mut self, ttl: Duration) -> Self {
        self.local_ttl = ttl;
        self
    }

    /// TTL in the distributed tier.
    ///
    /// Default: 30 minutes
    pub fn distributed_ttl(mut self, ttl: Duration) -> Self {
        self.distributed_ttl = ttl;
        self
    }

    /// TTL in the durable tier.
    ///
    /// Default: 24 hours
    pub fn persistence_ttl(mut self, ttl: Duration) -> Self {
        self.persistence_ttl = ttl;
        self
    }

    /// Gzip payloads above the threshold.
    ///
    /// Default: true
    pub fn compression_enabled(mut self, enabled: bool) -> Self {
        self.compression_enabled = enabled;
        self
    }

    /// Serialized size beyond which compression is attempted.
    ///
    /// Default: 1 KiB
    pub fn compression_threshold(mut self, bytes: usize) -> Self {
        self.compression_threshold = bytes;
        self
    }

    /// On-wire encoding.
    ///
    /// Default: Json
    pub fn serialization_format(mut self, format: SerializationFormat) -> Self {
        self.serialization_format = format;
        self
    }

    /// Apply `GATEHOUSE_CACHE_*` environment overrides: `NAMESPACE`,
    /// `LOCAL_CACHE_SIZE`, `LOCAL_TTL_SECONDS`, `DISTRIBUTED_TTL_SECONDS`,
    /// `PERSISTENCE_TTL_SECONDS`, `COMPRESSION_ENABLED`,
    /// `COMPRESSION_THRESHOLD`, `SERIALIZATION_FORMAT` (json|binary).
    pub fn from_env(mut self) -> Self {
        if let Ok(namespace) = std::env::var("GATEHOUSE_CACHE_NAMESPACE") {
            self.namespace = namespace;
        }
        if let Some(size) = env_parse("GATEHOUSE_CACHE_LOCAL_CACHE_SIZE") {
            self.local_cache_size = size;
        }
        if let Some(secs) = env_parse::<u64>("GATEHOUSE_CACHE_LOCAL_TTL_SECONDS") {
            self.local_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("GATEHOUSE_CACHE_DISTRIBUTED_TTL_SECONDS") {
            self.distributed_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("GATEHOUSE_CACHE_PERSISTENCE_TTL_SECONDS") {
            self.persistence_ttl = Duration::from_secs(secs);
        }
        if let Some(enabled) = env_parse("GATEHOUSE_CACHE_COMPRESSION_ENABLED") {
            self.compression_enabled = enabled;
        }
        if let Some(bytes) = env_parse("GATEHOUSE_CACHE_COMPRESSION_THRESHOLD") {
            self.compression_threshold = bytes;
        }
        if let Ok(format) = std::env::var("GATEHOUSE_CACHE_SERIALIZATION_FORMAT") {
            self.serialization_format = match format.as_str() {
                "json" => SerializationFormat::Json,
                "binary" => SerializationFormat::Binary,
                other => panic!("unknown GATEHOUSE_CACHE_SERIALIZATION_FORMAT: {other}"),
            };
        }
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> CacheConfig {
        if self.namespace.is_empty() {
            panic!("namespace must not be empty");
        }
        if self.local_cache_size == 0 {
            panic!("local_cache_size must be at least 1");
        }

        CacheConfig {
            namespace: self.namespace,
            local_cache_size: self.local_cache_size,
            local_ttl: self.local_ttl,
            distributed_ttl: self.distributed_ttl,
            persistence_ttl: self.persistence_ttl,
            compression_enabled: self.compression_enabled,
            compression_threshold: self.compression_threshold,
            serialization_format: self.serialization_format,
        }
    }
}

impl Default for CacheConfigBuilder {
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
