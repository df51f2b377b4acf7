use crate::codec;
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::local::LocalCache;
use gatehouse_core::{keys, SharedStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Keys longer than this are replaced by a digest.
const MAX_KEY_BYTES: usize = 200;

#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TierCounters {
    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TierStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        TierStats {
            hits,
            misses,
            hit_ratio: if hits + misses == 0 {
                0.0
            } else {
                hits as f64 / (hits + misses) as f64
            },
        }
    }
}

/// Hit/miss snapshot for one tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
}

/// Snapshot of cache activity.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub local: TierStats,
    pub distributed: TierStats,
    pub persistent: TierStats,
    pub local_entries: usize,
    pub evictions: u64,
    pub errors: u64,
}

/// The tiered cache.
///
/// `store` is the distributed tier; `persistent` (optional) is the durable
/// tier, addressed through the same store abstraction with its own handle
/// and TTL.
pub struct TieredCache {
    config: CacheConfig,
    local: LocalCache,
    store: SharedStore,
    persistent: Option<SharedStore>,
    local_stats: TierCounters,
    distributed_stats: TierCounters,
    persistent_stats: TierCounters,
    errors: AtomicU64,
}

impl TieredCache {
    pub fn new(store: SharedStore, config: CacheConfig) -> Self {
        Self {
            local: LocalCache::new(config.local_cache_size, config.local_ttl),
            store,
            persistent: None,
            local_stats: TierCounters::default(),
            distributed_stats: TierCounters::default(),
            persistent_stats: TierCounters::default(),
            errors: AtomicU64::new(0),
            config,
        }
    }

    /// Enable the durable tier.
    pub fn with_persistent(mut self, persistent: SharedStore) -> Self {
        self.persistent = Some(persistent);
        self
    }

    /// Read through the tiers: local, then distributed, then persistent.
    /// Hits repopulate every tier above the one that answered.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let storage_key = self.storage_key(key);

        if let Some(raw) = self.local.get(&storage_key) {
            self.local_stats.hit();
            self.record_op("hit", "local");
            return self.decode(&raw);
        }
        self.local_stats.miss();
        self.record_op("miss", "local");

        match self.store.get(&storage_key).await {
            Ok(Some(raw)) => {
                self.distributed_stats.hit();
                self.record_op("hit", "distributed");
                self.local.insert(&storage_key, raw.clone());
                return self.decode(&raw);
            }
            Ok(None) => {
                self.distributed_stats.miss();
                self.record_op("miss", "distributed");
            }
            Err(err) => self.tier_error("distributed", &err),
        }

        let persistent = self.persistent.as_ref()?;
        match persistent.get(&storage_key).await {
            Ok(Some(raw)) => {
                self.persistent_stats.hit();
                self.record_op("hit", "persistent");
                // Repopulate the upper tiers.
                if let Err(err) = self
                    .store
                    .set(&storage_key, &raw, Some(self.config.distributed_ttl))
                    .await
                {
                    self.tier_error("distributed", &err);
                }
                self.local.insert(&storage_key, raw.clone());
                self.decode(&raw)
            }
            Ok(None) => {
                self.persistent_stats.miss();
                self.record_op("miss", "persistent");
                None
            }
            Err(err) => {
                self.tier_error("persistent", &err);
                None
            }
        }
    }

    /// Write through every enabled tier. A tier failure is logged and
    /// counted but does not abort the others; returns whether all tiers
    /// took the write.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        self.set_with_tags(key, value, ttl, &[]).await
    }

    /// Write with dependency tags. Each tag maintains a reverse index used
    /// by [`TieredCache::invalidate_tag`].
    pub async fn set_with_tags<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        tags: &[&str],
    ) -> bool {
        let storage_key = self.storage_key(key);
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(err) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "tracing")]
                tracing::warn!(key, error = %err, "cache value not serializable");
                #[cfg(not(feature = "tracing"))]
                let _ = err;
                return false;
            }
        };
        let encoded = match codec::encode(&value, &self.config) {
            Ok(encoded) => encoded,
            Err(err) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "tracing")]
                tracing::warn!(key, error = %err, "cache encode failed");
                #[cfg(not(feature = "tracing"))]
                let _ = err;
                return false;
            }
        };

        let mut complete = true;

        self.local.insert(&storage_key, encoded.clone());
        self.record_op("set", "local");

        let distributed_ttl = ttl.unwrap_or(self.config.distributed_ttl);
        if let Err(err) = self
            .store
            .set(&storage_key, &encoded, Some(distributed_ttl))
            .await
        {
            self.tier_error("distributed", &err);
            complete = false;
        } else {
            self.record_op("set", "distributed");
        }

        if let Some(persistent) = &self.persistent {
            let persistent_ttl = ttl.unwrap_or(self.config.persistence_ttl);
            if let Err(err) = persistent
                .set(&storage_key, &encoded, Some(persistent_ttl))
                .await
            {
                self.tier_error("persistent", &err);
                complete = false;
            } else {
                self.record_op("set", "persistent");
            }
        }

        for tag in tags {
            let tag_key = keys::cache_tag(&self.config.namespace, tag);
            if let Err(err) = self.store.sadd(&tag_key, &storage_key).await {
                self.tier_error("distributed", &err);
                complete = false;
            }
        }

        complete
    }

    /// Remove one key from every tier.
    pub async fn delete(&self, key: &str) -> bool {
        let storage_key = self.storage_key(key);
        let mut complete = true;

        self.local.remove(&storage_key);

        if let Err(err) = self.store.delete(&[storage_key.clone()]).await {
            self.tier_error("distributed", &err);
            complete = false;
        }
        if let Some(persistent) = &self.persistent {
            if let Err(err) = persistent.delete(&[storage_key]).await {
                self.tier_error("persistent", &err);
                complete = false;
            }
        }
        complete
    }

    /// Remove every key containing `fragment` from every tier. Returns how
    /// many keys were dropped from the distributed tier.
    pub async fn delete_pattern(&self, fragment: &str) -> Result<u64, CacheError> {
        let removed_local = self.local.remove_matching(fragment);

        let pattern = format!("cache:{}:*{}*", self.config.namespace, fragment);
        let mut removed = self.store.delete_pattern(&pattern).await?;
        if let Some(persistent) = &self.persistent {
            persistent.delete_pattern(&pattern).await?;
        }

        removed = removed.max(removed_local);

        #[cfg(feature = "tracing")]
        tracing::info!(fragment, removed, "cache pattern invalidation");

        Ok(removed)
    }

    /// Remove every key registered under a dependency tag.
    pub async fn invalidate_tag(&self, tag: &str) -> Result<u64, CacheError> {
        let tag_key = keys::cache_tag(&self.config.namespace, tag);
        let dependents = self.store.smembers(&tag_key).await?;

        for storage_key in &dependents {
            self.local.remove(storage_key);
        }
        let removed = self.store.delete(&dependents).await?;
        if let Some(persistent) = &self.persistent {
            persistent.delete(&dependents).await?;
        }
        self.store.delete(&[tag_key]).await?;

        Ok(removed)
    }

    /// Drop the whole namespace from every tier.
    pub async fn clear(&self) -> Result<(), CacheError> {
        self.local.clear();
        let pattern = format!("cache:{}:*", self.config.namespace);
        self.store.delete_pattern(&pattern).await?;
        if let Some(persistent) = &self.persistent {
            persistent.delete_pattern(&pattern).await?;
        }
        Ok(())
    }

    /// Activity snapshot.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            local: self.local_stats.snapshot(),
            distributed: self.distributed_stats.snapshot(),
            persistent: self.persistent_stats.snapshot(),
            local_entries: self.local.len(),
            evictions: self.local.evictions(),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn decode<T: DeserializeOwned>(&self, raw: &[u8]) -> Option<T> {
        let value: Value = match codec::decode(raw, &self.config) {
            Ok(value) => value,
            Err(err) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %err, "cache decode failed");
                #[cfg(not(feature = "tracing"))]
                let _ = err;
                return None;
            }
        };
        serde_json::from_value(value).ok()
    }

    fn storage_key(&self, key: &str) -> String {
        if key.len() > MAX_KEY_BYTES {
            let digest = Sha256::digest(key.as_bytes());
            keys::cache_entry(&self.config.namespace, &hex::encode(digest)[..16])
        } else {
            keys::cache_entry(&self.config.namespace, key)
        }
    }

    fn tier_error(&self, tier: &'static str, err: &gatehouse_core::StoreError) {
        self.errors.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "tracing")]
        tracing::warn!(tier, error = %err, "cache tier error");
        #[cfg(not(feature = "tracing"))]
        let _ = err;

        #[cfg(feature = "metrics")]
        metrics::counter!("cache_operations_total", "operation" => "error", "tier" => tier)
            .increment(1);
    }

    fn record_op(&self, _operation: &'static str, _tier: &'static str) {
        #[cfg(feature = "metrics")]
        metrics::counter!("cache_operations_total", "operation" => _operation, "tier" => _tier)
            .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::{KvStore, MemoryStore};
    use serde_json::json;
    use std::sync::Arc;

    fn cache() -> TieredCache {
        TieredCache::new(
            Arc::new(MemoryStore::new()),
            CacheConfig::builder().namespace("test").build(),
        )
    }

    #[tokio::test]
    async fn set_then_get_hits_local_first() {
        let cache = cache();
        assert!(cache.set("k", &json!({"v": 1}), None).await);

        let value: Value = cache.get("k").await.unwrap();
        assert_eq!(value, json!({"v": 1}));

        let stats = cache.stats();
        assert_eq!(stats.local.hits, 1);
        assert_eq!(stats.local_entries, 1);
    }

    #[tokio::test]
    async fn distributed_hit_repopulates_local() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let config = CacheConfig::builder().namespace("test").build();

        let writer = TieredCache::new(Arc::clone(&store), config.clone());
        writer.set("k", &json!("shared"), None).await;

        // A second process with a cold local tier reads through.
        let reader = TieredCache::new(store, config);
        let value: Value = reader.get("k").await.unwrap();
        assert_eq!(value, json!("shared"));

        let stats = reader.stats();
        assert_eq!(stats.local.misses, 1);
        assert_eq!(stats.distributed.hits, 1);
        assert_eq!(stats.local_entries, 1);

        // The repopulated local tier answers next time.
        let _: Value = reader.get("k").await.unwrap();
        assert_eq!(reader.stats().local.hits, 1);
    }

    #[tokio::test]
    async fn persistent_hit_repopulates_both_upper_tiers() {
        let distributed: SharedStore = Arc::new(MemoryStore::new());
        let persistent: SharedStore = Arc::new(MemoryStore::new());
        let config = CacheConfig::builder().namespace("test").build();

        // Seed only the persistent tier.
        let seeded = codec::encode(&json!("durable"), &config).unwrap();
        persistent
            .set("cache:test:k", &seeded, None)
            .await
            .unwrap();

        let cache = TieredCache::new(Arc::clone(&distributed), config)
            .with_persistent(Arc::clone(&persistent));

        let value: Value = cache.get("k").await.unwrap();
        assert_eq!(value, json!("durable"));

        let stats = cache.stats();
        assert_eq!(stats.persistent.hits, 1);
        assert!(distributed.get("cache:test:k").await.unwrap().is_some());
        assert_eq!(stats.local_entries, 1);
    }

    #[tokio::test]
    async fn miss_in_every_tier_returns_none() {
        let cache = cache();
        let value: Option<Value> = cache.get("missing").await;
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn delete_removes_from_all_tiers() {
        let distributed: SharedStore = Arc::new(MemoryStore::new());
        let persistent: SharedStore = Arc::new(MemoryStore::new());
        let cache = TieredCache::new(
            Arc::clone(&distributed),
            CacheConfig::builder().namespace("test").build(),
        )
        .with_persistent(Arc::clone(&persistent));

        cache.set("k", &json!(1), None).await;
        assert!(cache.delete("k").await);

        let value: Option<Value> = cache.get("k").await;
        assert!(value.is_none());
        assert!(distributed.get("cache:test:k").await.unwrap().is_none());
        assert!(persistent.get("cache:test:k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pattern_invalidation_spans_tiers() {
        let cache = cache();
        cache.set("node:1", &json!(1), None).await;
        cache.set("node:2", &json!(2), None).await;
        cache.set("edge:1", &json!(3), None).await;

        let removed = cache.delete_pattern("node").await.unwrap();
        assert_eq!(removed, 2);

        let gone: Option<Value> = cache.get("node:1").await;
        assert!(gone.is_none());
        let kept: Option<Value> = cache.get("edge:1").await;
        assert!(kept.is_some());
    }

    #[tokio::test]
    async fn tag_invalidation_drops_dependents() {
        let cache = cache();
        cache
            .set_with_tags("schema:7:summary", &json!("s"), None, &["schema:7"])
            .await;
        cache
            .set_with_tags("schema:7:full", &json!("f"), None, &["schema:7"])
            .await;
        cache.set("schema:8:summary", &json!("other"), None).await;

        let removed = cache.invalidate_tag("schema:7").await.unwrap();
        assert_eq!(removed, 2);

        let gone: Option<Value> = cache.get("schema:7:summary").await;
        assert!(gone.is_none());
        let kept: Option<Value> = cache.get("schema:8:summary").await;
        assert!(kept.is_some());
    }

    #[tokio::test]
    async fn long_keys_are_digested() {
        let cache = cache();
        let long_key = "k".repeat(500);
        cache.set(&long_key, &json!("v"), None).await;
        let value: Value = cache.get(&long_key).await.unwrap();
        assert_eq!(value, json!("v"));

        // The storage key is the digest form, not the raw 500 bytes.
        let stats = cache.stats();
        assert_eq!(stats.local_entries, 1);
    }

    #[tokio::test]
    async fn typed_values_roundtrip() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Payload {
            name: String,
            count: u32,
        }

        let cache = cache();
        let payload = Payload {
            name: "nodes".to_string(),
            count: 42,
        };
        cache.set("typed", &payload, None).await;
        let read: Payload = cache.get("typed").await.unwrap();
        assert_eq!(read, payload);
    }
}
