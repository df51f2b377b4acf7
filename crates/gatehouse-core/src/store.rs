//! Shared key-value store abstraction.
//!
//! All distributed state in gatehouse (rate-limit counters, circuit state,
//! DLQ messages, the service registry, cache tiers, health status) flows
//! through this one trait. Two implementations ship with the crate:
//! [`memory::MemoryStore`] for development and testing, and
//! [`redis::RedisStore`] for production deployments.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A store shared between subsystems.
pub type SharedStore = Arc<dyn KvStore>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing connection failed or was refused.
    #[error("store connection error: {0}")]
    Connection(String),

    /// A stored value could not be encoded or decoded.
    #[error("store serialization error: {0}")]
    Serialization(String),

    /// A server-evaluated script failed.
    #[error("store script error: {0}")]
    Script(String),

    /// An atomic read-modify-write lost the race too many times.
    #[error("store update conflict on key {key}")]
    Conflict { key: String },
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Memory statistics reported by the backing store, when available.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryInfo {
    pub used_bytes: u64,
    pub peak_bytes: u64,
    pub fragmentation_ratio: f64,
}

/// Closure applied inside [`KvStore::fetch_update`].
///
/// Receives the current raw value (if any) and returns the replacement.
/// Returning `None` leaves the key untouched.
pub type UpdateFn<'a> = Box<dyn FnMut(Option<&[u8]>) -> Option<Vec<u8>> + Send + 'a>;

/// The shared key-value store contract.
///
/// TTLs are in whole seconds at the wire level; sub-second durations are
/// rounded up. Keys use `:` as the hierarchy separator (see [`crate::keys`]).
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get the raw value at `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Set `key` to `value`, with an optional TTL.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Delete the given keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Whether `key` currently exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Set or refresh the TTL on `key`. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Atomically increment the integer at `key` by `amount`.
    ///
    /// When the increment creates the key, `ttl_on_create` (if any) is
    /// applied in the same atomic step.
    async fn incr_by(
        &self,
        key: &str,
        amount: i64,
        ttl_on_create: Option<Duration>,
    ) -> Result<i64, StoreError>;

    /// Add `member` with `score` to the sorted set at `key`.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError>;

    /// Members of the sorted set with `min <= score <= max`, ascending,
    /// optionally capped at `limit`.
    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> Result<Vec<String>, StoreError>;

    /// Members of the sorted set by rank, ascending. `stop` of `-1` means
    /// the last member.
    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError>;

    /// Remove `member` from the sorted set at `key`.
    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Cardinality of the sorted set at `key`.
    async fn zcard(&self, key: &str) -> Result<u64, StoreError>;

    /// Add `member` to the set at `key`.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Remove `member` from the set at `key`.
    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// All members of the set at `key`.
    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Cardinality of the set at `key`.
    async fn scard(&self, key: &str) -> Result<u64, StoreError>;

    /// Set all fields of the hash at `key`.
    async fn hset_all(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// All fields of the hash at `key`.
    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Keys matching a glob pattern (`*` and `?` wildcards).
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Delete every key matching a glob pattern, returning the count.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, StoreError>;

    /// Atomic read-modify-write of the raw value at `key`.
    ///
    /// `apply` sees the current value and produces the replacement; the
    /// write and the read it was computed from are a single atomic step
    /// (server-evaluated compare-and-swap on Redis, one critical section in
    /// the memory store). Returns the value in place after the call.
    async fn fetch_update(
        &self,
        key: &str,
        ttl: Option<Duration>,
        apply: UpdateFn<'_>,
    ) -> Result<Option<Vec<u8>>, StoreError>;

    /// Round-trip the store, returning the observed latency.
    async fn ping(&self) -> Result<Duration, StoreError>;

    /// Memory statistics, when the backend exposes them.
    async fn memory_info(&self) -> Result<Option<MemoryInfo>, StoreError>;
}

/// JSON helpers layered on any [`KvStore`].
#[async_trait]
pub trait KvStoreExt: KvStore {
    /// Get and decode a JSON value.
    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Encode and set a JSON value.
    async fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_vec(value)?;
        self.set(key, &raw, ttl).await
    }
}

impl<S: KvStore + ?Sized> KvStoreExt for S {}

/// Glob matcher used by `scan_keys` implementations: `*` matches any run of
/// characters, `?` matches exactly one.
pub(crate) fn glob_match(pattern: &str, input: &str) -> bool {
    fn inner(p: &[u8], s: &[u8]) -> bool {
        match (p.first(), s.first()) {
            (None, None) => true,
            (Some(b'*'), _) => inner(&p[1..], s) || (!s.is_empty() && inner(p, &s[1..])),
            (Some(b'?'), Some(_)) => inner(&p[1..], &s[1..]),
            (Some(pc), Some(sc)) if pc == sc => inner(&p[1..], &s[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), input.as_bytes())
}
