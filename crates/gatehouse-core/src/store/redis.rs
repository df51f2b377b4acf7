//! Redis-backed store implementation for production deployments.

use super::{KvStore, MemoryInfo, StoreError, UpdateFn};
use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Bounded retry budget for the compare-and-swap loop in `fetch_update`.
const CAS_MAX_ATTEMPTS: usize = 8;

/// Deadline on every command; a wedged server must not wedge callers.
const OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Atomic INCRBY that applies a TTL only when the increment created the key.
const INCR_WITH_TTL: &str = r#"
local value = redis.call('INCRBY', KEYS[1], ARGV[1])
if value == tonumber(ARGV[1]) and tonumber(ARGV[2]) > 0 then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return value
"#;

/// Compare-and-swap: write ARGV[2] only if the key still holds ARGV[1]
/// (ARGV[3] = '0' means the caller observed no value). Returns 1 on commit.
const COMPARE_AND_SWAP: &str = r#"
local current = redis.call('GET', KEYS[1])
local matched
if ARGV[3] == '0' then
    matched = current == false
else
    matched = current == ARGV[1]
end
if matched then
    if tonumber(ARGV[4]) > 0 then
        redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[4])
    else
        redis.call('SET', KEYS[1], ARGV[2])
    end
    return 1
end
return 0
"#;

/// [`KvStore`] over a Redis connection manager.
///
/// The connection manager reconnects transparently; multi-field atomic
/// updates go through server-evaluated Lua scripts so concurrent writers in
/// other processes cannot interleave.
pub struct RedisStore {
    conn: ConnectionManager,
    incr_script: Script,
    cas_script: Script,
}

impl RedisStore {
    /// Connect to the given Redis URL (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(OP_TIMEOUT)
            .set_response_timeout(OP_TIMEOUT);
        let conn = ConnectionManager::new_with_config(client, config)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self::from_manager(conn))
    }

    /// Wrap an existing connection manager (shared pool).
    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self {
            conn,
            incr_script: Script::new(INCR_WITH_TTL),
            cas_script: Script::new(COMPARE_AND_SWAP),
        }
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Connection(err.to_string())
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.conn();
        match ttl {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl_secs(ttl)).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        Ok(conn.del(keys.to_vec()).await?)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        Ok(conn.exists(key).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        Ok(conn.expire(key, ttl_secs(ttl) as i64).await?)
    }

    async fn incr_by(
        &self,
        key: &str,
        amount: i64,
        ttl_on_create: Option<Duration>,
    ) -> Result<i64, StoreError> {
        let mut conn = self.conn();
        let ttl = ttl_on_create.map(ttl_secs).unwrap_or(0);
        let value: i64 = self
            .incr_script
            .key(key)
            .arg(amount)
            .arg(ttl)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Script(e.to_string()))?;
        Ok(value)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn();
        let members = match limit {
            Some(limit) => {
                conn.zrangebyscore_limit(key, min, max, 0, limit as isize)
                    .await?
            }
            None => conn.zrangebyscore(key, min, max).await?,
        };
        Ok(members)
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn();
        Ok(conn.zrange(key, start as isize, stop as isize).await?)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let removed: u64 = conn.zrem(key, member).await?;
        Ok(removed > 0)
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn();
        Ok(conn.zcard(key).await?)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let added: u64 = conn.sadd(key, member).await?;
        Ok(added > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let removed: u64 = conn.srem(key, member).await?;
        Ok(removed > 0)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn();
        Ok(conn.smembers(key).await?)
    }

    async fn scard(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn();
        Ok(conn.scard(key).await?)
    }

    async fn hset_all(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let _: () = conn.hset_multiple(key, fields).await?;
        if let Some(ttl) = ttl {
            let _: bool = conn.expire(key, ttl_secs(ttl) as i64).await?;
        }
        Ok(())
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn();
        Ok(conn.hgetall(key).await?)
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn();
        let mut keys = Vec::new();
        let mut iter = conn.scan_match::<_, String>(pattern).await?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        let keys = self.scan_keys(pattern).await?;
        self.delete(&keys).await
    }

    async fn fetch_update(
        &self,
        key: &str,
        ttl: Option<Duration>,
        mut apply: UpdateFn<'_>,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn();
        let ttl = ttl.map(ttl_secs).unwrap_or(0);
        for _ in 0..CAS_MAX_ATTEMPTS {
            let current: Option<Vec<u8>> = conn.get(key).await?;
            let next = match apply(current.as_deref()) {
                Some(next) => next,
                None => return Ok(current),
            };
            let committed: i64 = self
                .cas_script
                .key(key)
                .arg(current.as_deref().unwrap_or_default())
                .arg(next.as_slice())
                .arg(if current.is_some() { "1" } else { "0" })
                .arg(ttl)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| StoreError::Script(e.to_string()))?;
            if committed == 1 {
                return Ok(Some(next));
            }
        }
        Err(StoreError::Conflict {
            key: key.to_string(),
        })
    }

    async fn ping(&self) -> Result<Duration, StoreError> {
        let mut conn = self.conn();
        let start = Instant::now();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(start.elapsed())
    }

    async fn memory_info(&self) -> Result<Option<MemoryInfo>, StoreError> {
        let mut conn = self.conn();
        let info: String = redis::cmd("INFO").arg("memory").query_async(&mut conn).await?;
        let mut used = None;
        let mut peak = None;
        let mut fragmentation = None;
        for line in info.lines() {
            if let Some((field, value)) = line.split_once(':') {
                match field {
                    "used_memory" => used = value.trim().parse().ok(),
                    "used_memory_peak" => peak = value.trim().parse().ok(),
                    "mem_fragmentation_ratio" => fragmentation = value.trim().parse().ok(),
                    _ => {}
                }
            }
        }
        match (used, peak, fragmentation) {
            (Some(used_bytes), Some(peak_bytes), Some(fragmentation_ratio)) => {
                Ok(Some(MemoryInfo {
                    used_bytes,
                    peak_bytes,
                    fragmentation_ratio,
                }))
            }
            _ => Ok(None),
        }
    }
}
