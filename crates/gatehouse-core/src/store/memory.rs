//! In-process store implementation for development and testing.

use super::{glob_match, KvStore, MemoryInfo, StoreError, UpdateFn};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Value {
    Raw(Vec<u8>),
    Zset(HashMap<String, f64>),
    Set(HashSet<String>),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

/// Single-process [`KvStore`] holding everything behind one mutex.
///
/// Expired entries are purged lazily on access and during scans. Because
/// every operation runs inside the same critical section, `fetch_update` is
/// genuinely atomic here, which makes this store the reference semantics
/// for the Redis implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn wrong_type(key: &str) -> StoreError {
        StoreError::Serialization(format!("wrong value type at key {key}"))
    }
}

fn live_entry<'a>(map: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    if map.get(key).is_some_and(|e| !e.live()) {
        map.remove(key);
    }
    map.get_mut(key)
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut map = self.inner.lock().unwrap();
        match live_entry(&mut map, key) {
            Some(Entry {
                value: Value::Raw(raw),
                ..
            }) => Ok(Some(raw.clone())),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut map = self.inner.lock().unwrap();
        map.insert(
            key.to_string(),
            Entry {
                value: Value::Raw(value.to_vec()),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        let mut map = self.inner.lock().unwrap();
        let mut removed = 0;
        for key in keys {
            if live_entry(&mut map, key).is_some() && map.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut map = self.inner.lock().unwrap();
        Ok(live_entry(&mut map, key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut map = self.inner.lock().unwrap();
        match live_entry(&mut map, key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn incr_by(
        &self,
        key: &str,
        amount: i64,
        ttl_on_create: Option<Duration>,
    ) -> Result<i64, StoreError> {
        let mut map = self.inner.lock().unwrap();
        match live_entry(&mut map, key) {
            Some(Entry {
                value: Value::Raw(raw),
                ..
            }) => {
                let current: i64 = std::str::from_utf8(raw)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| Self::wrong_type(key))?;
                let next = current + amount;
                *raw = next.to_string().into_bytes();
                Ok(next)
            }
            Some(_) => Err(Self::wrong_type(key)),
            None => {
                map.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Raw(amount.to_string().into_bytes()),
                        expires_at: ttl_on_create.map(|t| Instant::now() + t),
                    },
                );
                Ok(amount)
            }
        }
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut map = self.inner.lock().unwrap();
        match live_entry(&mut map, key) {
            Some(Entry {
                value: Value::Zset(zset),
                ..
            }) => {
                zset.insert(member.to_string(), score);
                Ok(())
            }
            Some(_) => Err(Self::wrong_type(key)),
            None => {
                let mut zset = HashMap::new();
                zset.insert(member.to_string(), score);
                map.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Zset(zset),
                        expires_at: None,
                    },
                );
                Ok(())
            }
        }
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> Result<Vec<String>, StoreError> {
        let mut map = self.inner.lock().unwrap();
        let mut members: Vec<(String, f64)> = match live_entry(&mut map, key) {
            Some(Entry {
                value: Value::Zset(zset),
                ..
            }) => zset
                .iter()
                .filter(|(_, score)| **score >= min && **score <= max)
                .map(|(m, s)| (m.clone(), *s))
                .collect(),
            Some(_) => return Err(Self::wrong_type(key)),
            None => return Ok(Vec::new()),
        };
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        if let Some(limit) = limit {
            members.truncate(limit);
        }
        Ok(members.into_iter().map(|(m, _)| m).collect())
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        let mut map = self.inner.lock().unwrap();
        let mut members: Vec<(String, f64)> = match live_entry(&mut map, key) {
            Some(Entry {
                value: Value::Zset(zset),
                ..
            }) => zset.iter().map(|(m, s)| (m.clone(), *s)).collect(),
            Some(_) => return Err(Self::wrong_type(key)),
            None => return Ok(Vec::new()),
        };
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        let len = members.len() as i64;
        let norm = |i: i64| -> i64 {
            if i < 0 {
                (len + i).max(0)
            } else {
                i.min(len)
            }
        };
        let (start, stop) = (norm(start), norm(stop));
        if start > stop {
            return Ok(Vec::new());
        }
        Ok(members
            .into_iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .map(|(m, _)| m)
            .collect())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut map = self.inner.lock().unwrap();
        match live_entry(&mut map, key) {
            Some(Entry {
                value: Value::Zset(zset),
                ..
            }) => Ok(zset.remove(member).is_some()),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(false),
        }
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        let mut map = self.inner.lock().unwrap();
        match live_entry(&mut map, key) {
            Some(Entry {
                value: Value::Zset(zset),
                ..
            }) => Ok(zset.len() as u64),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(0),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut map = self.inner.lock().unwrap();
        match live_entry(&mut map, key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.insert(member.to_string())),
            Some(_) => Err(Self::wrong_type(key)),
            None => {
                let mut set = HashSet::new();
                set.insert(member.to_string());
                map.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Set(set),
                        expires_at: None,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut map = self.inner.lock().unwrap();
        match live_entry(&mut map, key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.remove(member)),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(false),
        }
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut map = self.inner.lock().unwrap();
        match live_entry(&mut map, key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => {
                let mut members: Vec<String> = set.iter().cloned().collect();
                members.sort();
                Ok(members)
            }
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }

    async fn scard(&self, key: &str) -> Result<u64, StoreError> {
        let mut map = self.inner.lock().unwrap();
        match live_entry(&mut map, key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.len() as u64),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(0),
        }
    }

    async fn hset_all(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut map = self.inner.lock().unwrap();
        let expires_at = ttl.map(|t| Instant::now() + t);
        match live_entry(&mut map, key) {
            Some(Entry {
                value: Value::Hash(hash),
                expires_at: existing,
            }) => {
                for (field, value) in fields {
                    hash.insert(field.clone(), value.clone());
                }
                if expires_at.is_some() {
                    *existing = expires_at;
                }
                Ok(())
            }
            Some(_) => Err(Self::wrong_type(key)),
            None => {
                map.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Hash(fields.iter().cloned().collect()),
                        expires_at,
                    },
                );
                Ok(())
            }
        }
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut map = self.inner.lock().unwrap();
        match live_entry(&mut map, key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.clone()),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(HashMap::new()),
        }
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut map = self.inner.lock().unwrap();
        map.retain(|_, entry| entry.live());
        let mut keys: Vec<String> = map
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        let mut map = self.inner.lock().unwrap();
        map.retain(|_, entry| entry.live());
        let before = map.len();
        map.retain(|key, _| !glob_match(pattern, key));
        Ok((before - map.len()) as u64)
    }

    async fn fetch_update(
        &self,
        key: &str,
        ttl: Option<Duration>,
        mut apply: UpdateFn<'_>,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let mut map = self.inner.lock().unwrap();
        let current = match live_entry(&mut map, key) {
            Some(Entry {
                value: Value::Raw(raw),
                ..
            }) => Some(raw.clone()),
            Some(_) => return Err(Self::wrong_type(key)),
            None => None,
        };
        match apply(current.as_deref()) {
            Some(next) => {
                map.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Raw(next.clone()),
                        expires_at: ttl.map(|t| Instant::now() + t),
                    },
                );
                Ok(Some(next))
            }
            None => Ok(current),
        }
    }

    async fn ping(&self) -> Result<Duration, StoreError> {
        let start = Instant::now();
        drop(self.inner.lock().unwrap());
        Ok(start.elapsed())
    }

    async fn memory_info(&self) -> Result<Option<MemoryInfo>, StoreError> {
        Ok(None)
    }
}
