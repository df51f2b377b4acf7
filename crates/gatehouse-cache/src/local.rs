//! In-process tier: bounded TTL-LRU map.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct LocalEntry {
    value: Vec<u8>,
    inserted_at: Instant,
    last_used: Instant,
}

struct LocalInner {
    entries: HashMap<String, LocalEntry>,
    evictions: u64,
}

/// Bounded LRU map with per-entry TTL.
pub struct LocalCache {
    capacity: usize,
    ttl: Duration,
    inner: Mutex<LocalInner>,
}

impl LocalCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            inner: Mutex::new(LocalInner {
                entries: HashMap::new(),
                evictions: 0,
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        let expired = inner
            .entries
            .get(key)
            .is_some_and(|entry| entry.inserted_at.elapsed() > self.ttl);
        if expired {
            inner.entries.remove(key);
            return None;
        }
        let entry = inner.entries.get_mut(key)?;
        entry.last_used = Instant::now();
        Some(entry.value.clone())
    }

    pub fn insert(&self, key: &str, value: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        inner.entries.insert(
            key.to_string(),
            LocalEntry {
                value,
                inserted_at: now,
                last_used: now,
            },
        );

        // Over capacity: drop the least recently used entry.
        while inner.entries.len() > self.capacity {
            let Some(lru_key) = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            inner.entries.remove(&lru_key);
            inner.evictions += 1;

            #[cfg(feature = "metrics")]
            metrics::counter!("cache_evictions_total", "tier" => "local").increment(1);
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.inner.lock().unwrap().entries.remove(key).is_some()
    }

    /// Remove every key containing `fragment`. Returns the count.
    pub fn remove_matching(&self, fragment: &str) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !key.contains(fragment));
        (before - inner.entries.len()) as u64
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evictions(&self) -> u64 {
        self.inner.lock().unwrap().evictions
    }
}
