//! Content deduplication.
//!
//! Two payloads are duplicates when their canonical forms hash equal:
//! object keys sorted, primitive-only lists sorted, and the optional
//! include/exclude key sets applied to the top level. A recent-hash window
//! rejects duplicates at enqueue time.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::message::epoch_ms;

const CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Rejects semantically-equal payloads within a time window.
pub struct Deduplicator {
    window: Duration,
    seen: Mutex<SeenCache>,
}

struct SeenCache {
    hashes: HashMap<String, u64>,
    last_cleanup_ms: u64,
}

impl Deduplicator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(SeenCache {
                hashes: HashMap::new(),
                last_cleanup_ms: epoch_ms(),
            }),
        }
    }

    /// Canonical SHA-256 of a payload.
    pub fn content_hash(
        content: &Value,
        include_keys: Option<&HashSet<String>>,
        exclude_keys: Option<&HashSet<String>>,
    ) -> String {
        let filtered = filter_keys(content, include_keys, exclude_keys);
        let canonical = canonicalize(&filtered);
        // serde_json sorts object keys; the serialized form is stable.
        let encoded = serde_json::to_string(&canonical).unwrap_or_else(|_| canonical.to_string());
        let digest = Sha256::digest(encoded.as_bytes());
        hex::encode(digest)
    }

    /// Record `hash` and report whether it was already seen inside the
    /// window.
    pub fn check_and_record(&self, hash: &str) -> bool {
        let now = epoch_ms();
        let mut seen = self.seen.lock().unwrap();

        if now.saturating_sub(seen.last_cleanup_ms) >= CACHE_CLEANUP_INTERVAL.as_millis() as u64 {
            let floor = now.saturating_sub(self.window.as_millis() as u64);
            seen.hashes.retain(|_, last_seen| *last_seen >= floor);
            seen.last_cleanup_ms = now;
        }

        let floor = now.saturating_sub(self.window.as_millis() as u64);
        let duplicate = seen
            .hashes
            .get(hash)
            .is_some_and(|last_seen| *last_seen >= floor);
        seen.hashes.insert(hash.to_string(), now);
        duplicate
    }

    /// Number of hashes currently cached.
    pub fn cache_size(&self) -> usize {
        self.seen.lock().unwrap().hashes.len()
    }

    /// Drop every cached hash.
    pub fn clear(&self) {
        let mut seen = self.seen.lock().unwrap();
        seen.hashes.clear();
        seen.last_cleanup_ms = epoch_ms();
    }
}

fn filter_keys(
    content: &Value,
    include_keys: Option<&HashSet<String>>,
    exclude_keys: Option<&HashSet<String>>,
) -> Value {
    let Value::Object(map) = content else {
        return content.clone();
    };
    let filtered: serde_json::Map<String, Value> = map
        .iter()
        .filter(|(key, _)| match (include_keys, exclude_keys) {
            (Some(include), _) => include.contains(*key),
            (None, Some(exclude)) => !exclude.contains(*key),
            (None, None) => true,
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Value::Object(filtered)
}

/// Sort primitive-only lists; recurse everywhere else. Object keys are
/// already ordered by the map representation.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), canonicalize(value)))
                .collect(),
        ),
        Value::Array(items) => {
            let primitive_only = items
                .iter()
                .all(|item| matches!(item, Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)));
            if primitive_only {
                let mut sorted: Vec<Value> = items.clone();
                sorted.sort_by_key(|item| item.to_string());
                Value::Array(sorted)
            } else {
                Value::Array(items.iter().map(canonicalize).collect())
            }
        }
        other => other.clone(),
    }
}
