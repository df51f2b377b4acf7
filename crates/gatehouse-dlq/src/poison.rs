//! Poison message detection.
//!
//! Runs at enqueue time and on retry exhaustion. Any single signal is
//! sufficient: oversized payload, non-object structure, missing required
//! fields, nesting deeper than the limit, an error signature repeating
//! across messages, or a consistent error pattern in one message's own
//! history.

use crate::message::DlqMessage;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

/// Payloads over this many serialized bytes are poison.
const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;
/// Structures nested deeper than this are poison.
const MAX_NESTING_DEPTH: usize = 10;
/// Consecutive identical error types in one message's history.
const CONSISTENT_HISTORY_MIN: usize = 3;

/// Detects poison messages from structure and failure history.
pub struct PoisonDetector {
    /// Error-signature occurrence counts across messages.
    signature_counts: Mutex<HashMap<String, u32>>,
}

impl PoisonDetector {
    pub fn new() -> Self {
        Self {
            signature_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the reason when `message` is poison.
    pub fn inspect(&self, message: &DlqMessage, threshold: u32) -> Option<String> {
        if let Some(reason) = self.check_structure(message) {
            return Some(reason);
        }
        if self.repeated_signature(&message.error_message, threshold) {
            return Some("repeated error signature across messages".to_string());
        }
        if self.consistent_history(message) {
            return Some("consistent error pattern in history".to_string());
        }
        if message.retry_count >= threshold {
            return Some(format!("exceeded retry threshold ({threshold})"));
        }
        None
    }

    /// Forget accumulated signature counts.
    pub fn clear(&self) {
        self.signature_counts.lock().unwrap().clear();
    }

    fn check_structure(&self, message: &DlqMessage) -> Option<String> {
        let size = serde_json::to_vec(&message.content)
            .map(|raw| raw.len())
            .unwrap_or(usize::MAX);
        if size > MAX_PAYLOAD_BYTES {
            return Some(format!("payload exceeds {MAX_PAYLOAD_BYTES} bytes"));
        }

        if !message.content.is_object() {
            return Some("payload is not an object".to_string());
        }

        if let Some(required) = message
            .metadata
            .get("required_fields")
            .and_then(Value::as_array)
        {
            for field in required.iter().filter_map(Value::as_str) {
                if message.content.get(field).is_none() {
                    return Some(format!("missing required field {field}"));
                }
            }
        }

        if depth_of(&message.content, 0) > MAX_NESTING_DEPTH {
            return Some(format!("nesting exceeds depth {MAX_NESTING_DEPTH}"));
        }

        None
    }

    fn repeated_signature(&self, error: &str, threshold: u32) -> bool {
        let signature = error_signature(error);
        let mut counts = self.signature_counts.lock().unwrap();
        let count = counts.entry(signature).or_insert(0);
        *count += 1;
        *count >= threshold
    }

    fn consistent_history(&self, message: &DlqMessage) -> bool {
        if message.error_history.len() < CONSISTENT_HISTORY_MIN {
            return false;
        }
        let recent: Vec<String> = message
            .error_history
            .iter()
            .rev()
            .take(5)
            .map(|record| error_type(&record.error))
            .collect();
        recent.windows(2).all(|pair| pair[0] == pair[1])
    }
}

impl Default for PoisonDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Short hash of the error's type portion.
fn error_signature(error: &str) -> String {
    let digest = Sha256::digest(error_type(error).as_bytes());
    hex::encode(&digest[..4])
}

/// The part of an error message that identifies its kind: the prefix
/// before the first `:`, or the first three words.
fn error_type(error: &str) -> String {
    if let Some((kind, _)) = error.split_once(':') {
        return kind.trim().to_string();
    }
    error
        .split_whitespace()
        .take(3)
        .collect::<Vec<_>>()
        .join(" ")
}

fn depth_of(value: &Value, depth: usize) -> usize {
    // Bail out well past the poison limit; payloads are finite trees.
    if depth > MAX_NESTING_DEPTH + 10 {
        return depth;
    }
    match value {
        Value::Object(map) => map
            .values()
            .map(|value| depth_of(value, depth + 1))
            .max()
            .unwrap_or(depth),
        Value::Array(items) => items
            .iter()
            .map(|item| depth_of(item, depth + 1))
            .max()
            .unwrap_or(depth),
        _ => depth,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(content: Value) -> DlqMessage {
        DlqMessage::new("m1", "default", "orders", content, "err: io", json!({}))
    }

    #[test]
    fn object_payloads_pass() {
        let detector = PoisonDetector::new();
        assert_eq!(detector.inspect(&message(json!({"a": 1})), 5), None);
    }

    #[test]
    fn non_object_payload_is_poison() {
        let detector = PoisonDetector::new();
        let reason = detector.inspect(&message(json!("just a string")), 5);
        assert!(reason.unwrap().contains("not an object"));
    }

    #[test]
    fn deep_nesting_is_poison() {
        let mut value = json!({"leaf": 1});
        for _ in 0..12 {
            value = json!({ "next": value });
        }
        let detector = PoisonDetector::new();
        let reason = detector.inspect(&message(value), 5);
        assert!(reason.unwrap().contains("nesting"));
    }

    #[test]
    fn missing_required_fields_are_poison() {
        let detector = PoisonDetector::new();
        let mut msg = message(json!({"present": 1}));
        msg.metadata = json!({"required_fields": ["present", "absent"]});
        let reason = detector.inspect(&msg, 5);
        assert!(reason.unwrap().contains("absent"));
    }

    #[test]
    fn repeated_error_signature_trips_across_messages() {
        let detector = PoisonDetector::new();
        for _ in 0..2 {
            assert_eq!(detector.inspect(&message(json!({"a": 1})), 3), None);
        }
        let reason = detector.inspect(&message(json!({"a": 1})), 3);
        assert!(reason.unwrap().contains("repeated error signature"));
    }

    #[test]
    fn consistent_history_is_poison() {
        let detector = PoisonDetector::new();
        let mut msg = message(json!({"a": 1}));
        for _ in 0..3 {
            msg.add_error("TimeoutError: upstream");
        }
        let reason = detector.inspect(&msg, 100);
        assert!(reason.unwrap().contains("consistent error pattern"));
    }

    #[test]
    fn retry_threshold_is_poison() {
        let detector = PoisonDetector::new();
        let mut msg = message(json!({"a": 1}));
        // Vary history so the pattern checks stay quiet.
        msg.add_error("AError: x");
        msg.add_error("BError: y");
        msg.retry_count = 5;
        let reason = detector.inspect(&msg, 5);
        assert!(reason.unwrap().contains("retry threshold"));
    }

    #[test]
    fn error_type_extraction() {
        assert_eq!(error_type("TimeoutError: connect"), "TimeoutError");
        assert_eq!(error_type("too many open files now"), "too many open");
    }
}
