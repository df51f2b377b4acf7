use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// What the host framework hands the pipeline per request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    pub request_id: String,
    pub user_id: Option<String>,
    pub ip_address: String,
    pub endpoint: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    /// Opaque payload, forwarded to the handler and captured into the DLQ
    /// on failure.
    pub body: Value,
}

impl RequestEnvelope {
    pub fn new(
        method: impl Into<String>,
        endpoint: impl Into<String>,
        ip_address: impl Into<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            user_id: None,
            ip_address: ip_address.into(),
            endpoint: endpoint.into(),
            method: method.into(),
            headers: Vec::new(),
            body: Value::Object(Map::new()),
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// What the pipeline hands back to the host framework.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ResponseEnvelope {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// The request envelope as it travels the pipeline. Stages add metadata
/// keys; no stage removes keys set by its predecessors. Owned by the
/// coordinator and dropped when the response is emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct MiddlewareContext {
    pub request_id: String,
    pub user_id: Option<String>,
    pub ip_address: String,
    pub endpoint: String,
    pub method: String,
    pub timestamp_ms: u64,
    pub metadata: Map<String, Value>,
}

impl MiddlewareContext {
    pub fn from_envelope(envelope: &RequestEnvelope) -> Self {
        Self {
            request_id: envelope.request_id.clone(),
            user_id: envelope.user_id.clone(),
            ip_address: envelope.ip_address.clone(),
            endpoint: envelope.endpoint.clone(),
            method: envelope.method.clone(),
            timestamp_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            metadata: Map::new(),
        }
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    pub fn metadata_json(&self) -> Value {
        Value::Object(self.metadata.clone())
    }
}
