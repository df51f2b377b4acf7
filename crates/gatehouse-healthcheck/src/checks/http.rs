//! HTTP endpoint probe.

use crate::check::HealthCheck;
use crate::models::{HealthCheckResult, HealthStatus};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

type BodyPredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

pub struct HttpHealthCheck {
    name: String,
    url: String,
    expected_status: u16,
    timeout: Duration,
    body_predicate: Option<BodyPredicate>,
    client: reqwest::Client,
}

impl HttpHealthCheck {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            expected_status: 200,
            timeout: Duration::from_secs(5),
            body_predicate: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn expected_status(mut self, status: u16) -> Self {
        self.expected_status = status;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Additionally require the JSON body to satisfy a predicate; a body
    /// that is not JSON or fails the predicate degrades the check.
    pub fn body_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.body_predicate = Some(Arc::new(predicate));
        self
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn check(&self) -> HealthCheckResult {
        let response = match self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                return HealthCheckResult::unhealthy(
                    &self.name,
                    format!("request to {} failed: {err}", self.url),
                )
            }
        };

        let status = response.status().as_u16();
        if status != self.expected_status {
            return HealthCheckResult::unhealthy(
                &self.name,
                format!("unexpected status {status} (expected {})", self.expected_status),
            )
            .with_details(json!({"status": status, "url": self.url}));
        }

        if let Some(predicate) = &self.body_predicate {
            match response.json::<Value>().await {
                Ok(body) if predicate(&body) => {}
                Ok(_) => {
                    return HealthCheckResult::degraded(
                        &self.name,
                        "response body failed validation",
                    )
                    .with_details(json!({"url": self.url}));
                }
                Err(err) => {
                    return HealthCheckResult::degraded(
                        &self.name,
                        format!("response body is not JSON: {err}"),
                    );
                }
            }
        }

        HealthCheckResult::healthy(&self.name, format!("{} responded {status}", self.url))
            .with_details(json!({"status": status, "url": self.url}))
    }
}
