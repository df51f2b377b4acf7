use crate::config::RateLimitScope;

/// Key identifying one tracked budget: `(scope, identifier, endpoint?)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub scope: RateLimitScope,
    pub identifier: String,
    pub endpoint: Option<String>,
}

impl RateLimitKey {
    pub fn new(
        scope: RateLimitScope,
        identifier: impl Into<String>,
        endpoint: Option<&str>,
    ) -> Self {
        Self {
            scope,
            identifier: identifier.into(),
            endpoint: endpoint.map(str::to_string),
        }
    }

    /// Derive the key for a request under the configured scope.
    pub fn for_request(
        scope: RateLimitScope,
        user_id: Option<&str>,
        ip_address: Option<&str>,
        endpoint: Option<&str>,
    ) -> Self {
        match scope {
            RateLimitScope::User if user_id.is_some() => {
                Self::new(scope, user_id.unwrap_or_default(), endpoint)
            }
            RateLimitScope::Ip if ip_address.is_some() => {
                Self::new(scope, ip_address.unwrap_or_default(), endpoint)
            }
            RateLimitScope::Endpoint if endpoint.is_some() => {
                Self::new(scope, endpoint.unwrap_or_default(), None)
            }
            RateLimitScope::Combined => {
                let identifier = format!(
                    "{}:{}",
                    user_id.unwrap_or("anonymous"),
                    ip_address.unwrap_or("unknown")
                );
                Self::new(scope, identifier, endpoint)
            }
            _ => Self::new(RateLimitScope::Global, "global", endpoint),
        }
    }

    /// Store key under the `ratelimit:` prefix.
    pub fn store_key(&self) -> String {
        gatehouse_core::keys::rate_limit(
            self.scope.as_str(),
            &self.identifier,
            self.endpoint.as_deref(),
        )
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.endpoint {
            Some(endpoint) => write!(f, "{}:{}:{}", self.scope.as_str(), self.identifier, endpoint),
            None => write!(f, "{}:{}", self.scope.as_str(), self.identifier),
        }
    }
}
