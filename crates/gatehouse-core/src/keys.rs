//! Canonical key patterns for every subsystem.
//!
//! All keys are prefixed by subsystem and use `:` as the separator.
//! Consumers outside the request-control runtime must not write to these
//! keyspaces.

/// `ratelimit:{scope}:{identifier}` or `ratelimit:{scope}:{identifier}:{endpoint}`.
pub fn rate_limit(scope: &str, identifier: &str, endpoint: Option<&str>) -> String {
    match endpoint {
        Some(endpoint) => format!("ratelimit:{scope}:{identifier}:{endpoint}"),
        None => format!("ratelimit:{scope}:{identifier}"),
    }
}

/// `circuit:{name}:state`
pub fn circuit_state(name: &str) -> String {
    format!("circuit:{name}:state")
}

/// `circuit:{name}:last_change`
pub fn circuit_last_change(name: &str) -> String {
    format!("circuit:{name}:last_change")
}

/// `circuit:{name}:metrics`
pub fn circuit_metrics(name: &str) -> String {
    format!("circuit:{name}:metrics")
}

/// `dlq:message:{queue}:{id}`: primary message entry.
pub fn dlq_message(queue: &str, id: &str) -> String {
    format!("dlq:message:{queue}:{id}")
}

/// `dlq:queue:{queue}`: sorted set of message ids by insertion time.
pub fn dlq_queue(queue: &str) -> String {
    format!("dlq:queue:{queue}")
}

/// `dlq:retry:{queue}`: sorted set of message ids by next retry time.
pub fn dlq_retry(queue: &str) -> String {
    format!("dlq:retry:{queue}")
}

/// `dlq:status:{queue}:{status}`: set of message ids per status.
pub fn dlq_status(queue: &str, status: &str) -> String {
    format!("dlq:status:{queue}:{status}")
}

/// `discovery:services:{service}`: set of instance ids.
pub fn discovery_registry(service: &str) -> String {
    format!("discovery:services:{service}")
}

/// `discovery:instance:{service}:{instance}`: instance detail entry.
pub fn discovery_instance(service: &str, instance: &str) -> String {
    format!("discovery:instance:{service}:{instance}")
}

/// `health:status:{component}`: latest published component health.
pub fn health_status(component: &str) -> String {
    format!("health:status:{component}")
}

/// `cache:{namespace}:{key}`: cache entry in the distributed tier.
pub fn cache_entry(namespace: &str, key: &str) -> String {
    format!("cache:{namespace}:{key}")
}

/// `cache:tag:{namespace}:{entity}`: reverse index for tag invalidation.
pub fn cache_tag(namespace: &str, entity: &str) -> String {
    format!("cache:tag:{namespace}:{entity}")
}
