use std::time::Duration;
use thiserror::Error;

/// Typed pipeline outcomes, translated into response envelopes at the
/// coordinator's edge. Subsystems never raise these; the coordinator
/// builds them from subsystem results.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("rate limit exceeded")]
    RateLimited { retry_after: Option<u64> },

    #[error("circuit open; retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    #[error("backpressure limit reached")]
    Backpressure,

    #[error("no upstream available for {service}")]
    Unavailable { service: String },

    #[error("system not serviceable")]
    Unhealthy,

    #[error("handler error: {0}")]
    Handler(String),
}

impl PipelineError {
    /// HTTP status the host framework should emit.
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::RateLimited { .. } => 429,
            PipelineError::CircuitOpen { .. }
            | PipelineError::Backpressure
            | PipelineError::Unavailable { .. }
            | PipelineError::Unhealthy => 503,
            PipelineError::Handler(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_the_contract() {
        assert_eq!(
            PipelineError::RateLimited { retry_after: None }.status_code(),
            429
        );
        assert_eq!(
            PipelineError::CircuitOpen {
                retry_after: Duration::from_secs(5)
            }
            .status_code(),
            503
        );
        assert_eq!(PipelineError::Handler("x".into()).status_code(), 500);
    }
}
