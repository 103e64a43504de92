use std::time::Duration;

use thiserror::Error;

/// Errors a provider route can return. The request pipeline only ever
/// branches on `is_retryable` (to decide whether to fail over to the next
/// route) and `Unsupported` (to exclude a route from selection up front);
/// everything else is surfaced to the caller as `upstream_error`.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The route does not implement the requested capability.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The upstream provider returned an error response.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The upstream did not respond within the allowed duration.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// A network or transport-level error occurred before any response.
    #[error("connection error: {0}")]
    Connection(String),

    /// The route was given invalid configuration (bad credentials, bad URL).
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The upstream provider itself rate-limited this route.
    #[error("upstream rate limited")]
    RateLimited,

    /// The response body could not be parsed into the expected shape.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The in-flight call was cancelled by the caller (client disconnect or
    /// ambient cancellation), not by the provider.
    #[error("cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Whether the request-processing pipeline should try the next route in
    /// the failover order rather than surfacing this error to the client.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Upstream(_) | Self::Timeout(_) | Self::Connection(_) | Self::RateLimited
        )
    }

    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_trigger_failover() {
        assert!(ProviderError::Upstream("500".into()).is_retryable());
        assert!(ProviderError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(ProviderError::Connection("reset".into()).is_retryable());
        assert!(ProviderError::RateLimited.is_retryable());
    }

    #[test]
    fn non_retryable_errors_are_terminal() {
        assert!(!ProviderError::Unsupported("tts".into()).is_retryable());
        assert!(!ProviderError::Configuration("x".into()).is_retryable());
        assert!(!ProviderError::Serialization("x".into()).is_retryable());
        assert!(!ProviderError::Cancelled.is_retryable());
    }

    #[test]
    fn unsupported_flag() {
        assert!(ProviderError::Unsupported("tts".into()).is_unsupported());
        assert!(!ProviderError::Upstream("x".into()).is_unsupported());
    }
}
