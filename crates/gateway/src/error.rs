use keystone_core::{ErrorCode, KeystoneError};
use keystone_moderation::ModerationError;
use keystone_provider::ProviderError;
use keystone_state::StateError;
use keystone_store::StoreError;
use thiserror::Error;

/// Pipeline-level failures, composing every lower-layer error via explicit
/// conversions and carrying the [`ErrorCode`] the HTTP layer renders.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("budget exceeded")]
    BudgetExceeded,

    #[error("request blocked by guardrail: {0}")]
    GuardrailBlocked(String),

    #[error("no eligible route had the requested capability")]
    Unsupported,

    #[error("all upstream routes failed: {0}")]
    UpstreamUnavailable(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("persistence error: {0}")]
    Store(#[from] StoreError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("moderation error: {0}")]
    Moderation(#[from] ModerationError),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl GatewayError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Authentication(_) => ErrorCode::AuthenticationFailed,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::ModelNotFound(_) => ErrorCode::ModelNotFound,
            Self::RateLimited => ErrorCode::RateLimitExceeded,
            Self::BudgetExceeded => ErrorCode::BudgetExceeded,
            Self::GuardrailBlocked(_) => ErrorCode::GuardrailBlocked,
            Self::Unsupported => ErrorCode::Unsupported,
            Self::UpstreamUnavailable(_) | Self::Provider(_) => ErrorCode::UpstreamUnavailable,
            Self::State(_) | Self::Store(_) | Self::Moderation(_) | Self::Configuration(_) => {
                ErrorCode::Internal
            }
        }
    }
}

impl From<GatewayError> for KeystoneError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Authentication(m) => Self::Authentication(m),
            GatewayError::Forbidden(m) => Self::Forbidden(m),
            GatewayError::InvalidRequest(m) => Self::InvalidRequest(m),
            GatewayError::ModelNotFound(m) => Self::ModelNotFound(m),
            GatewayError::RateLimited => Self::RateLimited { retry_after_ms: 1000 },
            GatewayError::BudgetExceeded => Self::BudgetExceeded("spend limit reached".into()),
            GatewayError::GuardrailBlocked(m) => Self::GuardrailBlocked(m),
            GatewayError::Unsupported => Self::Unsupported("capability not available".into()),
            GatewayError::UpstreamUnavailable(m) => Self::UpstreamUnavailable(m),
            GatewayError::Provider(e) => Self::UpstreamUnavailable(e.to_string()),
            GatewayError::State(e) => Self::Internal(e.to_string()),
            GatewayError::Store(e) => Self::Internal(e.to_string()),
            GatewayError::Moderation(e) => Self::Internal(e.to_string()),
            GatewayError::Configuration(m) => Self::Internal(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_maps_to_429_family() {
        assert_eq!(GatewayError::RateLimited.code(), ErrorCode::RateLimitExceeded);
    }

    #[test]
    fn provider_error_maps_to_upstream_unavailable() {
        let err = GatewayError::Provider(ProviderError::Timeout(std::time::Duration::from_secs(1)));
        assert_eq!(err.code(), ErrorCode::UpstreamUnavailable);
    }

    #[test]
    fn converts_into_keystone_error() {
        let err: KeystoneError = GatewayError::BudgetExceeded.into();
        assert_eq!(err.code(), ErrorCode::BudgetExceeded);
    }
}
