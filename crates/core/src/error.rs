use thiserror::Error;

/// Stable wire-facing error code, returned to callers inside the JSON error
/// envelope and used by clients to branch on failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    AuthenticationFailed,
    Forbidden,
    InvalidRequest,
    ModelNotFound,
    RateLimitExceeded,
    BudgetExceeded,
    GuardrailBlocked,
    UpstreamUnavailable,
    Unsupported,
    Internal,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthenticationFailed => "authentication_failed",
            Self::Forbidden => "forbidden",
            Self::InvalidRequest => "invalid_request",
            Self::ModelNotFound => "model_not_found",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::BudgetExceeded => "budget_exceeded",
            Self::GuardrailBlocked => "guardrail_blocked",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::Unsupported => "unsupported",
            Self::Internal => "internal_error",
        }
    }

    /// The HTTP status code this error category maps to.
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::AuthenticationFailed => 401,
            Self::Forbidden => 403,
            Self::InvalidRequest | Self::ModelNotFound => 400,
            Self::RateLimitExceeded | Self::BudgetExceeded => 429,
            Self::GuardrailBlocked => 422,
            Self::UpstreamUnavailable => 502,
            Self::Unsupported => 501,
            Self::Internal => 500,
        }
    }
}

/// Top-level error type shared across the gateway's request plane.
///
/// Crate-specific error enums (state, provider, moderation, store) convert
/// into this via `From` at the boundary where a request handler needs to
/// render a response.
#[derive(Debug, Error)]
pub enum KeystoneError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("rate limit exceeded, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("request blocked by guardrail: {0}")]
    GuardrailBlocked(String),

    #[error("upstream provider unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl KeystoneError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Authentication(_) => ErrorCode::AuthenticationFailed,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::ModelNotFound(_) => ErrorCode::ModelNotFound,
            Self::RateLimited { .. } => ErrorCode::RateLimitExceeded,
            Self::BudgetExceeded(_) => ErrorCode::BudgetExceeded,
            Self::GuardrailBlocked(_) => ErrorCode::GuardrailBlocked,
            Self::UpstreamUnavailable(_) => ErrorCode::UpstreamUnavailable,
            Self::Unsupported(_) => ErrorCode::Unsupported,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_maps_to_http_status() {
        assert_eq!(ErrorCode::RateLimitExceeded.http_status(), 429);
        assert_eq!(ErrorCode::ModelNotFound.http_status(), 400);
        assert_eq!(ErrorCode::Unsupported.http_status(), 501);
    }

    #[test]
    fn keystone_error_code() {
        let err = KeystoneError::RateLimited { retry_after_ms: 500 };
        assert_eq!(err.code(), ErrorCode::RateLimitExceeded);
        assert_eq!(err.code().as_str(), "rate_limit_exceeded");
    }
}
