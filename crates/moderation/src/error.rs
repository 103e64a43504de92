use thiserror::Error;

/// Errors that can occur while invoking the moderation webhook.
///
/// Every variant here is treated as fail-open by the guardrail evaluator
/// (the caller logs and falls back to `allow`); this type exists so the
/// caller can distinguish *why* for logging, not to drive control flow.
#[derive(Debug, Error)]
pub enum ModerationError {
    /// The webhook request failed at the transport level.
    #[error("moderation webhook request failed: {0}")]
    Request(String),

    /// The webhook did not respond within the configured timeout.
    #[error("moderation webhook timed out after {0}ms")]
    Timeout(u64),

    /// The webhook returned a non-2xx status.
    #[error("moderation webhook returned {status}: {body}")]
    BadStatus { status: u16, body: String },

    /// The webhook's response body could not be parsed.
    #[error("failed to parse moderation response: {0}")]
    ParseError(String),

    /// The client was misconfigured (e.g. an invalid URL).
    #[error("moderation configuration error: {0}")]
    Configuration(String),
}
