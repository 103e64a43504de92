use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use keystone_core::ErrorCode;
use keystone_gateway::GatewayError;
use serde_json::json;
use thiserror::Error;

/// Errors surfaced at the HTTP boundary, either raised directly by a
/// handler (bad multipart body, missing credentials) or passed through
/// from a [`GatewayError`].
#[derive(Debug, Error)]
pub enum ServerError {
    /// A configuration error encountered at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error (e.g. binding the listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A gateway-level failure surfaced through the API.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The request body or multipart form could not be parsed.
    #[error("invalid request: {0}")]
    BadRequest(String),

    /// No `Authorization: Bearer ...` header was present.
    #[error("missing bearer credentials")]
    MissingCredentials,

    /// The requested feature is not implemented by this server.
    #[error("not implemented: {0}")]
    NotImplemented(String),
}

impl ServerError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::Config(_) | Self::Io(_) => ErrorCode::Internal,
            Self::Gateway(e) => e.code(),
            Self::BadRequest(_) => ErrorCode::InvalidRequest,
            Self::MissingCredentials => ErrorCode::AuthenticationFailed,
            Self::NotImplemented(_) => ErrorCode::Unsupported,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let code = self.code();
        let status = StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "error": {
                "message": self.to_string(),
                "code": code.as_str(),
            }
        });
        (status, axum::Json(body)).into_response()
    }
}
