//! Bearer-token authentication middleware.
//!
//! Every protected route resolves its caller via
//! [`keystone_gateway::Pipeline::authenticate`] rather than any
//! session/JWT/role system — the gateway's own bearer-key resolution (C1)
//! is the sole source of truth for who is calling.

use std::sync::Arc;

use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use keystone_core::RequestContext;
use keystone_gateway::Pipeline;

use crate::error::ServerError;

/// Extract `Authorization: Bearer ...`, resolve it into a [`RequestContext`],
/// and insert the context into the request's extensions for handlers to
/// pull out via [`axum::extract::Extension`].
pub async fn require_bearer(
    State(pipeline): State<Arc<Pipeline>>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ServerError> {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(ServerError::MissingCredentials)?;

    let bearer = header
        .strip_prefix("Bearer ")
        .ok_or(ServerError::MissingCredentials)?;

    let ctx: RequestContext = pipeline.authenticate(bearer).await?;
    request.extensions_mut().insert(ctx);

    Ok(next.run(request).await)
}
