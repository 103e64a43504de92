//! HTTP route wiring. Each submodule is a thin translation layer between
//! axum and the [`keystone_gateway::Pipeline`] facade.

pub mod audio;
pub mod chat;
pub mod embeddings;
pub mod headers;
pub mod health;
pub mod images;
pub mod models;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use keystone_gateway::Pipeline;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::require_bearer;

/// Builds the full axum [`Router`], wired against a shared [`Pipeline`].
///
/// `/healthz` and `/readyz` are unauthenticated; everything under `/v1`
/// requires a valid `Authorization: Bearer ...` header.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    let v1 = Router::new()
        .route("/models", get(models::list_models))
        .route("/chat/completions", post(chat::chat_completions))
        .route("/embeddings", post(embeddings::embeddings))
        .route("/images/generations", post(images::generations))
        .route("/images/edits", post(images::edits))
        .route("/images/variations", post(images::variations))
        .route("/audio/transcriptions", post(audio::transcriptions))
        .route("/audio/translations", post(audio::translations))
        .route("/audio/speech", post(audio::speech))
        .route_layer(middleware::from_fn_with_state(pipeline.clone(), require_bearer));

    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .nest("/v1", v1)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(pipeline)
}
