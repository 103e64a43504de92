//! Liveness/readiness probes. Unauthenticated, unrouted through the
//! gateway pipeline — these only confirm the process is up and can reach
//! its router's health view.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use keystone_gateway::Pipeline;
use serde_json::{Value, json};

pub async fn healthz() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

pub async fn readyz(State(pipeline): State<Arc<Pipeline>>) -> Json<Value> {
    let status = pipeline.route_health().await;
    let routes: Value = status
        .into_iter()
        .map(|(model, health)| (model.to_string(), json!({"healthy": health.healthy, "total": health.total})))
        .collect::<serde_json::Map<_, _>>()
        .into();
    Json(json!({"status": "ok", "routes": routes}))
}
