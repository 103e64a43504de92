use std::sync::Arc;

use axum::Json;
use axum::extract::{Extension, State};
use keystone_core::RequestContext;
use keystone_gateway::Pipeline;
use serde_json::{Value, json};

use crate::error::ServerError;

/// `GET /v1/models`.
pub async fn list_models(
    State(pipeline): State<Arc<Pipeline>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Value>, ServerError> {
    let models = pipeline.list_models(&ctx).await?;
    let data: Vec<_> = models
        .iter()
        .map(|model| json!({"id": model.as_str(), "object": "model"}))
        .collect();
    Ok(Json(json!({"object": "list", "data": data})))
}
