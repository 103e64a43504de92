use std::sync::Arc;

use axum::extract::{Extension, Multipart, State};
use axum::response::IntoResponse;
use axum::Json;
use keystone_core::{ModelId, RequestContext};
use keystone_gateway::Pipeline;
use keystone_provider::{ImageOperation, ImageRequest};
use serde::Deserialize;

use crate::api::headers::budget_headers;
use crate::error::ServerError;

#[derive(Debug, Deserialize)]
pub struct ImageGenerationBody {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default = "default_count")]
    pub n: u32,
}

fn default_count() -> u32 {
    1
}

/// `POST /v1/images/generations`.
pub async fn generations(
    State(pipeline): State<Arc<Pipeline>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<ImageGenerationBody>,
) -> Result<impl IntoResponse, ServerError> {
    let model = ModelId::new(body.model);
    let request = ImageRequest {
        upstream_model: String::new(),
        operation: ImageOperation::Generate,
        prompt: Some(body.prompt),
        image: None,
        mask: None,
        count: body.n,
        size: body.size,
    };
    dispatch(&pipeline, &ctx, &model, request).await
}

/// Fields collected from a multipart `image/edits` or `image/variations`
/// request. `prompt` is required for edits, absent for variations.
struct ImageMultipart {
    model: String,
    prompt: Option<String>,
    image: Vec<u8>,
    mask: Option<Vec<u8>>,
    size: Option<String>,
    count: u32,
}

async fn parse_image_multipart(mut multipart: Multipart) -> Result<ImageMultipart, ServerError> {
    let mut model = None;
    let mut prompt = None;
    let mut image = None;
    let mut mask = None;
    let mut size = None;
    let mut count = 1u32;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "model" => model = Some(field.text().await.map_err(|e| ServerError::BadRequest(e.to_string()))?),
            "prompt" => prompt = Some(field.text().await.map_err(|e| ServerError::BadRequest(e.to_string()))?),
            "size" => size = Some(field.text().await.map_err(|e| ServerError::BadRequest(e.to_string()))?),
            "n" => {
                let text = field.text().await.map_err(|e| ServerError::BadRequest(e.to_string()))?;
                count = text.parse().map_err(|_| ServerError::BadRequest("n must be an integer".into()))?;
            }
            "image" => {
                let bytes = field.bytes().await.map_err(|e| ServerError::BadRequest(e.to_string()))?;
                image = Some(bytes.to_vec());
            }
            "mask" => {
                let bytes = field.bytes().await.map_err(|e| ServerError::BadRequest(e.to_string()))?;
                mask = Some(bytes.to_vec());
            }
            _ => {}
        }
    }

    Ok(ImageMultipart {
        model: model.ok_or_else(|| ServerError::BadRequest("missing `model` field".into()))?,
        prompt,
        image: image.ok_or_else(|| ServerError::BadRequest("missing `image` field".into()))?,
        mask,
        size,
        count,
    })
}

/// `POST /v1/images/edits` (multipart/form-data).
pub async fn edits(
    State(pipeline): State<Arc<Pipeline>>,
    Extension(ctx): Extension<RequestContext>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ServerError> {
    let parsed = parse_image_multipart(multipart).await?;
    let model = ModelId::new(parsed.model);
    let request = ImageRequest {
        upstream_model: String::new(),
        operation: ImageOperation::Edit,
        prompt: parsed.prompt,
        image: Some(parsed.image),
        mask: parsed.mask,
        count: parsed.count,
        size: parsed.size,
    };
    dispatch(&pipeline, &ctx, &model, request).await
}

/// `POST /v1/images/variations` (multipart/form-data).
pub async fn variations(
    State(pipeline): State<Arc<Pipeline>>,
    Extension(ctx): Extension<RequestContext>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ServerError> {
    let parsed = parse_image_multipart(multipart).await?;
    let model = ModelId::new(parsed.model);
    let request = ImageRequest {
        upstream_model: String::new(),
        operation: ImageOperation::Variation,
        prompt: None,
        image: Some(parsed.image),
        mask: None,
        count: parsed.count,
        size: parsed.size,
    };
    dispatch(&pipeline, &ctx, &model, request).await
}

async fn dispatch(
    pipeline: &Pipeline,
    ctx: &RequestContext,
    model: &ModelId,
    request: ImageRequest,
) -> Result<impl IntoResponse, ServerError> {
    let response = pipeline.images(ctx, model, request).await?;
    let budget = budget_headers(&response.budget_status);
    Ok((budget, Json(response.body)))
}
