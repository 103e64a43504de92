use std::sync::Arc;

use axum::Json;
use axum::extract::{Extension, Multipart, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use keystone_core::{ModelId, RequestContext};
use keystone_gateway::Pipeline;
use keystone_provider::{AudioOperation, AudioRequest, TtsRequest};
use serde::Deserialize;

use crate::api::headers::budget_headers;
use crate::error::ServerError;

struct AudioMultipart {
    model: String,
    audio: Vec<u8>,
    language: Option<String>,
    prompt: Option<String>,
}

async fn parse_audio_multipart(mut multipart: Multipart) -> Result<AudioMultipart, ServerError> {
    let mut model = None;
    let mut audio = None;
    let mut language = None;
    let mut prompt = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "model" => model = Some(field.text().await.map_err(|e| ServerError::BadRequest(e.to_string()))?),
            "language" => language = Some(field.text().await.map_err(|e| ServerError::BadRequest(e.to_string()))?),
            "prompt" => prompt = Some(field.text().await.map_err(|e| ServerError::BadRequest(e.to_string()))?),
            "file" | "audio" => {
                let bytes = field.bytes().await.map_err(|e| ServerError::BadRequest(e.to_string()))?;
                audio = Some(bytes.to_vec());
            }
            _ => {}
        }
    }

    Ok(AudioMultipart {
        model: model.ok_or_else(|| ServerError::BadRequest("missing `model` field".into()))?,
        audio: audio.ok_or_else(|| ServerError::BadRequest("missing `file` field".into()))?,
        language,
        prompt,
    })
}

async fn dispatch_audio(
    pipeline: &Pipeline,
    ctx: &RequestContext,
    model: &ModelId,
    request: AudioRequest,
) -> Result<impl IntoResponse, ServerError> {
    let response = pipeline.audio(ctx, model, request).await?;
    let budget = budget_headers(&response.budget_status);
    Ok((budget, Json(response.body)))
}

/// `POST /v1/audio/transcriptions`.
pub async fn transcriptions(
    State(pipeline): State<Arc<Pipeline>>,
    Extension(ctx): Extension<RequestContext>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ServerError> {
    let parsed = parse_audio_multipart(multipart).await?;
    let model = ModelId::new(parsed.model);
    let request = AudioRequest {
        upstream_model: String::new(),
        operation: AudioOperation::Transcribe,
        audio: parsed.audio,
        language: parsed.language,
        prompt: parsed.prompt,
    };
    dispatch_audio(&pipeline, &ctx, &model, request).await
}

/// `POST /v1/audio/translations`.
pub async fn translations(
    State(pipeline): State<Arc<Pipeline>>,
    Extension(ctx): Extension<RequestContext>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ServerError> {
    let parsed = parse_audio_multipart(multipart).await?;
    let model = ModelId::new(parsed.model);
    let request = AudioRequest {
        upstream_model: String::new(),
        operation: AudioOperation::Translate,
        audio: parsed.audio,
        language: parsed.language,
        prompt: parsed.prompt,
    };
    dispatch_audio(&pipeline, &ctx, &model, request).await
}

#[derive(Debug, Deserialize)]
pub struct SpeechBody {
    pub model: String,
    pub input: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub response_format: Option<String>,
    #[serde(default)]
    pub stream: bool,
}

/// `POST /v1/audio/speech`. Returns raw audio bytes, not a JSON envelope.
/// Streaming synthesis is rejected up front; the pipeline only implements
/// the buffered form.
pub async fn speech(
    State(pipeline): State<Arc<Pipeline>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<SpeechBody>,
) -> Result<Response, ServerError> {
    if body.stream {
        return Err(ServerError::NotImplemented("streaming audio synthesis is not supported".into()));
    }

    let model = ModelId::new(body.model);
    let request = TtsRequest {
        upstream_model: String::new(),
        text: body.input,
        voice: body.voice,
        format: body.response_format,
    };

    let outcome = pipeline.tts(&ctx, &model, request).await?;
    let mut budget = budget_headers(&outcome.budget_status);
    budget.insert(header::CONTENT_TYPE, outcome.content_type.parse().map_err(|_| {
        ServerError::BadRequest("provider returned an invalid content type".into())
    })?);
    Ok((budget, outcome.audio).into_response())
}
