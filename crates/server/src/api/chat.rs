use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::Json;
use axum::extract::{Extension, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::{Stream, StreamExt};
use keystone_core::{ModelId, RequestContext};
use keystone_gateway::{Pipeline, StreamEvent, chat_chunk_body};
use keystone_provider::{CancelHandle, ChatMessage, ChatParams, ChatRequest};
use serde::Deserialize;
use serde_json::json;

use crate::api::headers::budget_headers;
use crate::error::ServerError;

#[derive(Debug, Deserialize)]
pub struct ChatCompletionBody {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Vec<String>,
    #[serde(default)]
    pub stream: bool,
}

impl From<ChatCompletionBody> for ChatRequest {
    fn from(body: ChatCompletionBody) -> Self {
        ChatRequest {
            upstream_model: String::new(),
            messages: body.messages,
            params: ChatParams {
                temperature: body.temperature,
                top_p: body.top_p,
                max_tokens: body.max_tokens,
                stop: body.stop,
            },
        }
    }
}

/// `POST /v1/chat/completions`, dispatching to the streaming or
/// non-streaming pipeline method depending on `stream`.
pub async fn chat_completions(
    State(pipeline): State<Arc<Pipeline>>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    Json(body): Json<ChatCompletionBody>,
) -> Result<Response, ServerError> {
    let model = ModelId::new(body.model.clone());
    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if body.stream {
        return chat_completions_stream(pipeline, ctx, model, body.into(), idempotency_key).await;
    }

    let request: ChatRequest = body.into();
    let response = pipeline
        .chat_completions(&ctx, &model, request, idempotency_key.as_deref())
        .await?;

    let budget = budget_headers(&response.budget_status);
    Ok((budget, Json(response.body)).into_response())
}

async fn chat_completions_stream(
    pipeline: Arc<Pipeline>,
    ctx: RequestContext,
    model: ModelId,
    request: ChatRequest,
    idempotency_key: Option<String>,
) -> Result<Response, ServerError> {
    let (stream, cancel) = pipeline
        .chat_completions_stream(&ctx, &model, request, idempotency_key.as_deref())
        .await?;
    let request_id = ctx.request_id;

    let events = CancelOnDrop {
        inner: Box::pin(stream),
        cancel,
    }
    .map(move |event| {
        let sse_event = match event {
            StreamEvent::Chunk(chunk) => {
                let body = chat_chunk_body(request_id, &model, &chunk);
                Event::default().data(body.to_string())
            }
            StreamEvent::Blocked { category } => {
                let body = json!({
                    "error": {
                        "message": category.unwrap_or_else(|| "blocked".to_string()),
                        "code": "guardrail_blocked",
                    }
                });
                Event::default().data(body.to_string())
            }
            StreamEvent::Done => Event::default().data("[DONE]"),
        };
        Ok::<_, Infallible>(sse_event)
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()).into_response())
}

/// Flips `cancel` when the stream is dropped, whether from normal
/// completion or the client disconnecting mid-stream.
struct CancelOnDrop<S> {
    inner: Pin<Box<S>>,
    cancel: CancelHandle,
}

impl<S: Stream + Unpin> Stream for CancelOnDrop<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.inner.as_mut().poll_next(cx)
    }
}

impl<S> Drop for CancelOnDrop<S> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
