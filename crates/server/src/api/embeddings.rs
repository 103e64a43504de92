use std::sync::Arc;

use axum::Json;
use axum::extract::{Extension, State};
use axum::response::IntoResponse;
use keystone_core::{ModelId, RequestContext};
use keystone_gateway::Pipeline;
use keystone_provider::EmbedRequest;
use serde::Deserialize;

use crate::api::headers::budget_headers;
use crate::error::ServerError;

/// `input` may be a single string or an array of strings, per the OpenAI
/// embeddings wire shape.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EmbeddingInput {
    One(String),
    Many(Vec<String>),
}

impl From<EmbeddingInput> for Vec<String> {
    fn from(input: EmbeddingInput) -> Self {
        match input {
            EmbeddingInput::One(s) => vec![s],
            EmbeddingInput::Many(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingsBody {
    pub model: String,
    pub input: EmbeddingInput,
}

/// `POST /v1/embeddings`.
pub async fn embeddings(
    State(pipeline): State<Arc<Pipeline>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<EmbeddingsBody>,
) -> Result<impl IntoResponse, ServerError> {
    let model = ModelId::new(body.model);
    let request = EmbedRequest {
        upstream_model: String::new(),
        inputs: body.input.into(),
    };

    let response = pipeline.embeddings(&ctx, &model, request).await?;
    let budget = budget_headers(&response.budget_status);
    Ok((budget, Json(response.body)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_string_input_becomes_one_element_vec() {
        let input: EmbeddingInput = serde_json::from_str("\"hello\"").unwrap();
        let vec: Vec<String> = input.into();
        assert_eq!(vec, vec!["hello".to_string()]);
    }

    #[test]
    fn array_input_passes_through() {
        let input: EmbeddingInput = serde_json::from_str("[\"a\", \"b\"]").unwrap();
        let vec: Vec<String> = input.into();
        assert_eq!(vec, vec!["a".to_string(), "b".to_string()]);
    }
}
