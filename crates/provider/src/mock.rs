use async_trait::async_trait;
use futures::stream;
use tracing::debug;

use crate::error::ProviderError;
use crate::provider::{CancelHandle, ChatStreamHandle, ProviderRoute};
use crate::types::{
    ChatChoice, ChatChunk, ChatMessage, ChatRequest, ChatResponse, EmbedRequest, EmbedResponse,
    TokenUsage,
};

/// An echo provider that fabricates deterministic responses without making
/// any network call. Useful for local development and as the default route
/// in tests that exercise the request pipeline rather than a specific
/// upstream's wire format — concrete provider adapters (Azure/OpenAI/
/// Anthropic/Bedrock/Vertex) are external collaborators outside this crate.
#[derive(Debug, Clone)]
pub struct EchoProvider {
    name: String,
}

impl EchoProvider {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn token_count(text: &str) -> u64 {
        text.split_whitespace().count() as u64
    }
}

#[async_trait]
impl ProviderRoute for EchoProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        debug!(provider = %self.name, model = %request.upstream_model, "echo chat");
        let prompt_tokens = request
            .messages
            .iter()
            .map(|m| Self::token_count(&m.content))
            .sum();
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map_or_else(String::new, |m| m.content.clone());
        let content = format!("echo: {last_user}");
        let completion_tokens = Self::token_count(&content);

        Ok(ChatResponse {
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage {
                    role: "assistant".into(),
                    content,
                },
                finish_reason: Some("stop".into()),
            }],
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
            },
        })
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStreamHandle, ProviderError> {
        let response = self.chat(request).await?;
        let choice = response.choices.into_iter().next();
        let words: Vec<String> = choice
            .as_ref()
            .map(|c| {
                c.message
                    .content
                    .split(' ')
                    .map(std::string::ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let usage = response.usage;

        let mut chunks: Vec<Result<ChatChunk, ProviderError>> = words
            .into_iter()
            .enumerate()
            .map(|(i, word)| {
                Ok(ChatChunk {
                    index: 0,
                    delta_role: (i == 0).then(|| "assistant".to_string()),
                    delta_content: Some(format!("{word} ")),
                    finish_reason: None,
                    usage: None,
                })
            })
            .collect();
        chunks.push(Ok(ChatChunk {
            index: 0,
            delta_role: None,
            delta_content: None,
            finish_reason: Some("stop".into()),
            usage: Some(usage),
        }));

        Ok(ChatStreamHandle {
            chunks: Box::pin(stream::iter(chunks)),
            cancel: CancelHandle::new(),
        })
    }

    async fn embed(&self, request: EmbedRequest) -> Result<EmbedResponse, ProviderError> {
        let prompt_tokens = request.inputs.iter().map(|s| Self::token_count(s)).sum();
        let vectors = request
            .inputs
            .iter()
            .map(|s| {
                let hash = s.bytes().fold(0u32, |acc, b| acc.wrapping_add(u32::from(b)));
                vec![(hash % 1000) as f32 / 1000.0; 8]
            })
            .collect();
        Ok(EmbedResponse {
            vectors,
            prompt_tokens,
        })
    }
}
