use serde::{Deserialize, Serialize};

/// A single chat message in OpenAI's `{role, content}` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Sampling and shape parameters common to chat and chat-stream calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatParams {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub upstream_model: String,
    pub messages: Vec<ChatMessage>,
    pub params: ChatParams,
}

/// Authoritative token accounting. The provider layer either receives this
/// from the upstream or synthesizes zeros; the gateway never guesses.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    #[must_use]
    pub fn total(self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
    pub usage: TokenUsage,
}

/// One SSE-worthy increment of a streamed chat response.
///
/// At most one chunk in a stream carries `usage` (`delta` is empty on that
/// chunk unless the provider piggybacks it on the final delta); the
/// streaming engine captures the last non-`None` usage it sees regardless
/// of where it lands, per the spec's timing note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChunk {
    pub index: u32,
    pub delta_role: Option<String>,
    pub delta_content: Option<String>,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedRequest {
    pub upstream_model: String,
    pub inputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub vectors: Vec<Vec<f32>>,
    pub prompt_tokens: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageOperation {
    Generate,
    Edit,
    Variation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRequest {
    pub upstream_model: String,
    pub operation: ImageOperation,
    pub prompt: Option<String>,
    pub image: Option<Vec<u8>>,
    pub mask: Option<Vec<u8>>,
    pub count: u32,
    pub size: Option<String>,
}

/// One generated image, returned either inline or as a provider-hosted URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ImageArtifact {
    Base64(String),
    Url(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResponse {
    pub images: Vec<ImageArtifact>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioOperation {
    Transcribe,
    Translate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioRequest {
    pub upstream_model: String,
    pub operation: AudioOperation,
    pub audio: Vec<u8>,
    pub language: Option<String>,
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioResponse {
    pub text: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsRequest {
    pub upstream_model: String,
    pub text: String,
    pub voice: String,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsResponse {
    pub audio: Vec<u8>,
    pub content_type: String,
}
