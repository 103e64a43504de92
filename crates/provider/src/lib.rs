pub mod error;
pub mod mock;
pub mod provider;
pub mod types;

pub use error::ProviderError;
pub use mock::EchoProvider;
pub use provider::{CancelHandle, ChatChunkStream, ChatStreamHandle, ProviderRoute};
pub use types::{
    AudioOperation, AudioRequest, AudioResponse, ChatChoice, ChatChunk, ChatMessage, ChatParams,
    ChatRequest, ChatResponse, EmbedRequest, EmbedResponse, ImageArtifact, ImageOperation,
    ImageRequest, ImageResponse, TokenUsage, TtsRequest, TtsResponse,
};
