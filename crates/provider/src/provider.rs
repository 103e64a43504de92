use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::Stream;

use crate::error::ProviderError;
use crate::types::{
    AudioRequest, AudioResponse, ChatChunk, ChatRequest, ChatResponse, EmbedRequest, EmbedResponse,
    ImageRequest, ImageResponse, TtsRequest, TtsResponse,
};

pub type ChatChunkStream = Pin<Box<dyn Stream<Item = Result<ChatChunk, ProviderError>> + Send>>;

/// Cooperative cancellation signal handed to a streaming chat call.
///
/// Cloning shares the same flag; the streaming engine holds one clone and
/// flips it on client disconnect or ambient cancellation, the adapter
/// polls the other clone between chunks and stops producing once set.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A streamed chat call: the chunk sequence plus the handle used to abort it.
pub struct ChatStreamHandle {
    pub chunks: ChatChunkStream,
    pub cancel: CancelHandle,
}

/// One upstream implementation of a public model name.
///
/// Every method defaults to `Unsupported`; a concrete adapter overrides only
/// the capabilities its upstream actually offers. The router consults the
/// capability list declared in the catalog (`Route::supports`) before ever
/// calling these, so a well-formed catalog never hits the default path in
/// steady state — it exists as a safety net and for adapters under active
/// development.
#[async_trait]
pub trait ProviderRoute: Send + Sync {
    /// Stable identifier used in logs and request records.
    fn name(&self) -> &str;

    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        Err(ProviderError::Unsupported("chat".into()))
    }

    async fn chat_stream(&self, _request: ChatRequest) -> Result<ChatStreamHandle, ProviderError> {
        Err(ProviderError::Unsupported("chat_stream".into()))
    }

    async fn embed(&self, _request: EmbedRequest) -> Result<EmbedResponse, ProviderError> {
        Err(ProviderError::Unsupported("embed".into()))
    }

    async fn image(&self, _request: ImageRequest) -> Result<ImageResponse, ProviderError> {
        Err(ProviderError::Unsupported("image".into()))
    }

    async fn audio(&self, _request: AudioRequest) -> Result<AudioResponse, ProviderError> {
        Err(ProviderError::Unsupported("audio".into()))
    }

    async fn tts(&self, _request: TtsRequest) -> Result<TtsResponse, ProviderError> {
        Err(ProviderError::Unsupported("tts".into()))
    }

    /// Background-prober health check, invoked on `health_interval` by the
    /// router's recovery prober for `Offline` routes.
    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare;

    #[async_trait]
    impl ProviderRoute for Bare {
        fn name(&self) -> &str {
            "bare"
        }
    }

    #[tokio::test]
    async fn unimplemented_capability_is_unsupported() {
        let route = Bare;
        let err = route
            .chat(ChatRequest {
                upstream_model: "m".into(),
                messages: vec![],
                params: Default::default(),
            })
            .await
            .unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn cancel_handle_reflects_across_clones() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_cancelled());
        handle.cancel();
        assert!(clone.is_cancelled());
    }
}
