use async_trait::async_trait;

use crate::error::ModerationError;
use crate::evaluator::{ModerationClient, ModerationRequest, ModerationResponse};

/// A moderation client that always returns a configured response, for
/// exercising the guardrail evaluator without a live webhook.
#[derive(Debug, Clone)]
pub struct MockModerationClient {
    response: ModerationResponse,
}

impl MockModerationClient {
    #[must_use]
    pub fn allowing() -> Self {
        Self {
            response: ModerationResponse::allow(),
        }
    }

    #[must_use]
    pub fn blocking(category: impl Into<String>) -> Self {
        Self {
            response: ModerationResponse {
                action: crate::evaluator::ModerationAction::Block,
                category: Some(category.into()),
                violations: Vec::new(),
            },
        }
    }

    #[must_use]
    pub fn with_response(response: ModerationResponse) -> Self {
        Self { response }
    }
}

#[async_trait]
impl ModerationClient for MockModerationClient {
    async fn evaluate(
        &self,
        _request: ModerationRequest<'_>,
    ) -> Result<ModerationResponse, ModerationError> {
        Ok(self.response.clone())
    }
}

/// A moderation client that always fails, to exercise the evaluator's
/// fail-open path.
#[derive(Debug, Clone)]
pub struct FailingModerationClient {
    message: String,
}

impl FailingModerationClient {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl ModerationClient for FailingModerationClient {
    async fn evaluate(
        &self,
        _request: ModerationRequest<'_>,
    ) -> Result<ModerationResponse, ModerationError> {
        Err(ModerationError::Request(self.message.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::ModerationStage;

    #[tokio::test]
    async fn allowing_mock_allows() {
        let client = MockModerationClient::allowing();
        let result = client
            .evaluate(ModerationRequest {
                stage: ModerationStage::Prompt,
                content: "hello",
            })
            .await
            .unwrap();
        assert!(!result.action.is_block());
    }

    #[tokio::test]
    async fn blocking_mock_blocks_with_category() {
        let client = MockModerationClient::blocking("self-harm");
        let result = client
            .evaluate(ModerationRequest {
                stage: ModerationStage::Response,
                content: "...",
            })
            .await
            .unwrap();
        assert!(result.action.is_block());
        assert_eq!(result.category.as_deref(), Some("self-harm"));
    }

    #[tokio::test]
    async fn failing_mock_errors() {
        let client = FailingModerationClient::new("unreachable");
        let result = client
            .evaluate(ModerationRequest {
                stage: ModerationStage::Prompt,
                content: "x",
            })
            .await;
        assert!(result.is_err());
    }
}
