use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::ModerationConfig;
use crate::error::ModerationError;
use crate::evaluator::{ModerationClient, ModerationRequest, ModerationResponse};

/// HTTP moderation client that posts `{stage, content}` to a configured
/// webhook and parses `{action, category?, violations[]}` back.
#[derive(Debug)]
pub struct HttpModerationClient {
    client: reqwest::Client,
    config: ModerationConfig,
}

impl HttpModerationClient {
    /// Build a client, failing if the timeout cannot be represented.
    ///
    /// # Errors
    ///
    /// Returns [`ModerationError::Configuration`] if the underlying HTTP
    /// client fails to build.
    pub fn new(config: ModerationConfig) -> Result<Self, ModerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ModerationError::Configuration(e.to_string()))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl ModerationClient for HttpModerationClient {
    async fn evaluate(
        &self,
        request: ModerationRequest<'_>,
    ) -> Result<ModerationResponse, ModerationError> {
        debug!(url = %self.config.url, stage = ?request.stage, "invoking moderation webhook");

        let mut builder = self.client.post(&self.config.url).json(&request);
        if let (Some(header), Some(value)) = (&self.config.header, &self.config.value) {
            builder = builder.header(header, value);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ModerationError::Timeout(self.config.timeout_ms)
            } else {
                ModerationError::Request(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(status, "moderation webhook returned non-success status");
            return Err(ModerationError::BadStatus { status, body });
        }

        response
            .json::<ModerationResponse>()
            .await
            .map_err(|e| ModerationError::ParseError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_configured_timeout() {
        let config = ModerationConfig::new("https://mod.example/check").with_timeout_ms(1_500);
        let client = HttpModerationClient::new(config);
        assert!(client.is_ok());
    }
}
