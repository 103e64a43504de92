use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModerationError;

/// Which stage of the request pipeline produced the content under review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationStage {
    Prompt,
    Response,
}

/// The moderation action a webhook (or keyword filter) can return.
///
/// `Redact` and `Warn` are accepted from the wire but the streaming monitor
/// only special-cases `Block`; `Redact`/`Warn` are recorded as guardrail
/// events and otherwise treated as allow, matching the spec's "every
/// non-allow result is recorded" rule without adding content-rewriting
/// machinery beyond what this phase calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    Allow,
    Block,
    Redact,
    Warn,
}

impl ModerationAction {
    #[must_use]
    pub fn is_block(self) -> bool {
        matches!(self, Self::Block)
    }
}

/// Request body sent to the moderation webhook: `{stage, content}`.
#[derive(Debug, Clone, Serialize)]
pub struct ModerationRequest<'a> {
    pub stage: ModerationStage,
    pub content: &'a str,
}

/// Response parsed from the moderation webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationResponse {
    pub action: ModerationAction,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub violations: Vec<String>,
}

impl ModerationResponse {
    #[must_use]
    pub fn allow() -> Self {
        Self {
            action: ModerationAction::Allow,
            category: None,
            violations: Vec::new(),
        }
    }
}

/// Synchronous, bounded-timeout client for an external moderation provider.
///
/// Implementations must themselves enforce the configured timeout; the
/// caller (the guardrail evaluator) treats any `Err` as fail-open and logs
/// it rather than propagating a block.
#[async_trait]
pub trait ModerationClient: Send + Sync + std::fmt::Debug {
    async fn evaluate(
        &self,
        request: ModerationRequest<'_>,
    ) -> Result<ModerationResponse, ModerationError>;
}
