use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ApiKeyId, TenantId};

/// The verdict a guardrail evaluator produces for a piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailVerdict {
    Allow,
    Block,
    Redact,
    Warn,
}

impl GuardrailVerdict {
    #[must_use]
    pub fn is_block(self) -> bool {
        matches!(self, Self::Block)
    }
}

/// One level of guardrail policy inheritance. Narrower scopes override
/// broader ones field-by-field: an api-key policy that leaves
/// `prompt_keyword_denylist` empty inherits the tenant's list rather than
/// suppressing it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardrailPolicy {
    /// Keywords checked against the incoming prompt, before it reaches a
    /// provider.
    pub prompt_keyword_denylist: Vec<String>,
    /// Keywords checked against the completion, once it (or an accumulated
    /// streaming buffer) is available.
    pub response_keyword_denylist: Vec<String>,
    pub regex_denylist: Vec<String>,
    pub moderation_webhook_url: Option<String>,
    pub moderation_enabled: bool,
}

impl GuardrailPolicy {
    /// Merge `global_default < tenant < api_key`, with `self` as the
    /// narrower (higher-precedence) policy and `base` as the broader one.
    #[must_use]
    pub fn merged_over(mut self, base: &GuardrailPolicy) -> Self {
        if self.prompt_keyword_denylist.is_empty() {
            self.prompt_keyword_denylist = base.prompt_keyword_denylist.clone();
        }
        if self.response_keyword_denylist.is_empty() {
            self.response_keyword_denylist = base.response_keyword_denylist.clone();
        }
        if self.regex_denylist.is_empty() {
            self.regex_denylist = base.regex_denylist.clone();
        }
        if self.moderation_webhook_url.is_none() {
            self.moderation_webhook_url = base.moderation_webhook_url.clone();
        }
        if !self.moderation_enabled {
            self.moderation_enabled = base.moderation_enabled;
        }
        self
    }
}

/// Stage of the request pipeline at which a guardrail evaluation ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailStage {
    PreRequest,
    StreamingMonitor,
}

/// A recorded guardrail decision, persisted for audit regardless of verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailEvent {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub api_key_id: ApiKeyId,
    pub request_id: Uuid,
    pub stage: GuardrailStage,
    pub verdict: GuardrailVerdict,
    pub matched_rule: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrower_policy_inherits_empty_fields_from_broader() {
        let tenant_policy = GuardrailPolicy {
            prompt_keyword_denylist: vec!["drop table".into()],
            response_keyword_denylist: vec![],
            regex_denylist: vec![],
            moderation_webhook_url: Some("https://mod.example/check".into()),
            moderation_enabled: true,
        };
        let key_policy = GuardrailPolicy {
            prompt_keyword_denylist: vec![],
            response_keyword_denylist: vec![],
            regex_denylist: vec!["(?i)ignore.*instructions".into()],
            moderation_webhook_url: None,
            moderation_enabled: false,
        };

        let effective = key_policy.merged_over(&tenant_policy);
        assert_eq!(effective.prompt_keyword_denylist, vec!["drop table".to_string()]);
        assert_eq!(
            effective.regex_denylist,
            vec!["(?i)ignore.*instructions".to_string()]
        );
        assert_eq!(
            effective.moderation_webhook_url,
            Some("https://mod.example/check".to_string())
        );
        assert!(effective.moderation_enabled);
    }

    #[test]
    fn narrower_policy_own_values_take_precedence() {
        let tenant_policy = GuardrailPolicy {
            prompt_keyword_denylist: vec!["broad".into()],
            ..Default::default()
        };
        let key_policy = GuardrailPolicy {
            prompt_keyword_denylist: vec!["narrow".into()],
            ..Default::default()
        };
        let effective = key_policy.merged_over(&tenant_policy);
        assert_eq!(effective.prompt_keyword_denylist, vec!["narrow".to_string()]);
    }

    #[test]
    fn stage_specific_denylists_stay_independent() {
        let tenant_policy = GuardrailPolicy {
            prompt_keyword_denylist: vec!["jailbreak".into()],
            response_keyword_denylist: vec!["leaked-secret".into()],
            ..Default::default()
        };
        let key_policy = GuardrailPolicy::default().merged_over(&tenant_policy);
        assert_eq!(key_policy.prompt_keyword_denylist, vec!["jailbreak".to_string()]);
        assert_eq!(key_policy.response_keyword_denylist, vec!["leaked-secret".to_string()]);
    }
}
