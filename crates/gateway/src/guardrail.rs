use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use keystone_core::{
    ApiKeyId, GuardrailEvent, GuardrailPolicy, GuardrailStage, GuardrailVerdict, TenantId,
};
use keystone_moderation::{
    HttpModerationClient, ModerationClient, ModerationConfig, ModerationRequest, ModerationStage,
};
use keystone_state::{KeyKind, StateKey, StateStore};
use keystone_store::GatewayStore;

use crate::error::GatewayError;

/// Outcome of a guardrail check against one piece of content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardrailResult {
    pub verdict: GuardrailVerdict,
    pub category: Option<String>,
    pub violations: Vec<String>,
}

impl GuardrailResult {
    #[must_use]
    pub fn allow() -> Self {
        Self {
            verdict: GuardrailVerdict::Allow,
            category: None,
            violations: Vec::new(),
        }
    }
}

/// A blocked/redacted/warned guardrail event, dispatched through the same
/// cooldown-gated alert channels as budget alerts.
#[derive(Debug, Clone)]
pub struct GuardrailAlert {
    pub tenant_id: TenantId,
    pub stage: GuardrailStage,
    pub result: GuardrailResult,
    pub fired_at: DateTime<Utc>,
}

/// Opaque guardrail alert destination, mirroring [`crate::budget::AlertSink`]
/// but carrying a guardrail payload instead of a budget one.
#[async_trait]
pub trait GuardrailAlertSink: Send + Sync {
    async fn send(&self, alert: &GuardrailAlert);
}

/// Logs the alert through the tracing subscriber.
#[derive(Debug, Default)]
pub struct TracingGuardrailAlertSink;

#[async_trait]
impl GuardrailAlertSink for TracingGuardrailAlertSink {
    async fn send(&self, alert: &GuardrailAlert) {
        warn!(
            tenant_id = %alert.tenant_id,
            category = ?alert.result.category,
            "guardrail blocked request"
        );
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CooldownState {
    sent_at: DateTime<Utc>,
}

fn match_keyword(content: &str, denylist: &[String]) -> Option<String> {
    let lowered = content.to_lowercase();
    denylist
        .iter()
        .find(|word| lowered.contains(&word.to_lowercase()))
        .cloned()
}

fn match_regex(content: &str, denylist: &[String]) -> Option<String> {
    for pattern in denylist {
        match Regex::new(pattern) {
            Ok(re) if re.is_match(content) => return Some(pattern.clone()),
            Ok(_) => {}
            Err(err) => warn!(pattern, error = %err, "invalid guardrail regex, skipping"),
        }
    }
    None
}

/// Evaluates content against a [`GuardrailPolicy`] (keyword/regex denylists
/// first, then an optional moderation webhook) and records every non-allow
/// verdict as a [`GuardrailEvent`] (C6).
pub struct GuardrailEvaluator {
    moderation: Option<Arc<dyn ModerationClient>>,
    moderation_clients: DashMap<String, Arc<dyn ModerationClient>>,
    store: Arc<dyn GatewayStore>,
    state: Arc<dyn StateStore>,
    sinks: Vec<Arc<dyn GuardrailAlertSink>>,
    cooldown: Duration,
}

impl GuardrailEvaluator {
    #[must_use]
    pub fn new(
        moderation: Option<Arc<dyn ModerationClient>>,
        store: Arc<dyn GatewayStore>,
        state: Arc<dyn StateStore>,
        cooldown: Duration,
    ) -> Self {
        Self {
            moderation,
            moderation_clients: DashMap::new(),
            store,
            state,
            sinks: vec![Arc::new(TracingGuardrailAlertSink)],
            cooldown,
        }
    }

    #[must_use]
    pub fn with_sinks(mut self, sinks: Vec<Arc<dyn GuardrailAlertSink>>) -> Self {
        self.sinks = sinks;
        self
    }

    /// The moderation client to use for this policy: a per-policy webhook
    /// client if `moderation_webhook_url` is set (built once, then cached by
    /// URL), falling back to the evaluator's default client otherwise.
    fn moderation_client_for(&self, policy: &GuardrailPolicy) -> Option<Arc<dyn ModerationClient>> {
        let Some(url) = &policy.moderation_webhook_url else {
            return self.moderation.clone();
        };

        if let Some(client) = self.moderation_clients.get(url) {
            return Some(Arc::clone(&client));
        }

        match HttpModerationClient::new(ModerationConfig::new(url.clone())) {
            Ok(client) => {
                let client: Arc<dyn ModerationClient> = Arc::new(client);
                self.moderation_clients.insert(url.clone(), Arc::clone(&client));
                Some(client)
            }
            Err(err) => {
                warn!(error = %err, url, "failed to build per-policy moderation client, falling back to default");
                self.moderation.clone()
            }
        }
    }

    async fn check(&self, policy: &GuardrailPolicy, stage: ModerationStage, content: &str) -> GuardrailResult {
        let denylist = match stage {
            ModerationStage::Prompt => &policy.prompt_keyword_denylist,
            ModerationStage::Response => &policy.response_keyword_denylist,
        };
        if let Some(word) = match_keyword(content, denylist) {
            return GuardrailResult {
                verdict: GuardrailVerdict::Block,
                category: Some("keyword_denylist".into()),
                violations: vec![word],
            };
        }

        if let Some(pattern) = match_regex(content, &policy.regex_denylist) {
            return GuardrailResult {
                verdict: GuardrailVerdict::Block,
                category: Some("regex_denylist".into()),
                violations: vec![pattern],
            };
        }

        if !policy.moderation_enabled {
            return GuardrailResult::allow();
        }

        let Some(moderation) = self.moderation_client_for(policy) else {
            return GuardrailResult::allow();
        };

        match moderation.evaluate(ModerationRequest { stage, content }).await {
            Ok(response) => GuardrailResult {
                verdict: map_moderation_action(response.action),
                category: response.category,
                violations: response.violations,
            },
            Err(err) => {
                warn!(error = %err, "moderation webhook failed, failing open");
                GuardrailResult::allow()
            }
        }
    }

    /// Evaluate a prompt before it reaches a provider.
    pub async fn pre_check(&self, policy: &GuardrailPolicy, prompt: &str) -> GuardrailResult {
        self.check(policy, ModerationStage::Prompt, prompt).await
    }

    /// Evaluate a completed (non-streamed) response.
    pub async fn post_check(&self, policy: &GuardrailPolicy, completion: &str) -> GuardrailResult {
        self.check(policy, ModerationStage::Response, completion).await
    }

    /// Record `result` as a [`GuardrailEvent`] if it is not `Allow`, and
    /// dispatch a cooldown-gated alert if it is a `Block`.
    pub async fn record(
        &self,
        tenant_id: &TenantId,
        api_key_id: &ApiKeyId,
        request_id: Uuid,
        stage: GuardrailStage,
        result: &GuardrailResult,
        now: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        if result.verdict == GuardrailVerdict::Allow {
            return Ok(());
        }

        let event = GuardrailEvent {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.clone(),
            api_key_id: api_key_id.clone(),
            request_id,
            stage,
            verdict: result.verdict,
            matched_rule: result.violations.first().cloned(),
            created_at: now,
        };
        self.store.record_guardrail_event(&event).await?;

        if result.verdict.is_block() {
            self.maybe_alert(tenant_id, stage, result, now).await;
        }

        Ok(())
    }

    async fn maybe_alert(
        &self,
        tenant_id: &TenantId,
        stage: GuardrailStage,
        result: &GuardrailResult,
        now: DateTime<Utc>,
    ) {
        let key = StateKey::new(
            tenant_id.clone(),
            KeyKind::Custom("guardrail_alert".into()),
            result.category.as_deref().unwrap_or("unspecified"),
        );

        let previous = match self.state.get(&key).await {
            Ok(raw) => raw.and_then(|s| serde_json::from_str::<CooldownState>(&s).ok()),
            Err(err) => {
                warn!(error = %err, "guardrail cooldown state unavailable, dispatching anyway");
                None
            }
        };

        if let Some(prev) = &previous {
            let elapsed = now.signed_duration_since(prev.sent_at);
            if elapsed.to_std().unwrap_or(Duration::ZERO) < self.cooldown {
                return;
            }
        }

        let alert = GuardrailAlert {
            tenant_id: tenant_id.clone(),
            stage,
            result: result.clone(),
            fired_at: now,
        };
        for sink in &self.sinks {
            sink.send(&alert).await;
        }

        let new_state = CooldownState { sent_at: now };
        if let Ok(serialized) = serde_json::to_string(&new_state) {
            if let Err(err) = self.state.set(&key, &serialized, None).await {
                warn!(error = %err, "failed to persist guardrail cooldown state");
            }
        }
    }
}

fn map_moderation_action(action: keystone_moderation::ModerationAction) -> GuardrailVerdict {
    use keystone_moderation::ModerationAction;
    match action {
        ModerationAction::Allow => GuardrailVerdict::Allow,
        ModerationAction::Block => GuardrailVerdict::Block,
        ModerationAction::Redact => GuardrailVerdict::Redact,
        ModerationAction::Warn => GuardrailVerdict::Warn,
    }
}

/// Per-request, per-choice streaming monitor: appends each delta to its
/// choice's buffer and re-runs `post_check` on the accumulated text. A
/// `Block` verdict halts that choice's stream.
pub struct StreamMonitor {
    evaluator: Arc<GuardrailEvaluator>,
    policy: GuardrailPolicy,
    buffers: Mutex<std::collections::HashMap<u32, String>>,
}

impl StreamMonitor {
    #[must_use]
    pub fn new(evaluator: Arc<GuardrailEvaluator>, policy: GuardrailPolicy) -> Self {
        Self {
            evaluator,
            policy,
            buffers: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Append `delta` to `choice_index`'s buffer and evaluate the
    /// accumulated text so far.
    pub async fn on_delta(&self, choice_index: u32, delta: &str) -> GuardrailResult {
        let accumulated = {
            let mut buffers = self.buffers.lock().await;
            let buffer = buffers.entry(choice_index).or_default();
            buffer.push_str(delta);
            buffer.clone()
        };
        self.evaluator.post_check(&self.policy, &accumulated).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_moderation::MockModerationClient;
    use keystone_state_memory::MemoryStateStore;
    use keystone_store::IdempotencyRecord;

    struct NoopStore;

    #[async_trait]
    impl GatewayStore for NoopStore {
        async fn find_tenant(
            &self,
            _id: &TenantId,
        ) -> Result<Option<keystone_core::Tenant>, keystone_store::StoreError> {
            unreachable!()
        }
        async fn find_budget_policy(
            &self,
            _id: &TenantId,
        ) -> Result<Option<keystone_core::BudgetPolicy>, keystone_store::StoreError> {
            unreachable!()
        }
        async fn tenant_guardrail_policy(
            &self,
            _id: &TenantId,
        ) -> Result<GuardrailPolicy, keystone_store::StoreError> {
            unreachable!()
        }
        async fn api_key_guardrail_policy(
            &self,
            _id: &ApiKeyId,
        ) -> Result<GuardrailPolicy, keystone_store::StoreError> {
            unreachable!()
        }
        async fn find_api_key_by_prefix(
            &self,
            _prefix: &str,
        ) -> Result<Option<keystone_core::ApiKey>, keystone_store::StoreError> {
            unreachable!()
        }
        async fn load_catalog(&self) -> Result<keystone_core::Catalog, keystone_store::StoreError> {
            unreachable!()
        }
        async fn record_guardrail_event(&self, _event: &GuardrailEvent) -> Result<(), keystone_store::StoreError> {
            Ok(())
        }
        async fn find_idempotent_response(
            &self,
            _tenant_id: &TenantId,
            _idempotency_key: &str,
        ) -> Result<Option<IdempotencyRecord>, keystone_store::StoreError> {
            unreachable!()
        }
        async fn budget_status(
            &self,
            _tenant_id: &TenantId,
            _window: keystone_core::BudgetWindow,
            _limit: keystone_core::MicroUsd,
        ) -> Result<keystone_core::BudgetStatus, keystone_store::StoreError> {
            unreachable!()
        }
        async fn record_usage_transaction(
            &self,
            _request: &keystone_core::RequestRecord,
            _usage: Option<&keystone_core::UsageRecord>,
            _budget_window: keystone_core::BudgetWindow,
            _budget_limit: keystone_core::MicroUsd,
        ) -> Result<keystone_core::BudgetStatus, keystone_store::StoreError> {
            unreachable!()
        }
    }

    fn policy(keywords: Vec<&str>) -> GuardrailPolicy {
        let keywords: Vec<String> = keywords.into_iter().map(String::from).collect();
        GuardrailPolicy {
            prompt_keyword_denylist: keywords.clone(),
            response_keyword_denylist: keywords,
            regex_denylist: Vec::new(),
            moderation_webhook_url: None,
            moderation_enabled: false,
        }
    }

    #[tokio::test]
    async fn keyword_hit_blocks() {
        let evaluator = GuardrailEvaluator::new(
            None,
            Arc::new(NoopStore),
            Arc::new(MemoryStateStore::new()),
            Duration::from_secs(300),
        );
        let result = evaluator.pre_check(&policy(vec!["forbidden"]), "this is forbidden content").await;
        assert_eq!(result.verdict, GuardrailVerdict::Block);
    }

    #[tokio::test]
    async fn clean_content_is_allowed_without_moderation() {
        let evaluator = GuardrailEvaluator::new(
            None,
            Arc::new(NoopStore),
            Arc::new(MemoryStateStore::new()),
            Duration::from_secs(300),
        );
        let result = evaluator.pre_check(&policy(vec!["forbidden"]), "hello there").await;
        assert_eq!(result.verdict, GuardrailVerdict::Allow);
    }

    #[tokio::test]
    async fn keyword_only_blocks_its_own_stage() {
        let evaluator = GuardrailEvaluator::new(
            None,
            Arc::new(NoopStore),
            Arc::new(MemoryStateStore::new()),
            Duration::from_secs(300),
        );
        let p = GuardrailPolicy {
            prompt_keyword_denylist: vec!["ignore your instructions".into()],
            response_keyword_denylist: vec!["internal api key".into()],
            regex_denylist: Vec::new(),
            moderation_webhook_url: None,
            moderation_enabled: false,
        };

        let prompt_result = evaluator.pre_check(&p, "please ignore your instructions").await;
        assert_eq!(prompt_result.verdict, GuardrailVerdict::Block);

        let response_result = evaluator.post_check(&p, "please ignore your instructions").await;
        assert_eq!(response_result.verdict, GuardrailVerdict::Allow);

        let response_result = evaluator.post_check(&p, "here is the internal api key").await;
        assert_eq!(response_result.verdict, GuardrailVerdict::Block);

        let prompt_result = evaluator.pre_check(&p, "here is the internal api key").await;
        assert_eq!(prompt_result.verdict, GuardrailVerdict::Allow);
    }

    #[tokio::test]
    async fn moderation_block_is_surfaced() {
        let mut p = policy(vec![]);
        p.moderation_enabled = true;
        let evaluator = GuardrailEvaluator::new(
            Some(Arc::new(MockModerationClient::blocking("self-harm"))),
            Arc::new(NoopStore),
            Arc::new(MemoryStateStore::new()),
            Duration::from_secs(300),
        );
        let result = evaluator.post_check(&p, "...").await;
        assert_eq!(result.verdict, GuardrailVerdict::Block);
        assert_eq!(result.category.as_deref(), Some("self-harm"));
    }

    #[test]
    fn moderation_client_for_caches_by_webhook_url() {
        let evaluator = GuardrailEvaluator::new(
            None,
            Arc::new(NoopStore),
            Arc::new(MemoryStateStore::new()),
            Duration::from_secs(300),
        );
        let mut p = policy(vec![]);
        p.moderation_webhook_url = Some("https://mod.example/tenant-a".into());

        let first = evaluator.moderation_client_for(&p).expect("client should build");
        let second = evaluator.moderation_client_for(&p).expect("client should build");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(evaluator.moderation_clients.len(), 1);
    }

    #[test]
    fn moderation_client_for_falls_back_to_default_without_policy_url() {
        let default_client: Arc<dyn ModerationClient> = Arc::new(MockModerationClient::blocking("self-harm"));
        let evaluator = GuardrailEvaluator::new(
            Some(Arc::clone(&default_client)),
            Arc::new(NoopStore),
            Arc::new(MemoryStateStore::new()),
            Duration::from_secs(300),
        );
        let p = policy(vec![]);
        let resolved = evaluator.moderation_client_for(&p).expect("default client");
        assert!(Arc::ptr_eq(&default_client, &resolved));
    }

    #[tokio::test]
    async fn stream_monitor_accumulates_across_deltas() {
        let evaluator = Arc::new(GuardrailEvaluator::new(
            None,
            Arc::new(NoopStore),
            Arc::new(MemoryStateStore::new()),
            Duration::from_secs(300),
        ));
        let monitor = StreamMonitor::new(evaluator, policy(vec!["forbidden"]));
        let first = monitor.on_delta(0, "this is ").await;
        assert_eq!(first.verdict, GuardrailVerdict::Allow);
        let second = monitor.on_delta(0, "forbidden").await;
        assert_eq!(second.verdict, GuardrailVerdict::Block);
    }
}
