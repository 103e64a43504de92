use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use keystone_core::{BudgetStatus, BudgetWindow, MicroUsd, RequestOutcome, RequestRecord, TenantId, UsageRecord};
use keystone_state::{KeyKind, StateKey, StateStore};
use keystone_store::GatewayStore;

use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;

/// TTL for the idempotency fast-path cache, checked before any provider
/// call on a request carrying an `Idempotency-Key` header.
const IDEMPOTENCY_TTL: Duration = Duration::from_secs(30 * 60);

/// A cached response body, keyed by `(tenant, idempotency-key)` and replayed
/// verbatim on a retried request within the TTL window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status_code: u16,
    pub body: serde_json::Value,
}

fn idempotency_state_key(tenant_id: &TenantId, idempotency_key: &str) -> StateKey {
    StateKey::new(tenant_id.clone(), KeyKind::Idempotency, idempotency_key)
}

/// Ties the durable usage transaction, the idempotency fast-path cache, and
/// metrics emission together (C8).
pub struct UsagePipeline {
    store: Arc<dyn GatewayStore>,
    state: Arc<dyn StateStore>,
    metrics: Arc<GatewayMetrics>,
}

impl UsagePipeline {
    #[must_use]
    pub fn new(store: Arc<dyn GatewayStore>, state: Arc<dyn StateStore>, metrics: Arc<GatewayMetrics>) -> Self {
        Self { store, state, metrics }
    }

    /// Look up a cached response for `idempotency_key`, if one is still
    /// within its TTL. KV errors are treated as a cache miss rather than a
    /// hard failure — the request simply proceeds to the provider.
    pub async fn cached_response(
        &self,
        tenant_id: &TenantId,
        idempotency_key: &str,
    ) -> Option<CachedResponse> {
        let key = idempotency_state_key(tenant_id, idempotency_key);
        match self.state.get(&key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, "idempotency cache unavailable, treating as miss");
                None
            }
        }
    }

    /// Cache `response` for replay within the idempotency TTL. Best-effort:
    /// failures are logged, never surfaced, since the durable request/usage
    /// rows are the authoritative record.
    pub async fn cache_response(&self, tenant_id: &TenantId, idempotency_key: &str, response: &CachedResponse) {
        let key = idempotency_state_key(tenant_id, idempotency_key);
        let Ok(serialized) = serde_json::to_string(response) else {
            warn!("failed to serialize idempotent response for caching");
            return;
        };
        if let Err(err) = self.state.set(&key, &serialized, Some(IDEMPOTENCY_TTL)).await {
            warn!(error = %err, "failed to cache idempotent response");
        }
    }

    /// Commit the request/usage/budget-window delta in one transaction and
    /// emit metrics for the outcome.
    #[instrument(skip(self, request, usage), fields(request_id = %request.id, tenant_id = %request.tenant_id))]
    pub async fn record(
        &self,
        request: &RequestRecord,
        usage: Option<&UsageRecord>,
        budget_window: BudgetWindow,
        budget_limit: MicroUsd,
    ) -> Result<BudgetStatus, GatewayError> {
        let status = self
            .store
            .record_usage_transaction(request, usage, budget_window, budget_limit)
            .await?;

        self.metrics.increment_requests_total();
        match request.outcome {
            RequestOutcome::Success => self.metrics.increment_requests_succeeded(),
            RequestOutcome::RateLimited => self.metrics.increment_rate_limited(),
            RequestOutcome::BudgetExceeded => self.metrics.increment_budget_exceeded(),
            RequestOutcome::GuardrailBlocked => self.metrics.increment_guardrail_blocked(),
            RequestOutcome::ClientError | RequestOutcome::UpstreamError | RequestOutcome::Cancelled => {
                self.metrics.increment_requests_failed();
            }
        }

        if let Some(usage) = usage {
            self.metrics.add_tokens(usage.total_tokens());
            self.metrics.add_cost_micros(usage.cost_micros.0);
        }

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_state_memory::MemoryStateStore;
    use keystone_store::IdempotencyRecord;

    struct NoopStore;

    #[async_trait::async_trait]
    impl keystone_store::GatewayStore for NoopStore {
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
        ) -> Result<keystone_core::GuardrailPolicy, keystone_store::StoreError> {
            unreachable!()
        }
        async fn api_key_guardrail_policy(
            &self,
            _id: &keystone_core::ApiKeyId,
        ) -> Result<keystone_core::GuardrailPolicy, keystone_store::StoreError> {
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
        async fn record_guardrail_event(
            &self,
            _event: &keystone_core::GuardrailEvent,
        ) -> Result<(), keystone_store::StoreError> {
            unreachable!()
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
            _window: BudgetWindow,
            _limit: MicroUsd,
        ) -> Result<BudgetStatus, keystone_store::StoreError> {
            unreachable!()
        }
        async fn record_usage_transaction(
            &self,
            request: &RequestRecord,
            _usage: Option<&UsageRecord>,
            _budget_window: BudgetWindow,
            budget_limit: MicroUsd,
        ) -> Result<BudgetStatus, keystone_store::StoreError> {
            Ok(BudgetStatus {
                tenant_id: request.tenant_id.clone(),
                window: BudgetWindow::CalendarMonth,
                used: MicroUsd(0),
                limit: budget_limit,
                remaining: budget_limit,
                resets_at: request.created_at,
            })
        }
    }

    #[tokio::test]
    async fn cache_round_trips_through_state_store() {
        let pipeline = UsagePipeline::new(
            Arc::new(NoopStore),
            Arc::new(MemoryStateStore::new()),
            Arc::new(GatewayMetrics::default()),
        );
        let tenant = TenantId::new("acme");
        assert!(pipeline.cached_response(&tenant, "req-1").await.is_none());

        let response = CachedResponse {
            status_code: 200,
            body: serde_json::json!({"ok": true}),
        };
        pipeline.cache_response(&tenant, "req-1", &response).await;

        let cached = pipeline.cached_response(&tenant, "req-1").await.unwrap();
        assert_eq!(cached.status_code, 200);
    }

    #[tokio::test]
    async fn record_increments_metrics_on_success() {
        let metrics = Arc::new(GatewayMetrics::default());
        let pipeline = UsagePipeline::new(
            Arc::new(NoopStore),
            Arc::new(MemoryStateStore::new()),
            metrics.clone(),
        );
        let request = RequestRecord {
            id: uuid::Uuid::new_v4(),
            tenant_id: TenantId::new("acme"),
            api_key_id: keystone_core::ApiKeyId::new("key_1"),
            model: Some(keystone_core::ModelId::new("gpt-test")),
            endpoint: "/v1/chat/completions".into(),
            outcome: RequestOutcome::Success,
            status_code: 200,
            latency_ms: 42,
            idempotency_key: None,
            created_at: chrono::Utc::now(),
        };
        let status = pipeline
            .record(&request, None, BudgetWindow::CalendarMonth, MicroUsd(100_000))
            .await
            .unwrap();
        assert_eq!(status.limit, MicroUsd(100_000));
        assert_eq!(metrics.snapshot().requests_succeeded, 1);
    }
}
