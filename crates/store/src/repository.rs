use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use keystone_core::{
    ApiKey, ApiKeyId, BudgetPolicy, BudgetStatus, BudgetWindow, Catalog, GuardrailEvent,
    GuardrailPolicy, RequestRecord, Tenant, TenantId, UsageRecord,
};

use crate::error::StoreError;

/// A cached idempotent response, replayed verbatim for a retried request
/// carrying the same `Idempotency-Key` within the same tenant.
#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub request_id: Uuid,
    pub outcome: String,
    pub status_code: u16,
    pub created_at: DateTime<Utc>,
}

/// Persistence boundary consumed by the request pipeline.
///
/// Lookups (`find_tenant`, `find_api_key_by_prefix`, `load_catalog`) are
/// read paths hit on every request; implementations are expected to sit
/// behind whatever caching the caller layers on top. `record_usage_transaction`
/// is the sole write path that must be atomic: request row, usage row, and
/// budget-window delta land in one transaction or none do.
#[async_trait]
pub trait GatewayStore: Send + Sync {
    async fn find_tenant(&self, id: &TenantId) -> Result<Option<Tenant>, StoreError>;

    async fn find_budget_policy(&self, id: &TenantId) -> Result<Option<BudgetPolicy>, StoreError>;

    /// The tenant-level guardrail overlay, or an empty policy if none was set.
    async fn tenant_guardrail_policy(&self, id: &TenantId) -> Result<GuardrailPolicy, StoreError>;

    /// The api-key-level guardrail overlay, or an empty policy if none was set.
    async fn api_key_guardrail_policy(
        &self,
        id: &ApiKeyId,
    ) -> Result<GuardrailPolicy, StoreError>;

    async fn find_api_key_by_prefix(&self, prefix: &str) -> Result<Option<ApiKey>, StoreError>;

    async fn load_catalog(&self) -> Result<Catalog, StoreError>;

    async fn record_guardrail_event(&self, event: &GuardrailEvent) -> Result<(), StoreError>;

    async fn find_idempotent_response(
        &self,
        tenant_id: &TenantId,
        idempotency_key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError>;

    /// Read-only projection of a tenant's current spend against `window`,
    /// without performing a write. Used by the budget status surface and by
    /// the rate-limit/budget coordinator's pre-flight check.
    async fn budget_status(
        &self,
        tenant_id: &TenantId,
        window: BudgetWindow,
        limit: keystone_core::MicroUsd,
    ) -> Result<BudgetStatus, StoreError>;

    /// Commit one request's outcome atomically: the request log row, an
    /// optional usage row (absent for requests that never reached a
    /// provider), and the budget-window delta, returning the resulting
    /// [`BudgetStatus`].
    async fn record_usage_transaction(
        &self,
        request: &RequestRecord,
        usage: Option<&UsageRecord>,
        budget_window: BudgetWindow,
        budget_limit: keystone_core::MicroUsd,
    ) -> Result<BudgetStatus, StoreError>;
}
