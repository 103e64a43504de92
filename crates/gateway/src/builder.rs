use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use keystone_core::{BudgetWindow, Catalog, HealthThresholds, MicroUsd, ProviderId, RateLimits};
use keystone_moderation::ModerationClient;
use keystone_provider::ProviderRoute;
use keystone_state::StateStore;
use keystone_store::GatewayStore;

use crate::budget::{AlertSink, BudgetLedger};
use crate::context::ContextResolver;
use crate::error::GatewayError;
use crate::guardrail::{GuardrailAlertSink, GuardrailEvaluator};
use crate::metrics::GatewayMetrics;
use crate::pipeline::Pipeline;
use crate::rate_limit::RateLimitCoordinator;
use crate::router::RouterEngine;
use crate::usage::UsagePipeline;

/// Health probe cadence, independent of [`HealthThresholds`]'s own
/// consecutive-failure counters.
const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_BUDGET_COOLDOWN: Duration = Duration::from_secs(300);
const DEFAULT_GUARDRAIL_COOLDOWN: Duration = Duration::from_secs(300);

/// Fluent builder for constructing a [`Pipeline`].
///
/// At minimum, a [`GatewayStore`] and [`StateStore`] implementation must be
/// supplied. All other fields have sensible defaults: no providers
/// registered, an empty catalog, no moderation webhook, and the spec's
/// default rate-limit/budget ceilings.
pub struct PipelineBuilder {
    store: Option<Arc<dyn GatewayStore>>,
    state: Option<Arc<dyn StateStore>>,
    catalog: Catalog,
    providers: HashMap<ProviderId, Arc<dyn ProviderRoute>>,
    moderation: Option<Arc<dyn ModerationClient>>,
    health_thresholds: HealthThresholds,
    health_interval: Duration,
    budget_cooldown: Duration,
    budget_alert_sinks: Vec<Arc<dyn AlertSink>>,
    guardrail_cooldown: Duration,
    guardrail_alert_sinks: Vec<Arc<dyn GuardrailAlertSink>>,
    default_rate_limits: RateLimits,
    default_tenant_rate_limits: RateLimits,
    default_budget_window: BudgetWindow,
    default_budget_limit: MicroUsd,
    default_budget_thresholds: Vec<f64>,
}

impl PipelineBuilder {
    /// Create a new builder with all optional fields set to their defaults.
    pub fn new() -> Self {
        Self {
            store: None,
            state: None,
            catalog: Catalog { routes: Vec::new() },
            providers: HashMap::new(),
            moderation: None,
            health_thresholds: HealthThresholds::default(),
            health_interval: DEFAULT_HEALTH_INTERVAL,
            budget_cooldown: DEFAULT_BUDGET_COOLDOWN,
            budget_alert_sinks: Vec::new(),
            guardrail_cooldown: DEFAULT_GUARDRAIL_COOLDOWN,
            guardrail_alert_sinks: Vec::new(),
            default_rate_limits: RateLimits::default(),
            default_tenant_rate_limits: RateLimits::default(),
            default_budget_window: BudgetWindow::CalendarMonth,
            default_budget_limit: MicroUsd::ZERO,
            default_budget_thresholds: vec![0.5, 0.8, 1.0],
        }
    }

    /// Set the gateway's persistent store (tenants, keys, usage, budgets).
    #[must_use]
    pub fn store(mut self, store: Arc<dyn GatewayStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the KV state store backing rate limiting and idempotency caching.
    #[must_use]
    pub fn state(mut self, state: Arc<dyn StateStore>) -> Self {
        self.state = Some(state);
        self
    }

    /// Seed the router's initial route catalog. Call [`RouterEngine::reload`]
    /// later to refresh it without restarting the gateway.
    #[must_use]
    pub fn catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Register a provider adapter under `id`.
    #[must_use]
    pub fn provider(mut self, id: ProviderId, provider: Arc<dyn ProviderRoute>) -> Self {
        self.providers.insert(id, provider);
        self
    }

    /// Set the moderation webhook client used by the guardrail evaluator.
    #[must_use]
    pub fn moderation(mut self, client: Arc<dyn ModerationClient>) -> Self {
        self.moderation = Some(client);
        self
    }

    /// Override the route health state machine's failure thresholds.
    #[must_use]
    pub fn health_thresholds(mut self, thresholds: HealthThresholds) -> Self {
        self.health_thresholds = thresholds;
        self
    }

    /// Override the background health-prober's polling interval.
    #[must_use]
    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    /// Override the minimum interval between repeated budget alerts of the
    /// same level.
    #[must_use]
    pub fn budget_cooldown(mut self, cooldown: Duration) -> Self {
        self.budget_cooldown = cooldown;
        self
    }

    /// Replace the default tracing-only budget alert sink.
    #[must_use]
    pub fn budget_alert_sinks(mut self, sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        self.budget_alert_sinks = sinks;
        self
    }

    /// Override the minimum interval between repeated guardrail alerts.
    #[must_use]
    pub fn guardrail_cooldown(mut self, cooldown: Duration) -> Self {
        self.guardrail_cooldown = cooldown;
        self
    }

    /// Replace the default tracing-only guardrail alert sink.
    #[must_use]
    pub fn guardrail_alert_sinks(mut self, sinks: Vec<Arc<dyn GuardrailAlertSink>>) -> Self {
        self.guardrail_alert_sinks = sinks;
        self
    }

    /// Set the per-key rate limits applied when an api key has none of its
    /// own configured.
    #[must_use]
    pub fn default_rate_limits(mut self, limits: RateLimits) -> Self {
        self.default_rate_limits = limits;
        self
    }

    /// Set the tenant-wide rate limits merged in alongside the per-key scope.
    #[must_use]
    pub fn default_tenant_rate_limits(mut self, limits: RateLimits) -> Self {
        self.default_tenant_rate_limits = limits;
        self
    }

    /// Set the budget window and ceiling applied to a tenant with no
    /// explicit [`keystone_core::BudgetPolicy`] on file.
    #[must_use]
    pub fn default_budget(mut self, window: BudgetWindow, limit: MicroUsd) -> Self {
        self.default_budget_window = window;
        self.default_budget_limit = limit;
        self
    }

    /// Set the alert thresholds applied alongside [`Self::default_budget`].
    #[must_use]
    pub fn default_budget_thresholds(mut self, thresholds: Vec<f64>) -> Self {
        self.default_budget_thresholds = thresholds;
        self
    }

    /// Consume the builder and produce a configured [`Pipeline`].
    ///
    /// Returns a [`GatewayError::Configuration`] if required fields (gateway
    /// store, state store) have not been set.
    pub fn build(self) -> Result<Pipeline, GatewayError> {
        let store = self
            .store
            .ok_or_else(|| GatewayError::Configuration("gateway store is required".into()))?;
        let state = self
            .state
            .ok_or_else(|| GatewayError::Configuration("state store is required".into()))?;

        let metrics = Arc::new(GatewayMetrics::default());

        let router = Arc::new(RouterEngine::new(
            self.catalog,
            self.providers,
            self.health_thresholds,
            self.health_interval,
        ));

        let mut budget = BudgetLedger::new(Arc::clone(&store), Arc::clone(&state), self.budget_cooldown);
        if !self.budget_alert_sinks.is_empty() {
            budget = budget.with_sinks(self.budget_alert_sinks);
        }

        let mut guardrail = GuardrailEvaluator::new(
            self.moderation,
            Arc::clone(&store),
            Arc::clone(&state),
            self.guardrail_cooldown,
        );
        if !self.guardrail_alert_sinks.is_empty() {
            guardrail = guardrail.with_sinks(self.guardrail_alert_sinks);
        }

        let usage = Arc::new(UsagePipeline::new(Arc::clone(&store), Arc::clone(&state), Arc::clone(&metrics)));
        let rate_limit = Arc::new(RateLimitCoordinator::new(Arc::clone(&state)));
        let context = ContextResolver::new(Arc::clone(&store));

        Ok(Pipeline {
            context,
            store,
            rate_limit,
            budget: Arc::new(budget),
            router,
            guardrail: Some(Arc::new(guardrail)),
            usage,
            metrics,
            default_rate_limits: self.default_rate_limits,
            default_tenant_rate_limits: self.default_tenant_rate_limits,
            default_budget_window: self.default_budget_window,
            default_budget_limit: self.default_budget_limit,
            default_budget_thresholds: self.default_budget_thresholds,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use keystone_core::{
        ApiKey, ApiKeyId, BudgetPolicy, BudgetStatus, BudgetWindow, Catalog, GuardrailEvent,
        GuardrailPolicy, RequestRecord, Tenant, TenantId, UsageRecord,
    };
    use keystone_state_memory::MemoryStateStore;
    use keystone_store::{GatewayStore, IdempotencyRecord, StoreError};

    use super::*;

    /// Never actually called: `build()` only stores the `Arc`, it never
    /// issues a lookup, so every method here is unreachable.
    #[derive(Debug)]
    struct UnusedStore;

    #[async_trait]
    impl GatewayStore for UnusedStore {
        async fn find_tenant(&self, _id: &TenantId) -> Result<Option<Tenant>, StoreError> {
            unreachable!()
        }
        async fn find_budget_policy(&self, _id: &TenantId) -> Result<Option<BudgetPolicy>, StoreError> {
            unreachable!()
        }
        async fn tenant_guardrail_policy(&self, _id: &TenantId) -> Result<GuardrailPolicy, StoreError> {
            unreachable!()
        }
        async fn api_key_guardrail_policy(&self, _id: &ApiKeyId) -> Result<GuardrailPolicy, StoreError> {
            unreachable!()
        }
        async fn find_api_key_by_prefix(&self, _prefix: &str) -> Result<Option<ApiKey>, StoreError> {
            unreachable!()
        }
        async fn load_catalog(&self) -> Result<Catalog, StoreError> {
            unreachable!()
        }
        async fn record_guardrail_event(&self, _event: &GuardrailEvent) -> Result<(), StoreError> {
            unreachable!()
        }
        async fn find_idempotent_response(
            &self,
            _tenant_id: &TenantId,
            _idempotency_key: &str,
        ) -> Result<Option<IdempotencyRecord>, StoreError> {
            unreachable!()
        }
        async fn budget_status(
            &self,
            _tenant_id: &TenantId,
            _window: BudgetWindow,
            _limit: MicroUsd,
        ) -> Result<BudgetStatus, StoreError> {
            unreachable!()
        }
        async fn record_usage_transaction(
            &self,
            _request: &RequestRecord,
            _usage: Option<&UsageRecord>,
            _budget_window: BudgetWindow,
            _budget_limit: MicroUsd,
        ) -> Result<BudgetStatus, StoreError> {
            unreachable!()
        }
    }

    #[test]
    fn build_missing_store_returns_error() {
        let state = Arc::new(MemoryStateStore::new());
        let result = PipelineBuilder::new().state(state).build();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("gateway store is required"));
    }

    #[test]
    fn build_missing_state_returns_error() {
        let store: Arc<dyn GatewayStore> = Arc::new(UnusedStore);
        let result = PipelineBuilder::new().store(store).build();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("state store is required"));
    }

    #[test]
    fn build_with_required_fields_succeeds() {
        let store: Arc<dyn GatewayStore> = Arc::new(UnusedStore);
        let state = Arc::new(MemoryStateStore::new());
        let result = PipelineBuilder::new().store(store).state(state).build();
        assert!(result.is_ok());
    }
}
