use std::sync::Arc;

use async_trait::async_trait;
use criterion::{Criterion, black_box, criterion_group, criterion_main};

use keystone_core::{
    ApiKey, ApiKeyId, BudgetPolicy, BudgetStatus, BudgetWindow, Capability, Catalog, GuardrailEvent,
    GuardrailPolicy, MicroUsd, ModelId, ProviderId, RateLimits, RequestRecord, Route, Tenant, TenantId,
    UsageRecord,
};
use keystone_gateway::{PipelineBuilder, hash_secret};
use keystone_provider::{ChatMessage, ChatParams, ChatRequest, EchoProvider};
use keystone_state_memory::MemoryStateStore;
use keystone_store::{GatewayStore, IdempotencyRecord, StoreError};

/// A fixed single-tenant, single-key, single-route world. No persistence,
/// no network — isolates the pipeline's own per-request overhead (auth,
/// rate limiting, budget accounting, routing, guardrail pre-check) from
/// any real store or provider latency.
struct BenchStore {
    tenant: Tenant,
    key: ApiKey,
    catalog: Catalog,
}

impl BenchStore {
    fn new(secret: &str) -> Self {
        let tenant = Tenant::new("bench-tenant", "Bench Tenant");
        let salt = "bench-salt";
        let key = ApiKey {
            id: ApiKeyId::new("key_bench"),
            tenant_id: tenant.id.clone(),
            prefix: "benchprefix0".into(),
            secret_hash: hash_secret(salt, secret),
            salt: salt.into(),
            enabled: true,
            rate_limits: RateLimits::unlimited(),
            allowed_models: None,
            created_at: chrono::Utc::now(),
            revoked_at: None,
        };
        let catalog = Catalog {
            routes: vec![Route {
                model: ModelId::new("bench-model"),
                provider_id: ProviderId::new("echo"),
                upstream_model: "echo-model".into(),
                capabilities: vec![Capability::Chat, Capability::ChatStream],
                weight: 1,
                input_price_micros_per_million: 0,
                output_price_micros_per_million: 0,
                enabled: true,
            }],
        };
        Self { tenant, key, catalog }
    }
}

#[async_trait]
impl GatewayStore for BenchStore {
    async fn find_tenant(&self, id: &TenantId) -> Result<Option<Tenant>, StoreError> {
        Ok((*id == self.tenant.id).then(|| self.tenant.clone()))
    }

    async fn find_budget_policy(&self, _id: &TenantId) -> Result<Option<BudgetPolicy>, StoreError> {
        Ok(None)
    }

    async fn tenant_guardrail_policy(&self, _id: &TenantId) -> Result<GuardrailPolicy, StoreError> {
        Ok(GuardrailPolicy::default())
    }

    async fn api_key_guardrail_policy(&self, _id: &ApiKeyId) -> Result<GuardrailPolicy, StoreError> {
        Ok(GuardrailPolicy::default())
    }

    async fn find_api_key_by_prefix(&self, prefix: &str) -> Result<Option<ApiKey>, StoreError> {
        Ok((prefix == self.key.prefix).then(|| self.key.clone()))
    }

    async fn load_catalog(&self) -> Result<Catalog, StoreError> {
        Ok(self.catalog.clone())
    }

    async fn record_guardrail_event(&self, _event: &GuardrailEvent) -> Result<(), StoreError> {
        Ok(())
    }

    async fn find_idempotent_response(
        &self,
        _tenant_id: &TenantId,
        _idempotency_key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        Ok(None)
    }

    async fn budget_status(
        &self,
        tenant_id: &TenantId,
        window: BudgetWindow,
        limit: MicroUsd,
    ) -> Result<BudgetStatus, StoreError> {
        Ok(BudgetStatus {
            tenant_id: tenant_id.clone(),
            window,
            used: MicroUsd::ZERO,
            limit,
            remaining: limit,
            resets_at: chrono::Utc::now(),
        })
    }

    async fn record_usage_transaction(
        &self,
        request: &RequestRecord,
        _usage: Option<&UsageRecord>,
        budget_window: BudgetWindow,
        budget_limit: MicroUsd,
    ) -> Result<BudgetStatus, StoreError> {
        Ok(BudgetStatus {
            tenant_id: request.tenant_id.clone(),
            window: budget_window,
            used: MicroUsd::ZERO,
            limit: budget_limit,
            remaining: budget_limit,
            resets_at: request.created_at,
        })
    }
}

const BEARER: &str = "sk-benchprefix0.bench-secret";

fn chat_request() -> ChatRequest {
    ChatRequest {
        upstream_model: String::new(),
        messages: vec![ChatMessage {
            role: "user".into(),
            content: "what is the weather like today".into(),
        }],
        params: ChatParams::default(),
    }
}

fn bench_authenticate(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");

    let store = Arc::new(BenchStore::new("bench-secret"));
    let state = Arc::new(MemoryStateStore::new());
    let pipeline = PipelineBuilder::new()
        .store(store)
        .state(state)
        .catalog(Catalog { routes: Vec::new() })
        .build()
        .expect("pipeline should build");

    c.bench_function("authenticate", |b| {
        b.iter(|| {
            rt.block_on(async {
                let result = pipeline.authenticate(black_box(BEARER)).await;
                black_box(result)
            })
        });
    });
}

fn bench_chat_completions_single_route(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");

    let bench_store = BenchStore::new("bench-secret");
    let catalog = bench_store.catalog.clone();
    let store = Arc::new(bench_store);
    let state = Arc::new(MemoryStateStore::new());
    let pipeline = PipelineBuilder::new()
        .store(store)
        .state(state)
        .catalog(catalog)
        .provider(ProviderId::new("echo"), Arc::new(EchoProvider::new("echo")))
        .build()
        .expect("pipeline should build");

    let ctx = rt
        .block_on(pipeline.authenticate(BEARER))
        .expect("authentication should succeed");
    let model = ModelId::new("bench-model");

    c.bench_function("chat_completions_single_route", |b| {
        b.iter(|| {
            rt.block_on(async {
                let result = pipeline
                    .chat_completions(black_box(&ctx), black_box(&model), black_box(chat_request()), None)
                    .await;
                black_box(result)
            })
        });
    });
}

fn bench_chat_completions_with_failover(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");

    let bench_store = BenchStore::new("bench-secret");
    let mut catalog = bench_store.catalog.clone();
    catalog.routes.push(Route {
        model: ModelId::new("bench-model"),
        provider_id: ProviderId::new("echo-backup"),
        upstream_model: "echo-model-backup".into(),
        capabilities: vec![Capability::Chat, Capability::ChatStream],
        weight: 1,
        input_price_micros_per_million: 0,
        output_price_micros_per_million: 0,
        enabled: true,
    });
    let store = Arc::new(bench_store);
    let state = Arc::new(MemoryStateStore::new());
    let pipeline = PipelineBuilder::new()
        .store(store)
        .state(state)
        .catalog(catalog)
        .provider(ProviderId::new("echo"), Arc::new(EchoProvider::new("echo")))
        .provider(ProviderId::new("echo-backup"), Arc::new(EchoProvider::new("echo-backup")))
        .build()
        .expect("pipeline should build");

    let ctx = rt
        .block_on(pipeline.authenticate(BEARER))
        .expect("authentication should succeed");
    let model = ModelId::new("bench-model");

    c.bench_function("chat_completions_two_routes_weighted", |b| {
        b.iter(|| {
            rt.block_on(async {
                let result = pipeline
                    .chat_completions(black_box(&ctx), black_box(&model), black_box(chat_request()), None)
                    .await;
                black_box(result)
            })
        });
    });
}

criterion_group!(
    benches,
    bench_authenticate,
    bench_chat_completions_single_route,
    bench_chat_completions_with_failover,
);
criterion_main!(benches);
