//! Top-level request orchestration (the `Pipeline`/`Gateway` facade).
//!
//! Wires C1 (auth), C3 (budget), C2 (rate limits), C4 (routing), C6
//! (guardrails), C5 (provider calls), C7 (streaming), and C8 (usage) into
//! the single request flow described by §5's ordering guarantee: `auth →
//! model-allowed → budget check → rate acquire → route select → provider
//! call → (stream pump) → token debit → usage record → release`.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{instrument, warn};
use uuid::Uuid;

use keystone_core::{
    ApiKeyId, BudgetPolicy, BudgetStatus, BudgetWindow, Capability, GuardrailStage, MicroUsd,
    ModelId, RateLimits, Route, RequestContext, RequestOutcome, RequestRecord, TenantId,
    UsageRecord,
};
use keystone_provider::{
    AudioOperation, AudioRequest, AudioResponse, CancelHandle, ChatChoice, ChatChunk, ChatRequest,
    ChatResponse, EmbedRequest, EmbedResponse, ImageOperation, ImageRequest, ImageResponse,
    ProviderError, ProviderRoute, TokenUsage, TtsRequest, TtsResponse,
};
use keystone_store::GatewayStore;

use crate::budget::BudgetLedger;
use crate::context::ContextResolver;
use crate::error::GatewayError;
use crate::guardrail::{GuardrailEvaluator, GuardrailResult, StreamMonitor};
use crate::metrics::GatewayMetrics;
use crate::rate_limit::{RateLimitCoordinator, RateLimitHandle, merge_rate_limits};
use crate::router::RouterEngine;
use crate::streaming::{StreamDependencies, StreamEvent, StreamSession, run_stream};
use crate::usage::{CachedResponse, UsagePipeline};

/// A fully processed non-streaming response: JSON body, its status, and the
/// budget status from which the caller renders `X-Budget-*` headers.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status_code: u16,
    pub body: serde_json::Value,
    pub budget_status: BudgetStatus,
}

/// A synthesized text-to-speech response. Kept separate from
/// [`GatewayResponse`] since its payload is raw audio, not JSON.
#[derive(Debug, Clone)]
pub struct TtsOutcome {
    pub content_type: String,
    pub audio: Vec<u8>,
    pub budget_status: BudgetStatus,
}

/// Resources acquired by [`Pipeline::begin`] that every endpoint must debit,
/// record, and release on every exit path.
struct Guard {
    started_at: DateTime<Utc>,
    budget_policy: BudgetPolicy,
    key_scope_id: String,
    key_limits: RateLimits,
    tenant_limits: RateLimits,
    rate_handle: RateLimitHandle,
}

fn key_scope_id(api_key_id: &ApiKeyId, model: &ModelId) -> String {
    format!("{api_key_id}:{model}")
}

/// Render a non-streamed [`ChatResponse`] in the OpenAI chat-completion
/// object shape.
fn chat_response_body(request_id: Uuid, model: &ModelId, response: &ChatResponse) -> serde_json::Value {
    let choices: Vec<_> = response
        .choices
        .iter()
        .map(|choice: &ChatChoice| {
            json!({
                "index": choice.index,
                "message": {"role": choice.message.role, "content": choice.message.content},
                "finish_reason": choice.finish_reason,
            })
        })
        .collect();
    json!({
        "id": request_id.to_string(),
        "object": "chat.completion",
        "created": Utc::now().timestamp(),
        "model": model.as_str(),
        "choices": choices,
        "usage": {
            "prompt_tokens": response.usage.prompt_tokens,
            "completion_tokens": response.usage.completion_tokens,
            "total_tokens": response.usage.total(),
        },
    })
}

/// Render one [`ChatChunk`] as an SSE-ready `chat.completion.chunk` JSON
/// object. Exposed for the HTTP layer translating [`StreamEvent::Chunk`]
/// into wire bytes.
#[must_use]
pub fn chat_chunk_body(request_id: Uuid, model: &ModelId, chunk: &ChatChunk) -> serde_json::Value {
    json!({
        "id": request_id.to_string(),
        "object": "chat.completion.chunk",
        "created": Utc::now().timestamp(),
        "model": model.as_str(),
        "choices": [{
            "index": chunk.index,
            "delta": {"role": chunk.delta_role, "content": chunk.delta_content},
            "finish_reason": chunk.finish_reason,
        }],
    })
}

/// Orchestrates the full request-plane pipeline across every collaborator
/// built up through C1-C8. One instance is shared across all connections;
/// construct it with [`crate::builder::PipelineBuilder`].
pub struct Pipeline {
    pub(crate) context: ContextResolver,
    pub(crate) store: Arc<dyn GatewayStore>,
    pub(crate) rate_limit: Arc<RateLimitCoordinator>,
    pub(crate) budget: Arc<BudgetLedger>,
    pub(crate) router: Arc<RouterEngine>,
    pub(crate) guardrail: Option<Arc<GuardrailEvaluator>>,
    pub(crate) usage: Arc<UsagePipeline>,
    pub(crate) metrics: Arc<GatewayMetrics>,
    pub(crate) default_rate_limits: RateLimits,
    pub(crate) default_tenant_rate_limits: RateLimits,
    pub(crate) default_budget_window: BudgetWindow,
    pub(crate) default_budget_limit: MicroUsd,
    pub(crate) default_budget_thresholds: Vec<f64>,
}

impl Pipeline {
    /// Authenticate a bearer token into an immutable [`RequestContext`] (C1).
    pub async fn authenticate(&self, bearer: &str) -> Result<RequestContext, GatewayError> {
        self.context.resolve(bearer).await
    }

    /// Per-model-alias healthy/total route counts, for a readiness probe.
    pub async fn route_health(&self) -> std::collections::HashMap<ModelId, crate::router::AliasHealth> {
        self.router.health_status().await
    }

    /// Aliases the tenant may use, filtered by the key's allowlist.
    pub async fn list_models(&self, ctx: &RequestContext) -> Result<Vec<ModelId>, GatewayError> {
        let catalog = self.store.load_catalog().await?;
        Ok(catalog
            .models()
            .into_iter()
            .filter(|model| ctx.api_key.permits_model(model.as_str()))
            .collect())
    }

    async fn budget_policy_for(&self, tenant_id: &TenantId) -> Result<BudgetPolicy, GatewayError> {
        match self.store.find_budget_policy(tenant_id).await? {
            Some(policy) => Ok(policy),
            None => Ok(BudgetPolicy {
                tenant_id: tenant_id.clone(),
                window: self.default_budget_window,
                limit: self.default_budget_limit,
                alert_thresholds: self.default_budget_thresholds.clone(),
            }),
        }
    }

    /// Write a denied/terminal request row so the request is visible in
    /// usage even though it never produced a usage row (no cost, no token
    /// accounting).
    async fn deny(
        &self,
        ctx: &RequestContext,
        model: Option<&ModelId>,
        endpoint: &str,
        outcome: RequestOutcome,
        status_code: u16,
        started_at: DateTime<Utc>,
        policy: &BudgetPolicy,
    ) {
        let latency_ms = (Utc::now() - started_at).num_milliseconds().max(0) as u64;
        let record = RequestRecord {
            id: ctx.request_id,
            tenant_id: ctx.tenant.id.clone(),
            api_key_id: ctx.api_key.id.clone(),
            model: model.cloned(),
            endpoint: endpoint.to_string(),
            outcome,
            status_code,
            latency_ms,
            idempotency_key: None,
            created_at: started_at,
        };
        if let Err(err) = self.usage.record(&record, None, policy.window, policy.limit).await {
            warn!(error = %err, "failed to record denied request");
        }
    }

    /// Steps common to every endpoint, up to and including acquiring the
    /// rate-limit slot: model-allowed check, budget check, rate acquire.
    async fn begin(&self, ctx: &RequestContext, model: &ModelId, endpoint: &str) -> Result<Guard, GatewayError> {
        let started_at = Utc::now();

        if !ctx.api_key.permits_model(model.as_str()) {
            return Err(GatewayError::Forbidden(format!(
                "api key does not permit model `{model}`"
            )));
        }

        let policy = self.budget_policy_for(&ctx.tenant.id).await?;
        let status = self.budget.check_budget(&policy).await?;
        self.budget.maybe_alert(&policy, &status, started_at).await;
        if status.is_exceeded() {
            self.deny(ctx, Some(model), endpoint, RequestOutcome::BudgetExceeded, 403, started_at, &policy)
                .await;
            return Err(GatewayError::BudgetExceeded);
        }

        let key_limits = merge_rate_limits(ctx.api_key.rate_limits, self.default_rate_limits);
        let tenant_limits = self.default_tenant_rate_limits;
        let scope_id = key_scope_id(&ctx.api_key.id, model);

        let rate_handle = match self.rate_limit.acquire(&ctx.tenant.id, &scope_id, key_limits, tenant_limits).await {
            Ok(handle) => handle,
            Err(err) => {
                self.deny(ctx, Some(model), endpoint, RequestOutcome::RateLimited, 429, started_at, &policy)
                    .await;
                return Err(err);
            }
        };

        Ok(Guard {
            started_at,
            budget_policy: policy,
            key_scope_id: scope_id,
            key_limits,
            tenant_limits,
            rate_handle,
        })
    }

    /// Try each route in order until one succeeds, reporting health back to
    /// C4 on every attempt. Stops failing over as soon as a route returns a
    /// non-retryable [`ProviderError`] (per its own `is_retryable` verdict)
    /// rather than burning through every remaining route on a terminal
    /// error such as a bad request.
    async fn try_routes<T, F, Fut>(&self, routes: Vec<Route>, mut call: F) -> Result<(T, Route, TokenUsage), GatewayError>
    where
        F: FnMut(Arc<dyn ProviderRoute>, Route) -> Fut,
        Fut: Future<Output = Result<(T, TokenUsage), ProviderError>>,
    {
        let mut last_err: Option<ProviderError> = None;
        for route in routes {
            let Some(provider) = self.router.provider(&route.provider_id) else {
                continue;
            };
            match call(provider, route.clone()).await {
                Ok((value, usage)) => {
                    self.router.report_success(&route.model, &route.provider_id);
                    return Ok((value, route, usage));
                }
                Err(err) => {
                    warn!(provider = %route.provider_id, error = %err, "route attempt failed");
                    self.router.report_failure(&route.model, &route.provider_id);
                    let retryable = err.is_retryable();
                    last_err = Some(err);
                    if !retryable {
                        break;
                    }
                }
            }
        }
        Err(GatewayError::UpstreamUnavailable(
            last_err.map(|e| e.to_string()).unwrap_or_else(|| "no eligible route".into()),
        ))
    }

    /// Debit tokens, write the request/usage rows, cache the response if
    /// idempotent, and release the rate-limit slot exactly once.
    #[allow(clippy::too_many_arguments)]
    async fn finalize_success(
        &self,
        ctx: &RequestContext,
        model: &ModelId,
        endpoint: &str,
        route: &Route,
        usage: TokenUsage,
        guard: &Guard,
        body: &serde_json::Value,
        idempotency_key: Option<&str>,
    ) -> Result<BudgetStatus, GatewayError> {
        if let Err(err) = self
            .rate_limit
            .debit_tokens(&ctx.tenant.id, &guard.key_scope_id, usage.total(), guard.key_limits, guard.tenant_limits)
            .await
        {
            warn!(error = %err, "post-call token debit exceeded limit; logging anomaly only");
        }

        let cost = MicroUsd::for_tokens(usage.prompt_tokens, route.input_price_micros_per_million)
            + MicroUsd::for_tokens(usage.completion_tokens, route.output_price_micros_per_million);

        let usage_record = UsageRecord {
            id: Uuid::new_v4(),
            request_id: ctx.request_id,
            tenant_id: ctx.tenant.id.clone(),
            api_key_id: ctx.api_key.id.clone(),
            model: model.clone(),
            provider_id: route.provider_id.clone(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            cost_micros: cost,
            cost_cents: cost.to_cents(),
            recorded_at: Utc::now(),
        };

        let latency_ms = (Utc::now() - guard.started_at).num_milliseconds().max(0) as u64;
        let request_record = RequestRecord {
            id: ctx.request_id,
            tenant_id: ctx.tenant.id.clone(),
            api_key_id: ctx.api_key.id.clone(),
            model: Some(model.clone()),
            endpoint: endpoint.to_string(),
            outcome: RequestOutcome::Success,
            status_code: 200,
            latency_ms,
            idempotency_key: idempotency_key.map(str::to_string),
            created_at: guard.started_at,
        };

        let status = self
            .usage
            .record(&request_record, Some(&usage_record), guard.budget_policy.window, guard.budget_policy.limit)
            .await?;

        if let Some(key) = idempotency_key {
            self.usage
                .cache_response(&ctx.tenant.id, key, &CachedResponse { status_code: 200, body: body.clone() })
                .await;
        }

        self.rate_limit.release(&guard.rate_handle).await;
        Ok(status)
    }

    async fn finalize_failure(
        &self,
        ctx: &RequestContext,
        model: &ModelId,
        endpoint: &str,
        guard: &Guard,
        outcome: RequestOutcome,
        status_code: u16,
    ) {
        self.rate_limit.release(&guard.rate_handle).await;
        self.deny(ctx, Some(model), endpoint, outcome, status_code, guard.started_at, &guard.budget_policy)
            .await;
    }

    /// Run the guardrail pre-check against `content`, recording the verdict
    /// regardless of outcome. Returns the result so the caller can decide
    /// whether to abort.
    async fn pre_check(&self, ctx: &RequestContext, content: &str) -> GuardrailResult {
        let Some(guardrail) = &self.guardrail else {
            return GuardrailResult::allow();
        };
        let result = guardrail.pre_check(&ctx.effective_guardrail_policy, content).await;
        if let Err(err) = guardrail
            .record(&ctx.tenant.id, &ctx.api_key.id, ctx.request_id, GuardrailStage::PreRequest, &result, Utc::now())
            .await
        {
            warn!(error = %err, "failed to record guardrail pre-check event");
        }
        result
    }

    /// `POST /v1/chat/completions` (non-streaming path).
    #[instrument(skip(self, ctx, request), fields(tenant_id = %ctx.tenant.id, model = %model))]
    pub async fn chat_completions(
        &self,
        ctx: &RequestContext,
        model: &ModelId,
        request: ChatRequest,
        idempotency_key: Option<&str>,
    ) -> Result<GatewayResponse, GatewayError> {
        const ENDPOINT: &str = "/v1/chat/completions";

        if let Some(key) = idempotency_key {
            if let Some(cached) = self.usage.cached_response(&ctx.tenant.id, key).await {
                let policy = self.budget_policy_for(&ctx.tenant.id).await?;
                let budget_status = self.budget.check_budget(&policy).await?;
                return Ok(GatewayResponse { status_code: cached.status_code, body: cached.body, budget_status });
            }
        }

        let guard = self.begin(ctx, model, ENDPOINT).await?;

        let prompt = request.messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n");
        let verdict = self.pre_check(ctx, &prompt).await;
        if verdict.verdict.is_block() {
            self.finalize_failure(ctx, model, ENDPOINT, &guard, RequestOutcome::GuardrailBlocked, 403).await;
            return Err(GatewayError::GuardrailBlocked(verdict.category.unwrap_or_else(|| "blocked".into())));
        }

        let routes = self.router.select_routes(model, Capability::Chat).await;
        if routes.is_empty() {
            self.finalize_failure(ctx, model, ENDPOINT, &guard, RequestOutcome::UpstreamError, 503).await;
            return Err(GatewayError::Unsupported);
        }

        let request_id = ctx.request_id;
        let model_owned = model.clone();
        let outcome = self
            .try_routes(routes, move |provider, route| {
                let mut req = request.clone();
                req.upstream_model = route.upstream_model.clone();
                let model_owned = model_owned.clone();
                async move {
                    let response = provider.chat(req).await?;
                    let usage = response.usage;
                    let body = chat_response_body(request_id, &model_owned, &response);
                    Ok((body, usage))
                }
            })
            .await;

        match outcome {
            Ok((body, route, usage)) => {
                let budget_status = self
                    .finalize_success(ctx, model, ENDPOINT, &route, usage, &guard, &body, idempotency_key)
                    .await?;
                Ok(GatewayResponse { status_code: 200, body, budget_status })
            }
            Err(err) => {
                self.finalize_failure(ctx, model, ENDPOINT, &guard, RequestOutcome::UpstreamError, 502).await;
                Err(err)
            }
        }
    }

    /// `POST /v1/chat/completions` with `stream: true`. Returns the SSE
    /// event stream and the cancellation handle the HTTP layer ties to
    /// client disconnect.
    #[instrument(skip(self, ctx, request), fields(tenant_id = %ctx.tenant.id, model = %model))]
    pub async fn chat_completions_stream(
        &self,
        ctx: &RequestContext,
        model: &ModelId,
        request: ChatRequest,
        idempotency_key: Option<&str>,
    ) -> Result<(impl futures::Stream<Item = StreamEvent>, CancelHandle), GatewayError> {
        const ENDPOINT: &str = "/v1/chat/completions";

        let guard = self.begin(ctx, model, ENDPOINT).await?;

        let prompt = request.messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n");
        let verdict = self.pre_check(ctx, &prompt).await;
        if verdict.verdict.is_block() {
            self.finalize_failure(ctx, model, ENDPOINT, &guard, RequestOutcome::GuardrailBlocked, 403).await;
            return Err(GatewayError::GuardrailBlocked(verdict.category.unwrap_or_else(|| "blocked".into())));
        }

        let routes = self.router.select_routes(model, Capability::ChatStream).await;
        let Some(route) = routes.into_iter().next() else {
            self.finalize_failure(ctx, model, ENDPOINT, &guard, RequestOutcome::UpstreamError, 503).await;
            return Err(GatewayError::Unsupported);
        };
        let Some(provider) = self.router.provider(&route.provider_id) else {
            self.finalize_failure(ctx, model, ENDPOINT, &guard, RequestOutcome::UpstreamError, 503).await;
            return Err(GatewayError::Unsupported);
        };

        let mut upstream_request = request;
        upstream_request.upstream_model = route.upstream_model.clone();
        let handle = match provider.chat_stream(upstream_request).await {
            Ok(handle) => handle,
            Err(err) => {
                self.router.report_failure(&route.model, &route.provider_id);
                self.finalize_failure(ctx, model, ENDPOINT, &guard, RequestOutcome::UpstreamError, 502).await;
                return Err(GatewayError::Provider(err));
            }
        };

        let monitor = self
            .guardrail
            .as_ref()
            .map(|g| Arc::new(StreamMonitor::new(Arc::clone(g), (*ctx.effective_guardrail_policy).clone())));

        let session = StreamSession {
            tenant_id: ctx.tenant.id.clone(),
            api_key_id: ctx.api_key.id.clone(),
            model: model.clone(),
            provider_id: route.provider_id.clone(),
            request_id: ctx.request_id,
            endpoint: ENDPOINT.to_string(),
            idempotency_key: idempotency_key.map(str::to_string),
            started_at: guard.started_at,
            budget_window: guard.budget_policy.window,
            budget_limit: guard.budget_policy.limit,
            input_price_micros_per_million: route.input_price_micros_per_million,
            output_price_micros_per_million: route.output_price_micros_per_million,
        };

        let deps = StreamDependencies {
            rate_limit: Arc::clone(&self.rate_limit),
            rate_handle: guard.rate_handle,
            key_scope_id: guard.key_scope_id,
            key_limits: guard.key_limits,
            tenant_limits: guard.tenant_limits,
            usage: Arc::clone(&self.usage),
            router: Arc::clone(&self.router),
            monitor,
            guardrail: self.guardrail.clone(),
        };

        Ok(run_stream(session, deps, handle))
    }

    /// `POST /v1/embeddings`.
    #[instrument(skip(self, ctx, request), fields(tenant_id = %ctx.tenant.id, model = %model))]
    pub async fn embeddings(
        &self,
        ctx: &RequestContext,
        model: &ModelId,
        request: EmbedRequest,
    ) -> Result<GatewayResponse, GatewayError> {
        const ENDPOINT: &str = "/v1/embeddings";
        let guard = self.begin(ctx, model, ENDPOINT).await?;

        let routes = self.router.select_routes(model, Capability::Embed).await;
        if routes.is_empty() {
            self.finalize_failure(ctx, model, ENDPOINT, &guard, RequestOutcome::UpstreamError, 503).await;
            return Err(GatewayError::Unsupported);
        }

        let model_owned = model.clone();
        let outcome = self
            .try_routes(routes, move |provider, route| {
                let mut req = request.clone();
                req.upstream_model = route.upstream_model.clone();
                let model_owned = model_owned.clone();
                async move {
                    let response: EmbedResponse = provider.embed(req).await?;
                    let usage = TokenUsage { prompt_tokens: response.prompt_tokens, completion_tokens: 0 };
                    let body = json!({
                        "object": "list",
                        "model": model_owned.as_str(),
                        "data": response.vectors.iter().enumerate().map(|(index, embedding)| {
                            json!({"index": index, "embedding": embedding})
                        }).collect::<Vec<_>>(),
                        "usage": {"prompt_tokens": response.prompt_tokens, "total_tokens": response.prompt_tokens},
                    });
                    Ok((body, usage))
                }
            })
            .await;

        match outcome {
            Ok((body, route, usage)) => {
                let budget_status = self.finalize_success(ctx, model, ENDPOINT, &route, usage, &guard, &body, None).await?;
                Ok(GatewayResponse { status_code: 200, body, budget_status })
            }
            Err(err) => {
                self.finalize_failure(ctx, model, ENDPOINT, &guard, RequestOutcome::UpstreamError, 502).await;
                Err(err)
            }
        }
    }

    fn image_capability(operation: ImageOperation) -> Capability {
        match operation {
            ImageOperation::Generate => Capability::ImageGenerate,
            ImageOperation::Edit => Capability::ImageEdit,
            ImageOperation::Variation => Capability::ImageVariation,
        }
    }

    /// `POST /v1/images/{generations,edits,variations}`.
    #[instrument(skip(self, ctx, request), fields(tenant_id = %ctx.tenant.id, model = %model))]
    pub async fn images(
        &self,
        ctx: &RequestContext,
        model: &ModelId,
        request: ImageRequest,
    ) -> Result<GatewayResponse, GatewayError> {
        let endpoint = match request.operation {
            ImageOperation::Generate => "/v1/images/generations",
            ImageOperation::Edit => "/v1/images/edits",
            ImageOperation::Variation => "/v1/images/variations",
        };
        let guard = self.begin(ctx, model, endpoint).await?;

        if let Some(prompt) = &request.prompt {
            let verdict = self.pre_check(ctx, prompt).await;
            if verdict.verdict.is_block() {
                self.finalize_failure(ctx, model, endpoint, &guard, RequestOutcome::GuardrailBlocked, 403).await;
                return Err(GatewayError::GuardrailBlocked(verdict.category.unwrap_or_else(|| "blocked".into())));
            }
        }

        let capability = Self::image_capability(request.operation);
        let routes = self.router.select_routes(model, capability).await;
        if routes.is_empty() {
            self.finalize_failure(ctx, model, endpoint, &guard, RequestOutcome::UpstreamError, 503).await;
            return Err(GatewayError::Unsupported);
        }

        let outcome = self
            .try_routes(routes, move |provider, route| {
                let mut req = request.clone();
                req.upstream_model = route.upstream_model.clone();
                async move {
                    let response: ImageResponse = provider.image(req).await?;
                    let body = json!({
                        "created": Utc::now().timestamp(),
                        "data": response.images.iter().map(|artifact| match artifact {
                            keystone_provider::ImageArtifact::Base64(b64) => json!({"b64_json": b64}),
                            keystone_provider::ImageArtifact::Url(url) => json!({"url": url}),
                        }).collect::<Vec<_>>(),
                    });
                    Ok((body, TokenUsage::default()))
                }
            })
            .await;

        match outcome {
            Ok((body, route, usage)) => {
                let budget_status = self.finalize_success(ctx, model, endpoint, &route, usage, &guard, &body, None).await?;
                Ok(GatewayResponse { status_code: 200, body, budget_status })
            }
            Err(err) => {
                self.finalize_failure(ctx, model, endpoint, &guard, RequestOutcome::UpstreamError, 502).await;
                Err(err)
            }
        }
    }

    fn audio_capability(operation: AudioOperation) -> Capability {
        match operation {
            AudioOperation::Transcribe => Capability::Transcribe,
            AudioOperation::Translate => Capability::Translate,
        }
    }

    /// `POST /v1/audio/{transcriptions,translations}`.
    #[instrument(skip(self, ctx, request), fields(tenant_id = %ctx.tenant.id, model = %model))]
    pub async fn audio(
        &self,
        ctx: &RequestContext,
        model: &ModelId,
        request: AudioRequest,
    ) -> Result<GatewayResponse, GatewayError> {
        let endpoint = match request.operation {
            AudioOperation::Transcribe => "/v1/audio/transcriptions",
            AudioOperation::Translate => "/v1/audio/translations",
        };
        let guard = self.begin(ctx, model, endpoint).await?;

        let capability = Self::audio_capability(request.operation);
        let routes = self.router.select_routes(model, capability).await;
        if routes.is_empty() {
            self.finalize_failure(ctx, model, endpoint, &guard, RequestOutcome::UpstreamError, 503).await;
            return Err(GatewayError::Unsupported);
        }

        let outcome = self
            .try_routes(routes, move |provider, route| {
                let mut req = request.clone();
                req.upstream_model = route.upstream_model.clone();
                async move {
                    let response: AudioResponse = provider.audio(req).await?;
                    let usage = response.usage;
                    let body = json!({"text": response.text});
                    Ok((body, usage))
                }
            })
            .await;

        match outcome {
            Ok((body, route, usage)) => {
                let verdict = self.pre_check(ctx, body["text"].as_str().unwrap_or_default()).await;
                if verdict.verdict.is_block() {
                    self.finalize_failure(ctx, model, endpoint, &guard, RequestOutcome::GuardrailBlocked, 403).await;
                    return Err(GatewayError::GuardrailBlocked(verdict.category.unwrap_or_else(|| "blocked".into())));
                }
                let budget_status = self.finalize_success(ctx, model, endpoint, &route, usage, &guard, &body, None).await?;
                Ok(GatewayResponse { status_code: 200, body, budget_status })
            }
            Err(err) => {
                self.finalize_failure(ctx, model, endpoint, &guard, RequestOutcome::UpstreamError, 502).await;
                Err(err)
            }
        }
    }

    /// `POST /v1/audio/speech`. Streaming TTS is an open question the
    /// specification left unresolved (synthesize buffered or passthrough);
    /// this pipeline only implements the buffered, non-streaming form — a
    /// caller that requests streaming TTS should reject it at the HTTP
    /// layer with `501 Not Implemented` before ever reaching this method.
    #[instrument(skip(self, ctx, request), fields(tenant_id = %ctx.tenant.id, model = %model))]
    pub async fn tts(&self, ctx: &RequestContext, model: &ModelId, request: TtsRequest) -> Result<TtsOutcome, GatewayError> {
        const ENDPOINT: &str = "/v1/audio/speech";
        let guard = self.begin(ctx, model, ENDPOINT).await?;

        let verdict = self.pre_check(ctx, &request.text).await;
        if verdict.verdict.is_block() {
            self.finalize_failure(ctx, model, ENDPOINT, &guard, RequestOutcome::GuardrailBlocked, 403).await;
            return Err(GatewayError::GuardrailBlocked(verdict.category.unwrap_or_else(|| "blocked".into())));
        }

        let routes = self.router.select_routes(model, Capability::Tts).await;
        if routes.is_empty() {
            self.finalize_failure(ctx, model, ENDPOINT, &guard, RequestOutcome::UpstreamError, 503).await;
            return Err(GatewayError::Unsupported);
        }

        let char_count = request.text.chars().count() as u64;
        let outcome = self
            .try_routes(routes, move |provider, route| {
                let mut req = request.clone();
                req.upstream_model = route.upstream_model.clone();
                async move {
                    let response: TtsResponse = provider.tts(req).await?;
                    let usage = TokenUsage { prompt_tokens: char_count, completion_tokens: 0 };
                    Ok((response, usage))
                }
            })
            .await;

        match outcome {
            Ok((response, route, usage)) => {
                let placeholder_body = json!({"content_type": response.content_type, "bytes": response.audio.len()});
                let budget_status = self
                    .finalize_success(ctx, model, ENDPOINT, &route, usage, &guard, &placeholder_body, None)
                    .await?;
                Ok(TtsOutcome { content_type: response.content_type, audio: response.audio, budget_status })
            }
            Err(err) => {
                self.finalize_failure(ctx, model, ENDPOINT, &guard, RequestOutcome::UpstreamError, 502).await;
                Err(err)
            }
        }
    }
}
