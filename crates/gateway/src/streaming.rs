use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;

use keystone_core::{
    ApiKeyId, BudgetWindow, GuardrailStage, MicroUsd, ModelId, ProviderId, RateLimits,
    RequestOutcome, RequestRecord, TenantId, UsageRecord,
};
use keystone_provider::{CancelHandle, ChatChunk, ChatStreamHandle, TokenUsage};

use crate::guardrail::{GuardrailEvaluator, GuardrailResult, StreamMonitor};
use crate::rate_limit::{RateLimitCoordinator, RateLimitHandle};
use crate::router::RouterEngine;
use crate::usage::UsagePipeline;

/// Channel capacity between the provider-pump producer task and the SSE
/// writer consuming [`StreamEvent`]s.
const STREAM_CHANNEL_CAPACITY: usize = 16;

/// One event the HTTP layer translates into an SSE frame.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Chunk(ChatChunk),
    Blocked { category: Option<String> },
    Done,
}

/// Everything [`run_stream`] needs to know about the request to record its
/// outcome once the stream ends.
pub struct StreamSession {
    pub tenant_id: TenantId,
    pub api_key_id: ApiKeyId,
    pub model: ModelId,
    pub provider_id: ProviderId,
    pub request_id: Uuid,
    pub endpoint: String,
    pub idempotency_key: Option<String>,
    pub started_at: DateTime<Utc>,
    pub budget_window: BudgetWindow,
    pub budget_limit: MicroUsd,
    pub input_price_micros_per_million: i64,
    pub output_price_micros_per_million: i64,
}

/// Collaborators the defer-style completion guard needs: the rate-limit
/// handle to debit and release, the router to report success/failure back
/// to C4, and the usage pipeline to commit the transaction.
pub struct StreamDependencies {
    pub rate_limit: Arc<RateLimitCoordinator>,
    pub rate_handle: RateLimitHandle,
    pub key_scope_id: String,
    pub key_limits: RateLimits,
    pub tenant_limits: RateLimits,
    pub usage: Arc<UsagePipeline>,
    pub router: Arc<RouterEngine>,
    pub monitor: Option<Arc<StreamMonitor>>,
    pub guardrail: Option<Arc<GuardrailEvaluator>>,
}

fn estimate_cost(usage: TokenUsage, session: &StreamSession) -> MicroUsd {
    MicroUsd::for_tokens(usage.prompt_tokens, session.input_price_micros_per_million)
        + MicroUsd::for_tokens(usage.completion_tokens, session.output_price_micros_per_million)
}

/// Pump `handle`'s chunk sequence into a bounded channel, running guardrail
/// monitoring per delta and recording usage exactly once on every exit path
/// (normal end, guardrail block, provider error, client disconnect,
/// cancellation).
pub fn run_stream(
    session: StreamSession,
    deps: StreamDependencies,
    handle: ChatStreamHandle,
) -> (impl futures::Stream<Item = StreamEvent>, CancelHandle) {
    let cancel = handle.cancel.clone();
    let (tx, rx) = tokio::sync::mpsc::channel(STREAM_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        pump(session, deps, handle, tx).await;
    });

    (ReceiverStream::new(rx), cancel)
}

async fn pump(
    session: StreamSession,
    deps: StreamDependencies,
    handle: ChatStreamHandle,
    tx: tokio::sync::mpsc::Sender<StreamEvent>,
) {
    let mut chunks = handle.chunks;
    let cancel = handle.cancel;
    let mut captured_usage: Option<TokenUsage> = None;
    let mut blocked: Option<GuardrailResult> = None;
    let mut disconnected = false;
    let mut outcome = RequestOutcome::Success;
    let mut status_code: u16 = 200;

    while let Some(next) = chunks.next().await {
        let chunk = match next {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!(error = %err, "provider stream errored mid-flight");
                outcome = RequestOutcome::UpstreamError;
                status_code = 502;
                break;
            }
        };

        if let Some(usage) = chunk.usage {
            captured_usage = Some(usage);
        }

        if disconnected {
            continue;
        }

        if let Some(monitor) = &deps.monitor {
            if let Some(delta) = &chunk.delta_content {
                let result = monitor.on_delta(chunk.index, delta).await;
                if result.verdict.is_block() {
                    let _ = tx
                        .send(StreamEvent::Blocked {
                            category: result.category.clone(),
                        })
                        .await;
                    blocked = Some(result);
                    outcome = RequestOutcome::GuardrailBlocked;
                    status_code = 200;
                    cancel.cancel();
                    disconnected = true;
                    continue;
                }
            }
        }

        if tx.send(StreamEvent::Chunk(chunk)).await.is_err() {
            debug!("stream consumer dropped, cancelling upstream and draining");
            cancel.cancel();
            disconnected = true;
        }
    }

    if blocked.is_none() && !disconnected {
        let _ = tx.send(StreamEvent::Done).await;
    }

    let usage = captured_usage.unwrap_or_default();
    let cost = estimate_cost(usage, &session);
    let latency_ms = (Utc::now() - session.started_at).num_milliseconds().max(0) as u64;

    if let Err(err) = deps
        .rate_limit
        .debit_tokens(
            &session.tenant_id,
            &deps.key_scope_id,
            usage.total(),
            deps.key_limits,
            deps.tenant_limits,
        )
        .await
    {
        warn!(error = %err, "post-stream token debit exceeded limit; logging anomaly only");
    }

    if outcome == RequestOutcome::UpstreamError {
        deps.router.report_failure(&session.model, &session.provider_id);
    } else {
        deps.router.report_success(&session.model, &session.provider_id);
    }

    let usage_record = UsageRecord {
        id: Uuid::new_v4(),
        request_id: session.request_id,
        tenant_id: session.tenant_id.clone(),
        api_key_id: session.api_key_id.clone(),
        model: session.model.clone(),
        provider_id: session.provider_id.clone(),
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        cost_micros: cost,
        cost_cents: cost.to_cents(),
        recorded_at: Utc::now(),
    };

    let request_record = RequestRecord {
        id: session.request_id,
        tenant_id: session.tenant_id.clone(),
        api_key_id: session.api_key_id.clone(),
        model: Some(session.model.clone()),
        endpoint: session.endpoint.clone(),
        outcome,
        status_code,
        latency_ms,
        idempotency_key: session.idempotency_key.clone(),
        created_at: session.started_at,
    };

    if let Err(err) = deps
        .usage
        .record(&request_record, Some(&usage_record), session.budget_window, session.budget_limit)
        .await
    {
        warn!(error = %err, "failed to record streamed usage transaction");
    }

    if let (Some(result), Some(guardrail)) = (&blocked, &deps.guardrail) {
        if let Err(err) = guardrail
            .record(
                &session.tenant_id,
                &session.api_key_id,
                session.request_id,
                GuardrailStage::StreamingMonitor,
                result,
                Utc::now(),
            )
            .await
        {
            warn!(error = %err, "failed to record guardrail event for blocked stream");
        }
    }

    deps.rate_limit.release(&deps.rate_handle).await;
}
