//! Request-plane pipeline orchestration for the Keystone inference gateway.
//!
//! Wires together authentication ([`context`]), rate limiting
//! ([`rate_limit`]), budget enforcement, provider routing, guardrails, and
//! usage accounting into the single request flow described by the gateway
//! specification.

pub mod budget;
pub mod builder;
pub mod context;
pub mod error;
pub mod guardrail;
pub mod metrics;
pub mod pipeline;
pub mod rate_limit;
pub mod router;
pub mod streaming;
pub mod usage;

pub use budget::{AlertLevel, AlertSink, BudgetAlert, BudgetLedger, TracingAlertSink};
pub use builder::PipelineBuilder;
pub use context::{ContextResolver, hash_secret, verify_secret};
pub use error::GatewayError;
pub use guardrail::{GuardrailEvaluator, GuardrailResult, StreamMonitor};
pub use metrics::{GatewayMetrics, MetricsSnapshot};
pub use pipeline::{GatewayResponse, Pipeline, TtsOutcome, chat_chunk_body};
pub use rate_limit::{RateLimitCoordinator, RateLimitHandle, merge_rate_limits};
pub use router::{AliasHealth, RouterEngine};
pub use streaming::{StreamDependencies, StreamEvent, StreamSession, run_stream};
pub use usage::{CachedResponse, UsagePipeline};
