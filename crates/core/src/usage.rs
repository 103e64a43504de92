use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::money::MicroUsd;
use crate::types::{ApiKeyId, ModelId, ProviderId, TenantId};

/// Token and cost accounting for a single completed (or partially completed,
/// for cancelled streams) request. Written once, in the same transaction as
/// the request log row and the budget window delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub request_id: Uuid,
    pub tenant_id: TenantId,
    pub api_key_id: ApiKeyId,
    pub model: ModelId,
    pub provider_id: ProviderId,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_micros: MicroUsd,
    pub cost_cents: i64,
    pub recorded_at: DateTime<Utc>,
}

impl UsageRecord {
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}
