use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ApiKeyId, ModelId, TenantId};

/// Terminal outcome of a completed request, as recorded in the request log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOutcome {
    Success,
    ClientError,
    UpstreamError,
    RateLimited,
    BudgetExceeded,
    GuardrailBlocked,
    Cancelled,
}

/// One row of the audit-oriented request log, written once per request in
/// the same database transaction as its usage row and budget delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub api_key_id: ApiKeyId,
    pub model: Option<ModelId>,
    pub endpoint: String,
    pub outcome: RequestOutcome,
    pub status_code: u16,
    pub latency_ms: u64,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}
