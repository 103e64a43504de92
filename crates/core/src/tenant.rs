use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::TenantId;

/// A billing and isolation boundary. Every API key belongs to exactly one
/// tenant, and rate limits, budgets, and guardrail policy all resolve
/// relative to the tenant in addition to the individual key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub display_name: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    #[must_use]
    pub fn new(id: impl Into<TenantId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            enabled: true,
            created_at: Utc::now(),
        }
    }
}
