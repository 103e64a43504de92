use serde::{Deserialize, Serialize};

use keystone_core::TenantId;

/// The kind of state being stored, used as part of the key so that a
/// prefix scan over one kind never returns entries from another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    /// Sliding-minute request counter for RPM enforcement.
    RateLimitRpm,
    /// Sliding-minute token counter for TPM enforcement.
    RateLimitTpm,
    /// In-flight request counter for parallel-slot enforcement.
    ParallelSlot,
    /// Cached response body keyed by idempotency key.
    Idempotency,
    /// Route health machine state.
    RouteHealth,
    /// Running total for a budget window.
    BudgetCounter,
    /// Advisory lock namespace.
    Lock,
    Custom(String),
}

impl KeyKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::RateLimitRpm => "rate_limit_rpm",
            Self::RateLimitTpm => "rate_limit_tpm",
            Self::ParallelSlot => "parallel_slot",
            Self::Idempotency => "idempotency",
            Self::RouteHealth => "route_health",
            Self::BudgetCounter => "budget_counter",
            Self::Lock => "lock",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key used to address state entries in the store. Every entry is scoped to
/// a tenant so that one tenant's counters can never collide with another's.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKey {
    pub tenant: TenantId,
    pub kind: KeyKind,
    pub id: String,
}

impl StateKey {
    #[must_use]
    pub fn new(tenant: impl Into<TenantId>, kind: KeyKind, id: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            kind,
            id: id.into(),
        }
    }

    /// Canonical string representation: `tenant:kind:id`.
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{}:{}:{}", self.tenant, self.kind, self.id)
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_kind_as_str() {
        assert_eq!(KeyKind::RateLimitRpm.as_str(), "rate_limit_rpm");
        assert_eq!(KeyKind::Custom("foo".into()).as_str(), "foo");
    }

    #[test]
    fn state_key_canonical() {
        let key = StateKey::new("acme", KeyKind::ParallelSlot, "key_abc");
        assert_eq!(key.canonical(), "acme:parallel_slot:key_abc");
    }
}
