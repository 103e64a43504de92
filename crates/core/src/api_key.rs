use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rate_limit::RateLimits;
use crate::types::{ApiKeyId, TenantId};

/// Prefix length of the public, non-secret portion of an issued key.
///
/// Keys are minted as `sk-<prefix>.<secret>`; the prefix is stored in the
/// clear and used as a lookup index, the secret never is.
pub const KEY_PREFIX_LEN: usize = 12;

/// Caller identity resolved from a bearer token.
///
/// `secret_hash` is `SHA-256(salt || secret)`, hex-encoded; verification
/// recomputes the hash from the presented secret and compares it to this
/// value in constant time. Neither field ever appears in a `Display` or log
/// line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: ApiKeyId,
    pub tenant_id: TenantId,
    pub prefix: String,
    #[serde(skip_serializing)]
    pub secret_hash: String,
    #[serde(skip_serializing)]
    pub salt: String,
    pub enabled: bool,
    pub rate_limits: RateLimits,
    pub allowed_models: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.enabled && self.revoked_at.is_none()
    }

    /// Whether this key may call the given public model name. `None` in
    /// `allowed_models` means no restriction.
    #[must_use]
    pub fn permits_model(&self, model: &str) -> bool {
        match &self.allowed_models {
            None => true,
            Some(models) => models.iter().any(|m| m == model),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(allowed: Option<Vec<String>>) -> ApiKey {
        ApiKey {
            id: ApiKeyId::new("key_1"),
            tenant_id: TenantId::new("acme"),
            prefix: "abcdef123456".into(),
            secret_hash: "hash".into(),
            salt: "salt".into(),
            enabled: true,
            rate_limits: RateLimits::unlimited(),
            allowed_models: allowed,
            created_at: Utc::now(),
            revoked_at: None,
        }
    }

    #[test]
    fn active_requires_enabled_and_not_revoked() {
        let mut k = key(None);
        assert!(k.is_active());
        k.enabled = false;
        assert!(!k.is_active());
    }

    #[test]
    fn model_allowlist_restricts_access() {
        let k = key(Some(vec!["gpt-4o-mini".into()]));
        assert!(k.permits_model("gpt-4o-mini"));
        assert!(!k.permits_model("gpt-4o"));
    }

    #[test]
    fn no_allowlist_permits_any_model() {
        let k = key(None);
        assert!(k.permits_model("anything"));
    }
}
