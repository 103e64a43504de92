use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

use keystone_core::{ApiKey, KEY_PREFIX_LEN, RequestContext};
use keystone_store::GatewayStore;

use crate::error::GatewayError;

type HmacSha256 = Hmac<Sha256>;

/// Hash a presented secret under a per-key salt.
///
/// `HMAC-SHA256(key = salt, message = secret)`, hex-encoded. Using the salt
/// as the HMAC key rather than concatenating it into the message avoids
/// length-extension ambiguity between salt and secret.
#[must_use]
pub fn hash_secret(salt: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(salt.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(secret.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a presented secret against a stored hash in constant time.
#[must_use]
pub fn verify_secret(secret: &str, salt: &str, expected_hash_hex: &str) -> bool {
    let computed = hash_secret(salt, secret);
    let (Ok(a), Ok(b)) = (hex::decode(&computed), hex::decode(expected_hash_hex)) else {
        return false;
    };
    a.ct_eq(&b).into()
}

/// Split a bearer token of the form `sk-<prefix>.<secret>` into its parts.
fn split_bearer(token: &str) -> Option<(&str, &str)> {
    let rest = token.strip_prefix("sk-")?;
    let (prefix, secret) = rest.split_once('.')?;
    if prefix.len() != KEY_PREFIX_LEN || secret.is_empty() {
        return None;
    }
    Some((prefix, secret))
}

/// Resolves an `Authorization: Bearer` header into an immutable
/// [`RequestContext`] (C1).
pub struct ContextResolver {
    store: Arc<dyn GatewayStore>,
}

impl ContextResolver {
    #[must_use]
    pub fn new(store: Arc<dyn GatewayStore>) -> Self {
        Self { store }
    }

    /// Authenticate `bearer` and load the tenant, key, and merged guardrail
    /// policy into a fresh [`RequestContext`].
    ///
    /// Fails with [`GatewayError::Authentication`] if the token is
    /// malformed, the key is unknown, revoked, disabled, or its tenant is
    /// disabled.
    pub async fn resolve(&self, bearer: &str) -> Result<RequestContext, GatewayError> {
        let (prefix, secret) = split_bearer(bearer)
            .ok_or_else(|| GatewayError::Authentication("malformed bearer token".into()))?;

        debug!(prefix, "resolving request context");

        let key = self
            .store
            .find_api_key_by_prefix(prefix)
            .await?
            .ok_or_else(|| GatewayError::Authentication("unknown api key".into()))?;

        if !verify_secret(secret, &key.salt, &key.secret_hash) {
            return Err(GatewayError::Authentication("secret mismatch".into()));
        }

        if !key.is_active() {
            return Err(GatewayError::Authentication("api key is revoked or disabled".into()));
        }

        let tenant = self
            .store
            .find_tenant(&key.tenant_id)
            .await?
            .ok_or_else(|| GatewayError::Authentication("tenant not found".into()))?;

        if !tenant.enabled {
            return Err(GatewayError::Forbidden("tenant is suspended".into()));
        }

        let tenant_policy = self.store.tenant_guardrail_policy(&tenant.id).await?;
        let key_policy = self.store.api_key_guardrail_policy(&key.id).await?;
        let effective_policy = key_policy.merged_over(&tenant_policy);

        Ok(RequestContext::new(tenant, key, effective_policy))
    }

    /// Whether `ctx`'s key may call `model`. Pulled out of `resolve` so the
    /// pipeline can check it only once the request body names a model.
    #[must_use]
    pub fn permits_model(key: &ApiKey, model: &str) -> bool {
        key.permits_model(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_secret("salt123", "supersecret");
        assert!(verify_secret("supersecret", "salt123", &hash));
        assert!(!verify_secret("wrong", "salt123", &hash));
    }

    #[test]
    fn split_bearer_requires_prefix_length() {
        assert!(split_bearer("sk-shortprefix.secret").is_none());
        assert!(split_bearer("sk-abcdef123456.secret").is_some());
        assert!(split_bearer("not-a-bearer-token").is_none());
    }

    #[test]
    fn split_bearer_rejects_empty_secret() {
        assert!(split_bearer("sk-abcdef123456.").is_none());
    }
}
