use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::warn;

use keystone_core::{RateLimits, TenantId};
use keystone_state::{KeyKind, StateKey, StateStore};

use crate::error::GatewayError;

const RPM_BUCKET_TTL: Duration = Duration::from_secs(120);
const PARALLEL_SLOT_TTL: Duration = Duration::from_secs(300);

fn minute_bucket(now: chrono::DateTime<chrono::Utc>) -> i64 {
    now.timestamp().div_euclid(60)
}

/// Field-wise merge of a scope's own limits over a broader default: `Some`
/// on the narrower scope wins, `None` falls through to the default.
#[must_use]
pub fn merge_rate_limits(narrow: RateLimits, base: RateLimits) -> RateLimits {
    RateLimits {
        requests_per_minute: narrow.requests_per_minute.or(base.requests_per_minute),
        tokens_per_minute: narrow.tokens_per_minute.or(base.tokens_per_minute),
        max_parallel_requests: narrow.max_parallel_requests.or(base.max_parallel_requests),
    }
}

/// A held pair of (key, tenant) rate-limit slots. `release` is idempotent;
/// calling it more than once is a no-op after the first call.
pub struct RateLimitHandle {
    tenant_id: TenantId,
    key_scope_id: String,
    tenant_scope_id: String,
    released: Arc<AtomicBool>,
}

/// Two-level (key, tenant) RPM + TPM + parallel-slot enforcement backed by a
/// shared [`StateStore`] (C2).
pub struct RateLimitCoordinator {
    state: Arc<dyn StateStore>,
}

impl RateLimitCoordinator {
    #[must_use]
    pub fn new(state: Arc<dyn StateStore>) -> Self {
        Self { state }
    }

    /// Acquire both the key-scoped and tenant-scoped slots, in that order.
    /// If the tenant scope refuses, the key scope is released before
    /// returning so no slot is leaked.
    pub async fn acquire(
        &self,
        tenant_id: &TenantId,
        key_scope_id: &str,
        key_limits: RateLimits,
        tenant_limits: RateLimits,
    ) -> Result<RateLimitHandle, GatewayError> {
        let tenant_scope_id = "tenant".to_string();

        self.try_acquire_scope(tenant_id, key_scope_id, key_limits)
            .await?;

        if let Err(err) = self
            .try_acquire_scope(tenant_id, &tenant_scope_id, tenant_limits)
            .await
        {
            self.release_scope(tenant_id, key_scope_id).await;
            return Err(err);
        }

        Ok(RateLimitHandle {
            tenant_id: tenant_id.clone(),
            key_scope_id: key_scope_id.to_string(),
            tenant_scope_id,
            released: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn try_acquire_scope(
        &self,
        tenant_id: &TenantId,
        scope_id: &str,
        limits: RateLimits,
    ) -> Result<(), GatewayError> {
        let bucket = minute_bucket(chrono::Utc::now());

        if let Some(rpm) = limits.requests_per_minute {
            let rpm_key = StateKey::new(
                tenant_id.clone(),
                KeyKind::RateLimitRpm,
                format!("{scope_id}:{bucket}"),
            );
            match self.state.increment(&rpm_key, 1, Some(RPM_BUCKET_TTL)).await {
                Ok(count) if count > i64::from(rpm) => {
                    return Err(GatewayError::RateLimited);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, scope = scope_id, "rpm counter unavailable, failing open");
                }
            }
        }

        if let Some(parallel) = limits.max_parallel_requests {
            let parallel_key = StateKey::new(tenant_id.clone(), KeyKind::ParallelSlot, scope_id);
            match self
                .state
                .increment(&parallel_key, 1, Some(PARALLEL_SLOT_TTL))
                .await
            {
                Ok(count) if count > i64::from(parallel) => {
                    let _ = self.state.increment(&parallel_key, -1, None).await;
                    if let Some(rpm) = limits.requests_per_minute {
                        let rpm_key = StateKey::new(
                            tenant_id.clone(),
                            KeyKind::RateLimitRpm,
                            format!("{scope_id}:{bucket}"),
                        );
                        let _ = self.state.increment(&rpm_key, -1, None).await;
                        let _ = rpm;
                    }
                    return Err(GatewayError::RateLimited);
                }
                Ok(_) => {}
                Err(err) => {
                    return Err(GatewayError::State(err));
                }
            }
        }

        Ok(())
    }

    async fn release_scope(&self, tenant_id: &TenantId, scope_id: &str) {
        let parallel_key = StateKey::new(tenant_id.clone(), KeyKind::ParallelSlot, scope_id);
        if let Err(err) = self.state.increment(&parallel_key, -1, None).await {
            warn!(error = %err, scope = scope_id, "failed to release parallel slot");
        }
    }

    /// Release both scopes in reverse acquisition order (tenant, then key).
    /// Safe to call more than once; only the first call has an effect.
    pub async fn release(&self, handle: &RateLimitHandle) {
        if handle.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.release_scope(&handle.tenant_id, &handle.tenant_scope_id).await;
        self.release_scope(&handle.tenant_id, &handle.key_scope_id).await;
    }

    /// Debit `tokens` against the per-minute token bucket for both scopes,
    /// once the provider has returned a usage figure. Over-limit here never
    /// reverses the already-completed call; callers log the anomaly.
    pub async fn debit_tokens(
        &self,
        tenant_id: &TenantId,
        key_scope_id: &str,
        tokens: u64,
        key_limits: RateLimits,
        tenant_limits: RateLimits,
    ) -> Result<(), GatewayError> {
        self.debit_scope(tenant_id, key_scope_id, tokens, key_limits.tokens_per_minute)
            .await?;
        self.debit_scope(tenant_id, "tenant", tokens, tenant_limits.tokens_per_minute)
            .await
    }

    async fn debit_scope(
        &self,
        tenant_id: &TenantId,
        scope_id: &str,
        tokens: u64,
        tpm: Option<u32>,
    ) -> Result<(), GatewayError> {
        let Some(tpm) = tpm else {
            return Ok(());
        };
        let bucket = minute_bucket(chrono::Utc::now());
        let key = StateKey::new(
            tenant_id.clone(),
            KeyKind::RateLimitTpm,
            format!("{scope_id}:{bucket}"),
        );
        let delta = i64::try_from(tokens).unwrap_or(i64::MAX);
        match self.state.increment(&key, delta, Some(RPM_BUCKET_TTL)).await {
            Ok(count) if count > i64::from(tpm) => Err(GatewayError::RateLimited),
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(error = %err, scope = scope_id, "tpm counter unavailable, failing open");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_state_memory::MemoryStateStore;

    fn limits(rpm: Option<u32>, tpm: Option<u32>, parallel: Option<u32>) -> RateLimits {
        RateLimits {
            requests_per_minute: rpm,
            tokens_per_minute: tpm,
            max_parallel_requests: parallel,
        }
    }

    #[test]
    fn merge_prefers_narrow_scope() {
        let merged = merge_rate_limits(limits(Some(5), None, None), limits(Some(100), Some(1000), Some(2)));
        assert_eq!(merged.requests_per_minute, Some(5));
        assert_eq!(merged.tokens_per_minute, Some(1000));
        assert_eq!(merged.max_parallel_requests, Some(2));
    }

    #[tokio::test]
    async fn parallel_slot_blocks_second_concurrent_request() {
        let state = Arc::new(MemoryStateStore::new());
        let coordinator = RateLimitCoordinator::new(state);
        let tenant = TenantId::new("acme");
        let key_limits = limits(None, None, Some(1));
        let tenant_limits = limits(None, None, None);

        let first = coordinator
            .acquire(&tenant, "key:abc", key_limits, tenant_limits)
            .await
            .expect("first acquire succeeds");

        let second = coordinator
            .acquire(&tenant, "key:abc", key_limits, tenant_limits)
            .await;
        assert!(matches!(second, Err(GatewayError::RateLimited)));

        coordinator.release(&first).await;

        let third = coordinator
            .acquire(&tenant, "key:abc", key_limits, tenant_limits)
            .await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let state = Arc::new(MemoryStateStore::new());
        let coordinator = RateLimitCoordinator::new(state);
        let tenant = TenantId::new("acme");
        let limits = limits(None, None, Some(1));

        let handle = coordinator
            .acquire(&tenant, "key:abc", limits, RateLimits::unlimited())
            .await
            .unwrap();
        coordinator.release(&handle).await;
        coordinator.release(&handle).await;

        let second = coordinator
            .acquire(&tenant, "key:abc", limits, RateLimits::unlimited())
            .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn rpm_limit_rejects_over_threshold() {
        let state = Arc::new(MemoryStateStore::new());
        let coordinator = RateLimitCoordinator::new(state);
        let tenant = TenantId::new("acme");
        let key_limits = limits(Some(1), None, None);

        let first = coordinator
            .acquire(&tenant, "key:abc", key_limits, RateLimits::unlimited())
            .await;
        assert!(first.is_ok());

        let second = coordinator
            .acquire(&tenant, "key:abc", key_limits, RateLimits::unlimited())
            .await;
        assert!(matches!(second, Err(GatewayError::RateLimited)));
    }
}
