use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use keystone_core::{BudgetPolicy, BudgetStatus, MicroUsd, TenantId};
use keystone_state::{KeyKind, StateKey, StateStore};
use keystone_store::GatewayStore;

use crate::error::GatewayError;

/// Severity derived from a [`BudgetStatus`] against a policy's alert
/// thresholds. `Ok` never alerts; `Warning`/`Exceeded` do, subject to
/// cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Ok,
    Warning,
    Exceeded,
}

/// A configured warning threshold below this floor would fire on nearly
/// every request; operators cannot configure a lower bar than this.
const MIN_WARNING_THRESHOLD: f64 = 0.5;

impl AlertLevel {
    #[must_use]
    pub fn from_status(status: &BudgetStatus, thresholds: &[f64]) -> Self {
        if status.is_exceeded() {
            return Self::Exceeded;
        }
        let fraction = status.fraction_used();
        let lowest_sub_threshold = thresholds
            .iter()
            .copied()
            .filter(|t| *t < 1.0)
            .fold(f64::INFINITY, f64::min);
        if !lowest_sub_threshold.is_finite() {
            return Self::Ok;
        }
        let warns_at = lowest_sub_threshold.max(MIN_WARNING_THRESHOLD);
        if fraction >= warns_at {
            Self::Warning
        } else {
            Self::Ok
        }
    }
}

/// A budget threshold crossing, handed to every configured [`AlertSink`].
#[derive(Debug, Clone)]
pub struct BudgetAlert {
    pub tenant_id: TenantId,
    pub level: AlertLevel,
    pub status: BudgetStatus,
    pub fired_at: DateTime<Utc>,
}

/// An opaque alert destination (log, SMTP, webhook). Delivery to external
/// channels is out of scope here; sinks must apply their own bounded
/// timeout and must never retry on failure.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &BudgetAlert);
}

/// Sink that records the alert through the tracing subscriber. Always
/// available, used as the default channel when no external sink is wired.
#[derive(Debug, Default)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn send(&self, alert: &BudgetAlert) {
        match alert.level {
            AlertLevel::Exceeded => warn!(
                tenant_id = %alert.tenant_id,
                used = alert.status.used.0,
                limit = alert.status.limit.0,
                "budget exceeded"
            ),
            AlertLevel::Warning => warn!(
                tenant_id = %alert.tenant_id,
                used = alert.status.used.0,
                limit = alert.status.limit.0,
                "budget warning threshold crossed"
            ),
            AlertLevel::Ok => {}
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CooldownState {
    level: AlertLevel,
    sent_at: DateTime<Utc>,
}

/// Computes window-bounded spend, derives alert level, and dispatches
/// cooldown-gated alerts to configured sinks (C3).
pub struct BudgetLedger {
    store: Arc<dyn GatewayStore>,
    state: Arc<dyn StateStore>,
    sinks: Vec<Arc<dyn AlertSink>>,
    cooldown: Duration,
}

impl BudgetLedger {
    #[must_use]
    pub fn new(store: Arc<dyn GatewayStore>, state: Arc<dyn StateStore>, cooldown: Duration) -> Self {
        Self {
            store,
            state,
            sinks: vec![Arc::new(TracingAlertSink)],
            cooldown,
        }
    }

    #[must_use]
    pub fn with_sinks(mut self, sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        self.sinks = sinks;
        self
    }

    /// Pre-flight check: resolve the current window and sum recorded spend.
    /// Callers treat `is_exceeded() == true` as a 403 and still log a
    /// denied request row so denials stay visible in usage.
    pub async fn check_budget(&self, policy: &BudgetPolicy) -> Result<BudgetStatus, GatewayError> {
        self.store
            .budget_status(&policy.tenant_id, policy.window, policy.limit)
            .await
            .map_err(GatewayError::from)
    }

    /// Evaluate `status` against `policy`'s thresholds and dispatch an alert
    /// if the level has changed (or is `Exceeded`) since the last dispatch
    /// and the cooldown has elapsed. Alert-delivery failures never surface
    /// to the caller.
    pub async fn maybe_alert(&self, policy: &BudgetPolicy, status: &BudgetStatus, now: DateTime<Utc>) {
        let level = AlertLevel::from_status(status, &policy.alert_thresholds);
        if level == AlertLevel::Ok {
            return;
        }

        let key = StateKey::new(
            policy.tenant_id.clone(),
            KeyKind::Custom("budget_alert".into()),
            status.window.label(),
        );

        let previous = match self.state.get(&key).await {
            Ok(raw) => raw.and_then(|s| serde_json::from_str::<CooldownState>(&s).ok()),
            Err(err) => {
                warn!(error = %err, "cooldown state unavailable, dispatching anyway");
                None
            }
        };

        let should_fire = match &previous {
            Some(prev) => {
                let elapsed = now.signed_duration_since(prev.sent_at);
                let cooldown_elapsed = elapsed.to_std().unwrap_or(Duration::ZERO) >= self.cooldown;
                cooldown_elapsed && (prev.level != level || level == AlertLevel::Exceeded)
            }
            None => true,
        };

        if !should_fire {
            return;
        }

        let alert = BudgetAlert {
            tenant_id: policy.tenant_id.clone(),
            level,
            status: status.clone(),
            fired_at: now,
        };

        for sink in &self.sinks {
            sink.send(&alert).await;
        }

        let new_state = CooldownState { level, sent_at: now };
        if let Ok(serialized) = serde_json::to_string(&new_state) {
            if let Err(err) = self.state.set(&key, &serialized, None).await {
                warn!(error = %err, "failed to persist alert cooldown state");
            }
        }

        info!(tenant_id = %policy.tenant_id, ?level, "budget alert dispatched");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::BudgetWindow;
    use keystone_state_memory::MemoryStateStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn status(used: i64, limit: i64) -> BudgetStatus {
        BudgetStatus {
            tenant_id: TenantId::new("acme"),
            window: BudgetWindow::CalendarMonth,
            used: MicroUsd(used),
            limit: MicroUsd(limit),
            remaining: MicroUsd(limit - used),
            resets_at: Utc::now(),
        }
    }

    #[test]
    fn level_is_ok_below_threshold() {
        let level = AlertLevel::from_status(&status(10, 100), &[0.5, 0.8]);
        assert_eq!(level, AlertLevel::Ok);
    }

    #[test]
    fn level_is_warning_above_threshold() {
        let level = AlertLevel::from_status(&status(60, 100), &[0.5, 0.8]);
        assert_eq!(level, AlertLevel::Warning);
    }

    #[test]
    fn level_is_exceeded_at_limit() {
        let level = AlertLevel::from_status(&status(100, 100), &[0.5, 0.8]);
        assert_eq!(level, AlertLevel::Exceeded);
    }

    #[test]
    fn low_configured_threshold_is_floored_at_half() {
        let level = AlertLevel::from_status(&status(30, 100), &[0.2]);
        assert_eq!(level, AlertLevel::Ok);

        let level = AlertLevel::from_status(&status(55, 100), &[0.2]);
        assert_eq!(level, AlertLevel::Warning);
    }

    #[test]
    fn no_sub_one_threshold_never_warns() {
        let level = AlertLevel::from_status(&status(99, 100), &[1.0]);
        assert_eq!(level, AlertLevel::Ok);
    }

    struct CountingSink(Arc<AtomicUsize>);

    #[async_trait]
    impl AlertSink for CountingSink {
        async fn send(&self, _alert: &BudgetAlert) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn repeated_alerts_within_cooldown_are_suppressed() {
        let count = Arc::new(AtomicUsize::new(0));
        let state = Arc::new(MemoryStateStore::new());
        let policy = BudgetPolicy {
            tenant_id: TenantId::new("acme"),
            window: BudgetWindow::CalendarMonth,
            limit: MicroUsd(100),
            alert_thresholds: vec![0.5, 0.8],
        };

        let ledger = BudgetLedgerTestHarness::new(state, count.clone());
        let now = Utc::now();
        ledger.maybe_alert(&policy, &status(90, 100), now).await;
        ledger.maybe_alert(&policy, &status(91, 100), now).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    /// Thin wrapper exposing [`BudgetLedger::maybe_alert`] without requiring
    /// a real [`GatewayStore`], since that method never touches the store.
    struct BudgetLedgerTestHarness {
        inner: BudgetLedger,
    }

    impl BudgetLedgerTestHarness {
        fn new(state: Arc<dyn StateStore>, counter: Arc<AtomicUsize>) -> Self {
            struct Unused;
            #[async_trait]
            impl GatewayStore for Unused {
                async fn find_tenant(
                    &self,
                    _id: &TenantId,
                ) -> Result<Option<keystone_core::Tenant>, keystone_store::StoreError> {
                    unreachable!()
                }
                async fn find_budget_policy(
                    &self,
                    _id: &TenantId,
                ) -> Result<Option<BudgetPolicy>, keystone_store::StoreError> {
                    unreachable!()
                }
                async fn tenant_guardrail_policy(
                    &self,
                    _id: &TenantId,
                ) -> Result<keystone_core::GuardrailPolicy, keystone_store::StoreError> {
                    unreachable!()
                }
                async fn api_key_guardrail_policy(
                    &self,
                    _id: &keystone_core::ApiKeyId,
                ) -> Result<keystone_core::GuardrailPolicy, keystone_store::StoreError> {
                    unreachable!()
                }
                async fn find_api_key_by_prefix(
                    &self,
                    _prefix: &str,
                ) -> Result<Option<keystone_core::ApiKey>, keystone_store::StoreError> {
                    unreachable!()
                }
                async fn load_catalog(&self) -> Result<keystone_core::Catalog, keystone_store::StoreError> {
                    unreachable!()
                }
                async fn record_guardrail_event(
                    &self,
                    _event: &keystone_core::GuardrailEvent,
                ) -> Result<(), keystone_store::StoreError> {
                    unreachable!()
                }
                async fn find_idempotent_response(
                    &self,
                    _tenant_id: &TenantId,
                    _idempotency_key: &str,
                ) -> Result<Option<keystone_store::IdempotencyRecord>, keystone_store::StoreError> {
                    unreachable!()
                }
                async fn budget_status(
                    &self,
                    _tenant_id: &TenantId,
                    _window: keystone_core::BudgetWindow,
                    _limit: MicroUsd,
                ) -> Result<BudgetStatus, keystone_store::StoreError> {
                    unreachable!()
                }
                async fn record_usage_transaction(
                    &self,
                    _request: &keystone_core::RequestRecord,
                    _usage: Option<&keystone_core::UsageRecord>,
                    _budget_window: keystone_core::BudgetWindow,
                    _budget_limit: MicroUsd,
                ) -> Result<BudgetStatus, keystone_store::StoreError> {
                    unreachable!()
                }
            }

            let sink = Arc::new(CountingSink(counter));
            let inner = BudgetLedger::new(Arc::new(Unused), state, Duration::from_secs(300))
                .with_sinks(vec![sink]);
            Self { inner }
        }

        async fn maybe_alert(&self, policy: &BudgetPolicy, status: &BudgetStatus, now: DateTime<Utc>) {
            self.inner.maybe_alert(policy, status, now).await;
        }
    }
}
