use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters tracking request-plane outcomes.
///
/// All counters use relaxed ordering for maximum throughput. For a
/// consistent point-in-time view, call [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    pub requests_total: AtomicU64,
    pub requests_succeeded: AtomicU64,
    pub requests_failed: AtomicU64,
    pub rate_limited: AtomicU64,
    pub budget_exceeded: AtomicU64,
    pub guardrail_blocked: AtomicU64,
    pub streaming_requests: AtomicU64,
    pub route_failovers: AtomicU64,
    pub idempotent_replays: AtomicU64,
    pub tokens_total: AtomicU64,
    pub cost_micros_total: AtomicU64,
}

impl GatewayMetrics {
    pub fn increment_requests_total(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_requests_succeeded(&self) {
        self.requests_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_requests_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_budget_exceeded(&self) {
        self.budget_exceeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_guardrail_blocked(&self) {
        self.guardrail_blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_streaming_requests(&self) {
        self.streaming_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_route_failovers(&self) {
        self.route_failovers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_idempotent_replays(&self) {
        self.idempotent_replays.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_tokens(&self, tokens: u64) {
        self.tokens_total.fetch_add(tokens, Ordering::Relaxed);
    }

    pub fn add_cost_micros(&self, micros: i64) {
        if let Ok(micros) = u64::try_from(micros) {
            self.cost_micros_total.fetch_add(micros, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_succeeded: self.requests_succeeded.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            budget_exceeded: self.budget_exceeded.load(Ordering::Relaxed),
            guardrail_blocked: self.guardrail_blocked.load(Ordering::Relaxed),
            streaming_requests: self.streaming_requests.load(Ordering::Relaxed),
            route_failovers: self.route_failovers.load(Ordering::Relaxed),
            idempotent_replays: self.idempotent_replays.load(Ordering::Relaxed),
            tokens_total: self.tokens_total.load(Ordering::Relaxed),
            cost_micros_total: self.cost_micros_total.load(Ordering::Relaxed),
        }
    }
}

/// A plain data snapshot of [`GatewayMetrics`] at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub rate_limited: u64,
    pub budget_exceeded: u64,
    pub guardrail_blocked: u64,
    pub streaming_requests: u64,
    pub route_failovers: u64,
    pub idempotent_replays: u64,
    pub tokens_total: u64,
    pub cost_micros_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_metrics_are_zero() {
        let m = GatewayMetrics::default();
        assert_eq!(m.snapshot().requests_total, 0);
    }

    #[test]
    fn increments_are_visible_in_snapshot() {
        let m = GatewayMetrics::default();
        m.increment_requests_total();
        m.increment_requests_total();
        m.increment_rate_limited();
        m.add_tokens(42);
        let snap = m.snapshot();
        assert_eq!(snap.requests_total, 2);
        assert_eq!(snap.rate_limited, 1);
        assert_eq!(snap.tokens_total, 42);
    }
}
