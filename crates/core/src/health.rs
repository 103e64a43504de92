use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health state of a single route, driven by a consecutive-failure counter
/// and, for `Offline`, a background prober that attempts recovery.
///
/// State transitions:
/// - `Healthy` -> `Degraded` after `degraded_threshold` consecutive failures.
/// - `Degraded` -> `Offline` after `offline_threshold` consecutive failures.
/// - `Degraded` or `Offline` -> `Healthy` on the next successful call or probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Offline,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// Thresholds governing the health state machine for a route.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthThresholds {
    pub degraded_after: u32,
    pub offline_after: u32,
    /// Cooldown between recovery probes of the same non-healthy route.
    pub probe_interval_secs: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            degraded_after: 3,
            offline_after: 8,
            probe_interval_secs: 300,
        }
    }
}

/// Mutable health record tracked per route by the router engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthRecord {
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub last_probed_at: Option<DateTime<Utc>>,
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self {
            state: HealthState::Healthy,
            consecutive_failures: 0,
            last_probed_at: None,
        }
    }
}

impl HealthRecord {
    #[must_use]
    pub fn on_success(self) -> Self {
        Self {
            state: HealthState::Healthy,
            consecutive_failures: 0,
            last_probed_at: self.last_probed_at,
        }
    }

    #[must_use]
    pub fn on_failure(self, thresholds: HealthThresholds) -> Self {
        let failures = self.consecutive_failures.saturating_add(1);
        let state = if failures >= thresholds.offline_after {
            HealthState::Offline
        } else if failures >= thresholds.degraded_after {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };
        Self {
            state,
            consecutive_failures: failures,
            last_probed_at: self.last_probed_at,
        }
    }

    #[must_use]
    pub fn is_eligible_for_selection(self) -> bool {
        self.state != HealthState::Offline
    }

    /// Record that a recovery probe was just attempted against this route,
    /// regardless of its outcome.
    #[must_use]
    pub fn probed_at(self, now: DateTime<Utc>) -> Self {
        Self {
            last_probed_at: Some(now),
            ..self
        }
    }

    /// Whether enough time has passed since the last probe to try again.
    #[must_use]
    pub fn is_probe_due(self, now: DateTime<Utc>, cooldown_secs: u64) -> bool {
        match self.last_probed_at {
            None => true,
            Some(last) => {
                let elapsed = now.signed_duration_since(last);
                elapsed < chrono::Duration::zero() || elapsed >= chrono::Duration::seconds(i64::try_from(cooldown_secs).unwrap_or(i64::MAX))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_through_degraded_to_offline() {
        let thresholds = HealthThresholds {
            degraded_after: 2,
            offline_after: 4,
            probe_interval_secs: 30,
        };
        let mut record = HealthRecord::default();
        assert_eq!(record.state, HealthState::Healthy);

        record = record.on_failure(thresholds);
        assert_eq!(record.state, HealthState::Healthy);
        record = record.on_failure(thresholds);
        assert_eq!(record.state, HealthState::Degraded);
        record = record.on_failure(thresholds);
        record = record.on_failure(thresholds);
        assert_eq!(record.state, HealthState::Offline);
        assert!(!record.is_eligible_for_selection());
    }

    #[test]
    fn success_resets_to_healthy() {
        let thresholds = HealthThresholds::default();
        let mut record = HealthRecord::default();
        for _ in 0..thresholds.offline_after {
            record = record.on_failure(thresholds);
        }
        assert_eq!(record.state, HealthState::Offline);
        record = record.on_success();
        assert_eq!(record.state, HealthState::Healthy);
        assert_eq!(record.consecutive_failures, 0);
    }

    #[test]
    fn probe_is_not_due_again_until_cooldown_elapses() {
        let now = Utc::now();
        let record = HealthRecord::default().probed_at(now);
        assert!(!record.is_probe_due(now + chrono::Duration::seconds(60), 300));
        assert!(record.is_probe_due(now + chrono::Duration::seconds(300), 300));
    }

    #[test]
    fn probe_is_due_when_never_probed() {
        assert!(HealthRecord::default().is_probe_due(Utc::now(), 300));
    }
}
