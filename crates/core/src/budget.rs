use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::money::MicroUsd;
use crate::types::TenantId;

/// The recurrence pattern a spend budget resets on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum BudgetWindow {
    CalendarMonth,
    Weekly,
    RollingDays(u32),
}

impl BudgetWindow {
    /// Compute the `[start, end)` boundaries of the window containing `now`.
    ///
    /// `CalendarMonth` and `Weekly` are anchored to the UTC calendar so all
    /// tenants on the same plan reset together; `RollingDays` has no fixed
    /// anchor at all — it is the literal trailing `n * 24h` window ending at
    /// `now`, sliding forward on every call rather than snapping to a bucket.
    #[must_use]
    pub fn boundaries(self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        match self {
            Self::CalendarMonth => {
                let start = Utc
                    .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
                    .single()
                    .unwrap_or(now);
                let (next_year, next_month) = if now.month() == 12 {
                    (now.year() + 1, 1)
                } else {
                    (now.year(), now.month() + 1)
                };
                let end = Utc
                    .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
                    .single()
                    .unwrap_or(now);
                (start, end)
            }
            Self::Weekly => {
                let days_since_monday = i64::from(now.weekday().num_days_from_monday());
                let start = (now - ChronoDuration::days(days_since_monday))
                    .date_naive()
                    .and_hms_opt(0, 0, 0)
                    .map(|dt| Utc.from_utc_datetime(&dt))
                    .unwrap_or(now);
                (start, start + ChronoDuration::days(7))
            }
            Self::RollingDays(n) => (now - ChronoDuration::days(i64::from(n)), now),
        }
    }

    /// Stable label used as part of the state-store counter key, so that
    /// switching a tenant's window kind does not collide with stale counters
    /// from the previous kind.
    #[must_use]
    pub fn label(self) -> String {
        match self {
            Self::CalendarMonth => "calendar_month".to_string(),
            Self::Weekly => "weekly".to_string(),
            Self::RollingDays(n) => format!("rolling_{n}d"),
        }
    }
}

/// A tenant-scoped spend ceiling for a recurring window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetPolicy {
    pub tenant_id: TenantId,
    pub window: BudgetWindow,
    pub limit: MicroUsd,
    /// Fractions of the limit (e.g. 0.5, 0.8, 1.0) at which an alert fires.
    pub alert_thresholds: Vec<f64>,
}

/// Point-in-time read of a tenant's spend against its budget, returned by
/// the status endpoint and attached to response headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub tenant_id: TenantId,
    pub window: BudgetWindow,
    pub used: MicroUsd,
    pub limit: MicroUsd,
    pub remaining: MicroUsd,
    pub resets_at: DateTime<Utc>,
}

impl BudgetStatus {
    #[must_use]
    pub fn is_exceeded(&self) -> bool {
        self.used.0 >= self.limit.0
    }

    /// Fraction of the limit consumed, in `[0.0, +inf)`.
    #[must_use]
    pub fn fraction_used(&self) -> f64 {
        if self.limit.0 <= 0 {
            return 0.0;
        }
        self.used.0 as f64 / self.limit.0 as f64
    }
}

/// State-store key component for the running-total counter of a budget
/// window, mirroring the `{tenant}:{window_label}:{window_index}` shape
/// used for rate-limit counters so both share one key-space convention.
#[must_use]
pub fn budget_counter_key(tenant: &TenantId, window: BudgetWindow, now: DateTime<Utc>) -> String {
    let (start, _end) = window.boundaries(now);
    format!("budget:{tenant}:{}:{}", window.label(), start.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calendar_month_boundaries() {
        let now = Utc.with_ymd_and_hms(2026, 2, 15, 10, 0, 0).unwrap();
        let (start, end) = BudgetWindow::CalendarMonth.boundaries(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn weekly_boundaries_start_on_monday() {
        // 2026-07-30 is a Thursday.
        let now = Utc.with_ymd_and_hms(2026, 7, 30, 12, 0, 0).unwrap();
        let (start, end) = BudgetWindow::Weekly.boundaries(now);
        assert_eq!(start.weekday().num_days_from_monday(), 0);
        assert_eq!(end - start, ChronoDuration::days(7));
    }

    #[test]
    fn rolling_days_window_slides_with_now() {
        let now = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 5).unwrap();
        let (start, end) = BudgetWindow::RollingDays(7).boundaries(now);
        assert_eq!(end, now);
        assert_eq!(start, now - ChronoDuration::days(7));

        let later = now + ChronoDuration::hours(3);
        let (later_start, later_end) = BudgetWindow::RollingDays(7).boundaries(later);
        assert_eq!(later_end, later);
        assert!(later_start > start, "window should slide forward with now");
    }

    #[test]
    fn status_reports_exceeded_and_fraction() {
        let status = BudgetStatus {
            tenant_id: TenantId::new("acme"),
            window: BudgetWindow::CalendarMonth,
            used: MicroUsd(80_000_000),
            limit: MicroUsd(100_000_000),
            remaining: MicroUsd(20_000_000),
            resets_at: Utc::now(),
        };
        assert!(!status.is_exceeded());
        assert!((status.fraction_used() - 0.8).abs() < 1e-9);
    }
}
