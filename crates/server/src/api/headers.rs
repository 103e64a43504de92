//! `X-Budget-*` response headers, derived from a [`BudgetStatus`] read on
//! every successful (and denied) call.

use axum::http::HeaderMap;
use keystone_core::BudgetStatus;
use keystone_gateway::AlertLevel;

/// `BudgetStatus` does not carry the tenant's configured alert thresholds;
/// this mirrors the default ladder `PipelineBuilder` falls back to for
/// tenants without an explicit budget policy.
const DEFAULT_ALERT_THRESHOLDS: [f64; 3] = [0.5, 0.8, 1.0];

pub fn budget_headers(status: &BudgetStatus) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-budget-limit-cents", status.limit.to_cents().into());
    headers.insert("x-budget-total-cents", status.used.to_cents().into());
    headers.insert("x-budget-remaining-cents", status.remaining.to_cents().into());

    match AlertLevel::from_status(status, &DEFAULT_ALERT_THRESHOLDS) {
        AlertLevel::Exceeded => {
            headers.insert("x-budget-exceeded", "true".parse().unwrap());
        }
        AlertLevel::Warning => {
            headers.insert("x-budget-warning", "true".parse().unwrap());
        }
        AlertLevel::Ok => {}
    }

    headers
}
