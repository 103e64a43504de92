use serde::{Deserialize, Serialize};

/// Per-key (and, with separate values, per-tenant) concurrency and
/// throughput ceilings enforced by the rate-limit coordinator.
///
/// `None` means "no limit at this level" — the corresponding counter is
/// skipped entirely rather than treated as zero.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct RateLimits {
    /// Requests allowed per rolling minute.
    pub requests_per_minute: Option<u32>,
    /// Tokens allowed per rolling minute (prompt + completion, counted on
    /// completion for non-streaming calls and incrementally for streams).
    pub tokens_per_minute: Option<u32>,
    /// Maximum requests that may be in flight simultaneously.
    pub max_parallel_requests: Option<u32>,
}

impl RateLimits {
    #[must_use]
    pub fn unlimited() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_has_no_caps() {
        let limits = RateLimits::unlimited();
        assert!(limits.requests_per_minute.is_none());
        assert!(limits.tokens_per_minute.is_none());
        assert!(limits.max_parallel_requests.is_none());
    }
}
