use serde::{Deserialize, Serialize};

/// Cost expressed in micro-dollars (1/1,000,000 of a US dollar).
///
/// This is the source of truth for all cost accounting; cents are derived
/// from it for display and are never accumulated directly, to avoid
/// compounding rounding error across millions of requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct MicroUsd(pub i64);

impl MicroUsd {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Round to whole cents using round-half-up, for display in response
    /// headers and budget status summaries.
    #[must_use]
    pub fn to_cents(self) -> i64 {
        let micros = self.0;
        let sign = if micros < 0 { -1 } else { 1 };
        let abs = micros.abs();
        sign * ((abs + 5_000) / 10_000)
    }

    #[must_use]
    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    #[must_use]
    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Price a token count at a per-million-token micro-dollar rate.
    #[must_use]
    pub fn for_tokens(tokens: u64, micros_per_million_tokens: i64) -> Self {
        let cost = (i128::from(tokens) * i128::from(micros_per_million_tokens)) / 1_000_000;
        Self(cost.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }
}

impl std::ops::Add for MicroUsd {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl std::iter::Sum for MicroUsd {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |a, b| a + b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_half_up_to_cents() {
        assert_eq!(MicroUsd(15_000).to_cents(), 2);
        assert_eq!(MicroUsd(14_999).to_cents(), 1);
        assert_eq!(MicroUsd(5_000).to_cents(), 1);
        assert_eq!(MicroUsd(4_999).to_cents(), 0);
    }

    #[test]
    fn prices_tokens_by_million_rate() {
        // $2.00 per million tokens, 500 tokens => 1_000_000 micros/million * 500/1e6 = 1000 micros
        let cost = MicroUsd::for_tokens(500, 2_000_000);
        assert_eq!(cost, MicroUsd(1_000));
    }

    #[test]
    fn saturating_add_and_sub() {
        let a = MicroUsd(10);
        let b = MicroUsd(3);
        assert_eq!(a.saturating_add(b), MicroUsd(13));
        assert_eq!(a.saturating_sub(b), MicroUsd(7));
    }
}
