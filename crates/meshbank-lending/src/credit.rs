//! Credit Scoring Engine
//!
//! # Tiers
//!
//! | Tier      | Score  | Rate | Max outstanding |
//! |-----------|--------|------|-----------------|
//! | Excellent | ≥ 750  | 5%   | 50 000          |
//! | Good      | ≥ 700  | 8%   | 25 000          |
//! | Fair      | ≥ 650  | 12%  | 10 000          |
//! | Poor      | ≥ 600  | 18%  | 5 000           |
//! | VeryPoor  | < 600  | 25%  | 1 000           |
//!
//! Scoring is a pure function of the payment counters and the number of
//! active loans.

use meshbank_types::Money;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

pub const MIN_SCORE: u16 = 300;
pub const MAX_SCORE: u16 = 850;

/// Points for a perfect on-time record
const ON_TIME_BONUS: i64 = 150;
/// Penalty per late payoff
const LATE_PENALTY: i64 = 15;
/// Penalty per default
const DEFAULT_PENALTY: i64 = 100;
/// Penalty per active loan beyond the free allowance
const EXTRA_LOAN_PENALTY: i64 = 20;
const FREE_ACTIVE_LOANS: u32 = 2;

/// Credit tier levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreditTier {
    Excellent,
    Good,
    Fair,
    Poor,
    VeryPoor,
}

impl CreditTier {
    /// Best to worst
    pub const ALL: [CreditTier; 5] = [
        CreditTier::Excellent,
        CreditTier::Good,
        CreditTier::Fair,
        CreditTier::Poor,
        CreditTier::VeryPoor,
    ];

    /// Lowest score in this tier
    pub fn min_score(&self) -> u16 {
        match self {
            CreditTier::Excellent => 750,
            CreditTier::Good => 700,
            CreditTier::Fair => 650,
            CreditTier::Poor => 600,
            CreditTier::VeryPoor => MIN_SCORE,
        }
    }

    /// Interest charged on the principal, frozen at application time
    pub fn rate(&self) -> Money {
        match self {
            CreditTier::Excellent => dec!(0.05),
            CreditTier::Good => dec!(0.08),
            CreditTier::Fair => dec!(0.12),
            CreditTier::Poor => dec!(0.18),
            CreditTier::VeryPoor => dec!(0.25),
        }
    }

    /// Cap on the borrower's total unpaid active balance
    pub fn max_outstanding(&self) -> Money {
        match self {
            CreditTier::Excellent => dec!(50_000),
            CreditTier::Good => dec!(25_000),
            CreditTier::Fair => dec!(10_000),
            CreditTier::Poor => dec!(5_000),
            CreditTier::VeryPoor => dec!(1_000),
        }
    }

    pub fn from_score(score: u16) -> Self {
        Self::ALL
            .into_iter()
            .find(|tier| score >= tier.min_score())
            .unwrap_or(CreditTier::VeryPoor)
    }

    pub fn name(&self) -> &'static str {
        match self {
            CreditTier::Excellent => "EXCELLENT",
            CreditTier::Good => "GOOD",
            CreditTier::Fair => "FAIR",
            CreditTier::Poor => "POOR",
            CreditTier::VeryPoor => "VERY_POOR",
        }
    }
}

impl std::fmt::Display for CreditTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Counters a score is derived from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreInputs {
    pub paid_on_time: u32,
    pub paid_late: u32,
    pub defaults: u32,
    pub active_loans: u32,
}

/// Compute a score in `[MIN_SCORE, MAX_SCORE]` starting from `base`
pub fn score(inputs: &ScoreInputs, base: u16) -> u16 {
    let closed = inputs.paid_on_time + inputs.paid_late;
    let ratio_points = if closed == 0 {
        0
    } else {
        let scaled = Decimal::from(ON_TIME_BONUS) * Decimal::from(inputs.paid_on_time)
            / Decimal::from(closed);
        scaled
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .unwrap_or(0)
    };

    let extra_loans = inputs.active_loans.saturating_sub(FREE_ACTIVE_LOANS) as i64;
    let raw = base as i64 + ratio_points
        - LATE_PENALTY * inputs.paid_late as i64
        - DEFAULT_PENALTY * inputs.defaults as i64
        - EXTRA_LOAN_PENALTY * extra_loans;

    raw.clamp(MIN_SCORE as i64, MAX_SCORE as i64) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_breakpoints() {
        assert_eq!(CreditTier::from_score(850), CreditTier::Excellent);
        assert_eq!(CreditTier::from_score(750), CreditTier::Excellent);
        assert_eq!(CreditTier::from_score(749), CreditTier::Good);
        assert_eq!(CreditTier::from_score(660), CreditTier::Fair);
        assert_eq!(CreditTier::from_score(600), CreditTier::Poor);
        assert_eq!(CreditTier::from_score(599), CreditTier::VeryPoor);
        assert_eq!(CreditTier::from_score(300), CreditTier::VeryPoor);
        assert_eq!(CreditTier::Fair.rate(), dec!(0.12));
    }

    #[test]
    fn test_no_history_is_base() {
        assert_eq!(score(&ScoreInputs::default(), 650), 650);
    }

    #[test]
    fn test_history_moves_score() {
        let perfect = ScoreInputs {
            paid_on_time: 3,
            ..Default::default()
        };
        assert_eq!(score(&perfect, 650), 800);

        let mixed = ScoreInputs {
            paid_on_time: 1,
            paid_late: 2,
            ..Default::default()
        };
        // 650 + round(50) - 30
        assert_eq!(score(&mixed, 650), 670);

        let crowded = ScoreInputs {
            active_loans: 5,
            ..Default::default()
        };
        assert_eq!(score(&crowded, 650), 590);
    }

    #[test]
    fn test_score_is_bounded() {
        let awful = ScoreInputs {
            paid_late: 40,
            defaults: 10,
            active_loans: 30,
            ..Default::default()
        };
        assert_eq!(score(&awful, 650), MIN_SCORE);

        let stellar = ScoreInputs {
            paid_on_time: 100,
            ..Default::default()
        };
        assert_eq!(score(&stellar, 800), MAX_SCORE);

        for on_time in 0..20 {
            for late in 0..20 {
                for defaults in 0..5 {
                    let s = score(
                        &ScoreInputs {
                            paid_on_time: on_time,
                            paid_late: late,
                            defaults,
                            active_loans: late % 7,
                        },
                        650,
                    );
                    assert!((MIN_SCORE..=MAX_SCORE).contains(&s));
                }
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let inputs = ScoreInputs {
            paid_on_time: 2,
            paid_late: 1,
            defaults: 1,
            active_loans: 3,
        };
        assert_eq!(score(&inputs, 650), score(&inputs, 650));
        // 650 + 100 - 15 - 100 - 20
        assert_eq!(score(&inputs, 650), 615);
    }
}
