//! Lending configuration

use meshbank_types::Money;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What happens to an account lock when a loan is paid off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoUnlockPolicy {
    /// Never unlock automatically
    Disabled,
    /// Unlock if the borrower has no other overdue loan, whatever the lock
    /// was for
    NoOtherOverdue,
    /// Like `NoOtherOverdue`, but only locks placed by the delinquency
    /// monitor are lifted
    DelinquencyLocksOnly,
}

/// Loan service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LendingConfig {
    /// Score of a borrower with no history
    pub default_score: u16,
    /// Smallest loan that can be applied for
    pub min_loan: Money,
    /// Longest term in days
    pub max_term_days: u32,
    /// Late fee compounded per overdue day (0.02 = 2%)
    pub late_fee_rate: Money,
    /// Overdue days before the account is locked
    pub days_until_lock: u32,
    /// Overdue days before the loan defaults
    pub days_until_default: u32,
    /// Whether the monitor locks delinquent accounts
    pub auto_lock: bool,
    pub auto_unlock: AutoUnlockPolicy,
    /// Prefix of the lock reason sent to the ledger
    pub lock_reason: String,
    /// Credit history entries kept per account
    pub history_cap: usize,
    /// How often the delinquency monitor sweeps
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for LendingConfig {
    fn default() -> Self {
        Self {
            default_score: 650,
            min_loan: dec!(100),
            max_term_days: 90,
            late_fee_rate: dec!(0.02),
            days_until_lock: 7,
            days_until_default: 30,
            auto_lock: true,
            auto_unlock: AutoUnlockPolicy::NoOtherOverdue,
            lock_reason: "Loan delinquency".to_string(),
            history_cap: 50,
            sweep_interval: Duration::from_secs(60 * 60),
        }
    }
}
