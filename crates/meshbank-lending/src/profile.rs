//! Credit profiles

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use meshbank_protocol::{CreditEventView, CreditView};
use serde::{Deserialize, Serialize};

use crate::credit::{score, CreditTier, ScoreInputs};

/// Kinds of credit history events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditEventKind {
    ProfileOpened,
    LoanIssued,
    ApplicationDenied,
    PartialPayment,
    PaidOnTime,
    PaidLate,
    AccountLocked,
    Defaulted,
}

impl CreditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditEventKind::ProfileOpened => "profile_opened",
            CreditEventKind::LoanIssued => "loan_issued",
            CreditEventKind::ApplicationDenied => "application_denied",
            CreditEventKind::PartialPayment => "partial_payment",
            CreditEventKind::PaidOnTime => "paid_on_time",
            CreditEventKind::PaidLate => "paid_late",
            CreditEventKind::AccountLocked => "account_locked",
            CreditEventKind::Defaulted => "defaulted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditEvent {
    pub at: DateTime<Utc>,
    pub kind: CreditEventKind,
    pub detail: String,
    pub score_after: u16,
}

/// A borrower's payment history. The score is always derived from the
/// counters, never set directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditProfile {
    pub account: String,
    pub score: u16,
    pub total_loans: u32,
    pub paid_on_time: u32,
    pub paid_late: u32,
    pub defaults: u32,
    pub active_loans: u32,
    pub history: VecDeque<CreditEvent>,
    pub updated_at: DateTime<Utc>,
}

impl CreditProfile {
    pub fn new(account: &str, base: u16, now: DateTime<Utc>) -> Self {
        let mut profile = Self {
            account: account.to_string(),
            score: base,
            total_loans: 0,
            paid_on_time: 0,
            paid_late: 0,
            defaults: 0,
            active_loans: 0,
            history: VecDeque::new(),
            updated_at: now,
        };
        profile.recompute(0, base, now);
        profile
    }

    pub fn tier(&self) -> CreditTier {
        CreditTier::from_score(self.score)
    }

    pub fn inputs(&self) -> ScoreInputs {
        ScoreInputs {
            paid_on_time: self.paid_on_time,
            paid_late: self.paid_late,
            defaults: self.defaults,
            active_loans: self.active_loans,
        }
    }

    /// Re-derive the score from the counters and the current active count
    pub fn recompute(&mut self, active_loans: u32, base: u16, now: DateTime<Utc>) -> u16 {
        self.active_loans = active_loans;
        self.score = score(&self.inputs(), base);
        self.updated_at = now;
        self.score
    }

    /// Append a history event, dropping the oldest beyond `cap`
    pub fn log(&mut self, kind: CreditEventKind, detail: impl Into<String>, cap: usize, now: DateTime<Utc>) {
        self.history.push_back(CreditEvent {
            at: now,
            kind,
            detail: detail.into(),
            score_after: self.score,
        });
        while self.history.len() > cap {
            self.history.pop_front();
        }
    }

    pub fn view(&self) -> CreditView {
        CreditView {
            account: self.account.clone(),
            score: self.score,
            tier: self.tier().to_string(),
            total_loans: self.total_loans,
            loans_paid_on_time: self.paid_on_time,
            loans_paid_late: self.paid_late,
            defaults: self.defaults,
            active_loans: self.active_loans,
            updated_at: self.updated_at,
            history: self
                .history
                .iter()
                .map(|e| CreditEventView {
                    at: e.at,
                    event: e.kind.as_str().to_string(),
                    detail: e.detail.clone(),
                    score_after: e.score_after,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_capped() {
        let now = Utc::now();
        let mut profile = CreditProfile::new("alice", 650, now);
        for i in 0..10 {
            profile.log(CreditEventKind::PartialPayment, format!("payment {i}"), 3, now);
        }
        assert_eq!(profile.history.len(), 3);
        assert_eq!(profile.history[0].detail, "payment 7");
    }

    #[test]
    fn test_score_follows_counters() {
        let now = Utc::now();
        let mut profile = CreditProfile::new("bob", 650, now);
        assert_eq!(profile.tier(), CreditTier::Fair);

        profile.defaults = 1;
        assert_eq!(profile.recompute(0, 650, now), 550);
        assert_eq!(profile.tier(), CreditTier::VeryPoor);

        profile.paid_on_time = 1;
        assert_eq!(profile.recompute(0, 650, now), 700);
        assert_eq!(profile.view().tier, "GOOD");
    }
}
