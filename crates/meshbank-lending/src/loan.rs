//! Loan and application records

use chrono::{DateTime, Duration, Utc};
use meshbank_protocol::{ApplicationStatus, ApplicationView, LoanStatus, LoanView, PaymentView};
use meshbank_types::{ApplicationId, LoanId, Money, PaymentId};
use serde::{Deserialize, Serialize};

use crate::credit::CreditTier;

/// A pending (or resolved) loan application. The tier, rate and totals are
/// a snapshot taken when the application was made.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub account: String,
    pub amount: Money,
    pub term_days: u32,
    pub tier: CreditTier,
    pub score: u16,
    pub rate: Money,
    pub interest: Money,
    pub total_owed: Money,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub denial_reason: Option<String>,
    pub loan_id: Option<LoanId>,
}

impl Application {
    pub fn is_pending(&self) -> bool {
        self.status == ApplicationStatus::Pending
    }

    pub fn view(&self) -> ApplicationView {
        ApplicationView {
            id: self.id.clone(),
            account: self.account.clone(),
            amount: self.amount,
            term_days: self.term_days,
            tier: self.tier.to_string(),
            score: self.score,
            rate: self.rate,
            interest: self.interest,
            total_owed: self.total_owed,
            status: self.status,
            created_at: self.created_at,
            resolved_at: self.resolved_at,
            resolved_by: self.resolved_by.clone(),
            denial_reason: self.denial_reason.clone(),
            loan_id: self.loan_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    /// Idempotency key supplied by the payer
    #[serde(default)]
    pub key: Option<String>,
    pub amount: Money,
    pub remaining_after: Money,
    pub paid_at: DateTime<Utc>,
}

/// An issued loan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub account: String,
    pub application_id: ApplicationId,
    pub principal: Money,
    /// Frozen at issuance
    pub rate: Money,
    pub interest: Money,
    pub total_owed: Money,
    pub remaining: Money,
    pub late_fees: Money,
    pub term_days: u32,
    pub issued_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub defaulted_at: Option<DateTime<Utc>>,
    pub status: LoanStatus,
    pub payments: Vec<Payment>,
    /// Overdue days already charged a late fee
    pub fee_days_applied: u32,
    /// The monitor has dealt with the lock threshold for this loan
    pub lock_requested: bool,
    /// This loan's delinquency placed the current account lock
    pub caused_lock: bool,
}

impl Loan {
    /// Issue a loan from an approved application
    pub fn issue(application: &Application, now: DateTime<Utc>) -> Self {
        Self {
            id: LoanId::new(),
            account: application.account.clone(),
            application_id: application.id.clone(),
            principal: application.amount,
            rate: application.rate,
            interest: application.interest,
            total_owed: application.total_owed,
            remaining: application.total_owed,
            late_fees: Money::ZERO,
            term_days: application.term_days,
            issued_at: now,
            due_at: now + Duration::days(application.term_days as i64),
            paid_at: None,
            defaulted_at: None,
            status: LoanStatus::Active,
            payments: Vec::new(),
            fee_days_applied: 0,
            lock_requested: false,
            caused_lock: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == LoanStatus::Active
    }

    /// Whole days past the due date, zero if not yet due
    pub fn days_overdue(&self, now: DateTime<Utc>) -> u32 {
        if now <= self.due_at {
            return 0;
        }
        (now - self.due_at).num_days().max(0) as u32
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && now > self.due_at
    }

    pub fn view(&self) -> LoanView {
        LoanView {
            id: self.id.clone(),
            account: self.account.clone(),
            application_id: self.application_id.clone(),
            principal: self.principal,
            rate: self.rate,
            interest: self.interest,
            total_owed: self.total_owed,
            remaining: self.remaining,
            late_fees: self.late_fees,
            term_days: self.term_days,
            issued_at: self.issued_at,
            due_at: self.due_at,
            paid_at: self.paid_at,
            status: self.status,
            caused_lock: self.caused_lock,
            payments: self
                .payments
                .iter()
                .map(|p| PaymentView {
                    id: p.id.clone(),
                    amount: p.amount,
                    remaining_after: p.remaining_after,
                    paid_at: p.paid_at,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn application() -> Application {
        Application {
            id: ApplicationId::new(),
            account: "alice".into(),
            amount: dec!(1000),
            term_days: 15,
            tier: CreditTier::Fair,
            score: 660,
            rate: dec!(0.12),
            interest: dec!(120),
            total_owed: dec!(1120),
            status: ApplicationStatus::Approved,
            created_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
            denial_reason: None,
            loan_id: None,
        }
    }

    #[test]
    fn test_issue_copies_snapshot() {
        let now = Utc::now();
        let loan = Loan::issue(&application(), now);
        assert_eq!(loan.remaining, dec!(1120));
        assert_eq!(loan.rate, dec!(0.12));
        assert_eq!(loan.due_at, now + Duration::days(15));
        assert!(loan.is_active());
    }

    #[test]
    fn test_days_overdue() {
        let now = Utc::now();
        let loan = Loan::issue(&application(), now);
        assert_eq!(loan.days_overdue(now), 0);
        assert_eq!(loan.days_overdue(loan.due_at), 0);
        assert!(!loan.is_overdue(loan.due_at));
        assert_eq!(loan.days_overdue(loan.due_at + Duration::hours(23)), 0);
        assert!(loan.is_overdue(loan.due_at + Duration::hours(23)));
        assert_eq!(loan.days_overdue(loan.due_at + Duration::days(7)), 7);
    }
}
