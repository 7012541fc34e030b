//! Data transfer objects carried inside replies

use chrono::{DateTime, Utc};
use meshbank_types::{ApplicationId, LoanId, Money, PaymentId};
use serde::{Deserialize, Serialize};

/// Granted on successful login
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginGrant {
    pub token: String,
    pub username: String,
    pub balance: Money,
    pub is_admin: bool,
}

/// Public view of an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountView {
    pub username: String,
    pub balance: Money,
    pub locked: bool,
    pub lock_reason: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub online: bool,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub transaction_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub from: String,
    pub to: String,
    pub amount: Money,
    pub from_balance: Money,
}

/// Answer to `verify_account_exists`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountStatus {
    pub account: String,
    pub exists: bool,
    pub locked: bool,
    pub lock_reason: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
}

/// Answer to `validate_session`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub account: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityView {
    pub account: String,
    pub score: u16,
    pub tier: String,
    pub rate: Money,
    pub tier_limit: Money,
    pub outstanding: Money,
    pub available: Money,
    pub min_loan: Money,
    pub eligible: bool,
}

/// Pending application lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Denied,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationView {
    pub id: ApplicationId,
    pub account: String,
    pub amount: Money,
    pub term_days: u32,
    pub tier: String,
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

/// Loan lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Active,
    Paid,
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentView {
    pub id: PaymentId,
    pub amount: Money,
    pub remaining_after: Money,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanView {
    pub id: LoanId,
    pub account: String,
    pub application_id: ApplicationId,
    pub principal: Money,
    pub rate: Money,
    pub interest: Money,
    pub total_owed: Money,
    pub remaining: Money,
    pub late_fees: Money,
    pub term_days: u32,
    pub issued_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub status: LoanStatus,
    pub caused_lock: bool,
    pub payments: Vec<PaymentView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditEventView {
    pub at: DateTime<Utc>,
    pub event: String,
    pub detail: String,
    pub score_after: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditView {
    pub account: String,
    pub score: u16,
    pub tier: String,
    pub total_loans: u32,
    pub loans_paid_on_time: u32,
    pub loans_paid_late: u32,
    pub defaults: u32,
    pub active_loans: u32,
    pub updated_at: DateTime<Utc>,
    pub history: Vec<CreditEventView>,
}
