//! Request types
//!
//! Commands are named in snake_case on the wire; privileged ones carry the
//! `admin_` prefix and require a session whose account holds the admin flag.

use meshbank_types::{ApplicationId, LoanId, Money, ServiceKind};
use serde::{Deserialize, Serialize};

/// Prefix of every privileged command name
pub const ADMIN_PREFIX: &str = "admin_";

/// Any request a service can receive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "service", content = "request", rename_all = "snake_case")]
pub enum RequestBody {
    /// Client-facing ledger command
    Ledger(LedgerRequest),
    /// Client-facing loan command
    Loan(LoanRequest),
    /// Service-to-service call into the ledger
    Rpc(ServiceRpc),
}

impl RequestBody {
    /// The service that owns this request
    pub fn target(&self) -> ServiceKind {
        match self {
            RequestBody::Ledger(_) | RequestBody::Rpc(_) => ServiceKind::Ledger,
            RequestBody::Loan(_) => ServiceKind::Loan,
        }
    }

    /// Wire command name, used for logging
    pub fn command(&self) -> &'static str {
        match self {
            RequestBody::Ledger(r) => r.command(),
            RequestBody::Loan(r) => r.command(),
            RequestBody::Rpc(r) => r.command(),
        }
    }
}

/// Client-facing ledger commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum LedgerRequest {
    Login {
        username: String,
        password: String,
    },
    Logout {
        token: String,
    },
    Balance {
        token: String,
    },
    AccountInfo {
        token: String,
    },
    Transfer {
        token: String,
        to: String,
        amount: Money,
    },
    AdminCreateAccount {
        token: String,
        username: String,
        password: String,
        initial_balance: Money,
        #[serde(default)]
        is_admin: bool,
    },
    AdminSetBalance {
        token: String,
        username: String,
        balance: Money,
    },
    AdminLock {
        token: String,
        username: String,
        reason: String,
    },
    AdminUnlock {
        token: String,
        username: String,
    },
    AdminResetPassword {
        token: String,
        username: String,
        new_password: String,
    },
    AdminListAccounts {
        token: String,
    },
}

impl LedgerRequest {
    pub fn command(&self) -> &'static str {
        match self {
            LedgerRequest::Login { .. } => "login",
            LedgerRequest::Logout { .. } => "logout",
            LedgerRequest::Balance { .. } => "balance",
            LedgerRequest::AccountInfo { .. } => "account_info",
            LedgerRequest::Transfer { .. } => "transfer",
            LedgerRequest::AdminCreateAccount { .. } => "admin_create_account",
            LedgerRequest::AdminSetBalance { .. } => "admin_set_balance",
            LedgerRequest::AdminLock { .. } => "admin_lock",
            LedgerRequest::AdminUnlock { .. } => "admin_unlock",
            LedgerRequest::AdminResetPassword { .. } => "admin_reset_password",
            LedgerRequest::AdminListAccounts { .. } => "admin_list_accounts",
        }
    }

    pub fn is_admin(&self) -> bool {
        self.command().starts_with(ADMIN_PREFIX)
    }
}

/// Client-facing loan commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum LoanRequest {
    Eligibility {
        token: String,
    },
    Apply {
        token: String,
        amount: Money,
        term_days: u32,
    },
    Loans {
        token: String,
    },
    Loan {
        token: String,
        loan_id: LoanId,
    },
    Pay {
        token: String,
        loan_id: LoanId,
        amount: Money,
        /// Caller-chosen key; a retry with the same key is applied once
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payment_key: Option<String>,
    },
    CreditProfile {
        token: String,
    },
    AdminPending {
        token: String,
    },
    AdminApprove {
        token: String,
        application_id: ApplicationId,
    },
    AdminDeny {
        token: String,
        application_id: ApplicationId,
        reason: String,
    },
}

impl LoanRequest {
    pub fn command(&self) -> &'static str {
        match self {
            LoanRequest::Eligibility { .. } => "eligibility",
            LoanRequest::Apply { .. } => "apply",
            LoanRequest::Loans { .. } => "loans",
            LoanRequest::Loan { .. } => "loan",
            LoanRequest::Pay { .. } => "pay",
            LoanRequest::CreditProfile { .. } => "credit_profile",
            LoanRequest::AdminPending { .. } => "admin_pending",
            LoanRequest::AdminApprove { .. } => "admin_approve",
            LoanRequest::AdminDeny { .. } => "admin_deny",
        }
    }

    pub fn is_admin(&self) -> bool {
        self.command().starts_with(ADMIN_PREFIX)
    }

    /// Session token carried by every loan command
    pub fn token(&self) -> &str {
        match self {
            LoanRequest::Eligibility { token }
            | LoanRequest::Apply { token, .. }
            | LoanRequest::Loans { token }
            | LoanRequest::Loan { token, .. }
            | LoanRequest::Pay { token, .. }
            | LoanRequest::CreditProfile { token }
            | LoanRequest::AdminPending { token }
            | LoanRequest::AdminApprove { token, .. }
            | LoanRequest::AdminDeny { token, .. } => token,
        }
    }
}

/// Inter-service surface of the ledger.
///
/// Accepted only when the envelope was sealed with the shared service key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ServiceRpc {
    VerifyAccountExists {
        account: String,
    },
    GetBalance {
        account: String,
    },
    DeductBalance {
        account: String,
        amount: Money,
        op_id: String,
    },
    AddBalance {
        account: String,
        amount: Money,
        op_id: String,
    },
    LockAccount {
        account: String,
        reason: String,
    },
    UnlockAccount {
        account: String,
    },
    ValidateSession {
        token: String,
    },
}

impl ServiceRpc {
    pub fn command(&self) -> &'static str {
        match self {
            ServiceRpc::VerifyAccountExists { .. } => "verify_account_exists",
            ServiceRpc::GetBalance { .. } => "get_balance",
            ServiceRpc::DeductBalance { .. } => "deduct_balance",
            ServiceRpc::AddBalance { .. } => "add_balance",
            ServiceRpc::LockAccount { .. } => "lock_account",
            ServiceRpc::UnlockAccount { .. } => "unlock_account",
            ServiceRpc::ValidateSession { .. } => "validate_session",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_admin_prefix() {
        let lock = LedgerRequest::AdminLock {
            token: "t".into(),
            username: "bob".into(),
            reason: "fraud".into(),
        };
        assert!(lock.is_admin());
        assert!(!LedgerRequest::Balance { token: "t".into() }.is_admin());
        assert!(LoanRequest::AdminPending { token: "t".into() }.is_admin());
    }

    #[test]
    fn test_wire_shape() {
        let body = RequestBody::Ledger(LedgerRequest::Transfer {
            token: "tok".into(),
            to: "bob".into(),
            amount: dec!(300),
        });
        let json: serde_json::Value = serde_json::to_value(&body).unwrap();
        assert_eq!(json["service"], "ledger");
        assert_eq!(json["request"]["command"], "transfer");

        let back: RequestBody = serde_json::from_value(json).unwrap();
        assert_eq!(back, body);
        assert_eq!(back.target(), ServiceKind::Ledger);
    }

    #[test]
    fn test_rpc_targets_ledger() {
        let body = RequestBody::Rpc(ServiceRpc::UnlockAccount {
            account: "carol".into(),
        });
        assert_eq!(body.target(), ServiceKind::Ledger);
        assert_eq!(body.command(), "unlock_account");
    }

    #[test]
    fn test_unknown_command_rejected() {
        let raw = r#"{"service":"ledger","request":{"command":"drop_tables","token":"x"}}"#;
        assert!(serde_json::from_str::<RequestBody>(raw).is_err());
    }
}
