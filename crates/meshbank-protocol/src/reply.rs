//! Replies
//!
//! Every request gets exactly one reply: either data or a structured failure
//! carrying a human-readable reason.

use meshbank_types::{BankError, Money, WireError};
use serde::{Deserialize, Serialize};

use crate::dto::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    Ok { data: ReplyData },
    Error { error: WireError },
}

impl Reply {
    pub fn ok(data: ReplyData) -> Self {
        Reply::Ok { data }
    }

    pub fn ack(message: impl Into<String>) -> Self {
        Reply::Ok {
            data: ReplyData::Ack {
                message: message.into(),
            },
        }
    }

    pub fn failure(err: &BankError) -> Self {
        Reply::Error {
            error: err.to_wire(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Ok { .. })
    }

    /// Convert into a typed result on the receiving side
    pub fn into_result(self) -> Result<ReplyData, BankError> {
        match self {
            Reply::Ok { data } => Ok(data),
            Reply::Error { error } => Err(BankError::from(error)),
        }
    }
}

impl From<Result<ReplyData, BankError>> for Reply {
    fn from(result: Result<ReplyData, BankError>) -> Self {
        match result {
            Ok(data) => Reply::ok(data),
            Err(err) => Reply::failure(&err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplyData {
    Ack { message: String },
    Login { grant: LoginGrant },
    Balance { account: String, balance: Money },
    Transfer { receipt: TransferReceipt },
    Account { account: AccountView },
    Accounts { accounts: Vec<AccountView> },
    AccountStatus { status: AccountStatus },
    Session { session: SessionInfo },
    Eligibility { eligibility: EligibilityView },
    Application { application: ApplicationView },
    Applications { applications: Vec<ApplicationView> },
    Loan { loan: LoanView },
    Loans { loans: Vec<LoanView> },
    Credit { credit: CreditView },
}

/// Name of the data kind, used in "unexpected reply" errors
impl ReplyData {
    pub fn kind(&self) -> &'static str {
        match self {
            ReplyData::Ack { .. } => "ack",
            ReplyData::Login { .. } => "login",
            ReplyData::Balance { .. } => "balance",
            ReplyData::Transfer { .. } => "transfer",
            ReplyData::Account { .. } => "account",
            ReplyData::Accounts { .. } => "accounts",
            ReplyData::AccountStatus { .. } => "account_status",
            ReplyData::Session { .. } => "session",
            ReplyData::Eligibility { .. } => "eligibility",
            ReplyData::Application { .. } => "application",
            ReplyData::Applications { .. } => "applications",
            ReplyData::Loan { .. } => "loan",
            ReplyData::Loans { .. } => "loans",
            ReplyData::Credit { .. } => "credit",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshbank_types::ErrorKind;
    use rust_decimal_macros::dec;

    #[test]
    fn test_failure_reply_shape() {
        let reply = Reply::failure(&BankError::Auth);
        let json: serde_json::Value = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"]["kind"], "auth");
        assert!(json["error"]["message"].as_str().unwrap().contains("Invalid"));
    }

    #[test]
    fn test_balance_reply_survives_the_wire() {
        let reply = Reply::ok(ReplyData::Balance {
            account: "alice".into(),
            balance: dec!(700.50),
        });
        let json = serde_json::to_string(&reply).unwrap();
        let back: Reply = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reply);
    }

    #[test]
    fn test_into_result() {
        let err = Reply::failure(&BankError::Discovery("ledger".into()))
            .into_result()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Discovery);
        assert!(Reply::ack("done").into_result().is_ok());
    }
}
