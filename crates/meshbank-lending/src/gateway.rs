//! The loan service's view of the ledger

use std::sync::Arc;

use async_trait::async_trait;
use meshbank_protocol::{AccountStatus, ReplyData, RequestBody, ServiceRpc, SessionInfo};
use meshbank_rpc::Call;
use meshbank_types::{BankError, Money, Result};

/// Inter-service calls into the ledger. Each is one round trip with a
/// bounded wait; a timeout says nothing about whether the mutation applied.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn verify_account(&self, account: &str) -> Result<AccountStatus>;
    async fn get_balance(&self, account: &str) -> Result<Money>;
    async fn deduct(&self, account: &str, amount: Money, op_id: &str) -> Result<Money>;
    async fn add(&self, account: &str, amount: Money, op_id: &str) -> Result<Money>;
    async fn lock(&self, account: &str, reason: &str) -> Result<AccountStatus>;
    async fn unlock(&self, account: &str) -> Result<AccountStatus>;
    async fn validate_session(&self, token: &str) -> Result<SessionInfo>;
}

/// [`LedgerGateway`] over any [`Call`] transport
pub struct LedgerClient {
    call: Arc<dyn Call>,
}

impl LedgerClient {
    pub fn new(call: Arc<dyn Call>) -> Self {
        Self { call }
    }

    async fn rpc(&self, rpc: ServiceRpc) -> Result<ReplyData> {
        self.call.call(RequestBody::Rpc(rpc)).await
    }
}

fn unexpected(expected: &str, got: &ReplyData) -> BankError {
    BankError::Internal(format!("expected {expected} reply, got {}", got.kind()))
}

fn balance_of(data: ReplyData) -> Result<Money> {
    match data {
        ReplyData::Balance { balance, .. } => Ok(balance),
        other => Err(unexpected("balance", &other)),
    }
}

fn status_of(data: ReplyData) -> Result<AccountStatus> {
    match data {
        ReplyData::AccountStatus { status } => Ok(status),
        other => Err(unexpected("account_status", &other)),
    }
}

#[async_trait]
impl LedgerGateway for LedgerClient {
    async fn verify_account(&self, account: &str) -> Result<AccountStatus> {
        status_of(
            self.rpc(ServiceRpc::VerifyAccountExists {
                account: account.to_string(),
            })
            .await?,
        )
    }

    async fn get_balance(&self, account: &str) -> Result<Money> {
        balance_of(
            self.rpc(ServiceRpc::GetBalance {
                account: account.to_string(),
            })
            .await?,
        )
    }

    async fn deduct(&self, account: &str, amount: Money, op_id: &str) -> Result<Money> {
        balance_of(
            self.rpc(ServiceRpc::DeductBalance {
                account: account.to_string(),
                amount,
                op_id: op_id.to_string(),
            })
            .await?,
        )
    }

    async fn add(&self, account: &str, amount: Money, op_id: &str) -> Result<Money> {
        balance_of(
            self.rpc(ServiceRpc::AddBalance {
                account: account.to_string(),
                amount,
                op_id: op_id.to_string(),
            })
            .await?,
        )
    }

    async fn lock(&self, account: &str, reason: &str) -> Result<AccountStatus> {
        status_of(
            self.rpc(ServiceRpc::LockAccount {
                account: account.to_string(),
                reason: reason.to_string(),
            })
            .await?,
        )
    }

    async fn unlock(&self, account: &str) -> Result<AccountStatus> {
        status_of(
            self.rpc(ServiceRpc::UnlockAccount {
                account: account.to_string(),
            })
            .await?,
        )
    }

    async fn validate_session(&self, token: &str) -> Result<SessionInfo> {
        match self
            .rpc(ServiceRpc::ValidateSession {
                token: token.to_string(),
            })
            .await?
        {
            ReplyData::Session { session } => Ok(session),
            other => Err(unexpected("session", &other)),
        }
    }
}
