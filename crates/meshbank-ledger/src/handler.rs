//! Wire dispatch for the ledger

use std::sync::Arc;

use async_trait::async_trait;
use meshbank_protocol::{LedgerRequest, Reply, ReplyData, RequestBody, ServiceRpc};
use meshbank_rpc::{Handler, KeyScope, RequestContext};
use meshbank_types::{BankError, Result};

use crate::service::LedgerService;

/// Routes ledger requests onto a [`LedgerService`]
pub struct LedgerHandler {
    service: Arc<LedgerService>,
}

impl LedgerHandler {
    pub fn new(service: Arc<LedgerService>) -> Self {
        Self { service }
    }

    async fn client(&self, ctx: &RequestContext, request: LedgerRequest) -> Result<ReplyData> {
        let ledger = &self.service;
        match request {
            LedgerRequest::Login { username, password } => {
                let origin = ctx.origin.clone().or_else(|| Some(ctx.sender.to_string()));
                let grant = ledger.login(&username, &password, origin).await?;
                Ok(ReplyData::Login { grant })
            }
            LedgerRequest::Logout { token } => {
                ledger.logout(&token).await?;
                Ok(ReplyData::Ack {
                    message: "Logged out".to_string(),
                })
            }
            LedgerRequest::Balance { token } => {
                let (account, balance) = ledger.balance(&token).await?;
                Ok(ReplyData::Balance { account, balance })
            }
            LedgerRequest::AccountInfo { token } => Ok(ReplyData::Account {
                account: ledger.account_info(&token).await?,
            }),
            LedgerRequest::Transfer { token, to, amount } => Ok(ReplyData::Transfer {
                receipt: ledger.transfer(&token, &to, amount).await?,
            }),
            LedgerRequest::AdminCreateAccount {
                token,
                username,
                password,
                initial_balance,
                is_admin,
            } => Ok(ReplyData::Account {
                account: ledger
                    .admin_create_account(&token, &username, &password, initial_balance, is_admin)
                    .await?,
            }),
            LedgerRequest::AdminSetBalance {
                token,
                username,
                balance,
            } => Ok(ReplyData::Account {
                account: ledger.admin_set_balance(&token, &username, balance).await?,
            }),
            LedgerRequest::AdminLock {
                token,
                username,
                reason,
            } => Ok(ReplyData::AccountStatus {
                status: ledger.admin_lock(&token, &username, &reason).await?,
            }),
            LedgerRequest::AdminUnlock { token, username } => Ok(ReplyData::AccountStatus {
                status: ledger.admin_unlock(&token, &username).await?,
            }),
            LedgerRequest::AdminResetPassword {
                token,
                username,
                new_password,
            } => {
                ledger
                    .admin_reset_password(&token, &username, &new_password)
                    .await?;
                Ok(ReplyData::Ack {
                    message: format!("Password reset for {username}"),
                })
            }
            LedgerRequest::AdminListAccounts { token } => Ok(ReplyData::Accounts {
                accounts: ledger.admin_list_accounts(&token).await?,
            }),
        }
    }

    async fn inter_service(&self, ctx: &RequestContext, rpc: ServiceRpc) -> Result<ReplyData> {
        if ctx.scope != KeyScope::Service {
            tracing::warn!(from = %ctx.sender, command = rpc.command(), "Inter-service call without service key");
            return Err(BankError::session_invalid(
                "inter-service calls require the service key",
            ));
        }

        let ledger = &self.service;
        let actor = ctx.sender.to_string();
        match rpc {
            ServiceRpc::VerifyAccountExists { account } => Ok(ReplyData::AccountStatus {
                status: ledger.verify_account_exists(&account).await,
            }),
            ServiceRpc::GetBalance { account } => {
                let balance = ledger.get_balance(&account).await?;
                Ok(ReplyData::Balance { account, balance })
            }
            ServiceRpc::DeductBalance {
                account,
                amount,
                op_id,
            } => {
                let balance = ledger.deduct_balance(&account, amount, &op_id).await?;
                Ok(ReplyData::Balance { account, balance })
            }
            ServiceRpc::AddBalance {
                account,
                amount,
                op_id,
            } => {
                let balance = ledger.add_balance(&account, amount, &op_id).await?;
                Ok(ReplyData::Balance { account, balance })
            }
            ServiceRpc::LockAccount { account, reason } => Ok(ReplyData::AccountStatus {
                status: ledger.lock_account(&account, &reason, &actor).await?,
            }),
            ServiceRpc::UnlockAccount { account } => Ok(ReplyData::AccountStatus {
                status: ledger.unlock_account(&account, &actor).await?,
            }),
            ServiceRpc::ValidateSession { token } => Ok(ReplyData::Session {
                session: ledger.validate_session(&token).await?,
            }),
        }
    }
}

#[async_trait]
impl Handler for LedgerHandler {
    async fn handle(&self, ctx: RequestContext, body: RequestBody) -> Reply {
        let result = match body {
            RequestBody::Ledger(request) => self.client(&ctx, request).await,
            RequestBody::Rpc(rpc) => self.inter_service(&ctx, rpc).await,
            RequestBody::Loan(request) => Err(BankError::validation(format!(
                "{} is not a ledger command",
                request.command()
            ))),
        };
        if let Err(e) = &result {
            tracing::debug!(request_id = %ctx.id, error = %e, "Ledger request failed");
        }
        Reply::from(result)
    }
}
