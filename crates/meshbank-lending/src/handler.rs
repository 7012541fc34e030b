//! Wire dispatch for the loan service

use std::sync::Arc;

use async_trait::async_trait;
use meshbank_protocol::{LoanRequest, Reply, ReplyData, RequestBody, SessionInfo};
use meshbank_rpc::{Handler, RequestContext};
use meshbank_types::{BankError, Result};

use crate::service::LoanService;

/// Routes loan requests onto a [`LoanService`]. Every command is
/// authenticated by asking the ledger to validate its token.
pub struct LoanHandler {
    service: Arc<LoanService>,
}

impl LoanHandler {
    pub fn new(service: Arc<LoanService>) -> Self {
        Self { service }
    }

    async fn authenticate(&self, request: &LoanRequest) -> Result<SessionInfo> {
        let session = self.service.gateway().validate_session(request.token()).await?;
        if request.is_admin() && !session.is_admin {
            tracing::warn!(account = %session.account, command = request.command(), "Admin command refused");
            return Err(BankError::session_invalid("admin privileges required"));
        }
        Ok(session)
    }

    async fn dispatch(&self, request: LoanRequest) -> Result<ReplyData> {
        let session = self.authenticate(&request).await?;
        let loans = &self.service;
        let account = session.account.as_str();

        match request {
            LoanRequest::Eligibility { .. } => Ok(ReplyData::Eligibility {
                eligibility: loans.get_eligibility(account).await?,
            }),
            LoanRequest::Apply {
                amount, term_days, ..
            } => Ok(ReplyData::Application {
                application: loans.apply(account, amount, term_days).await?,
            }),
            LoanRequest::Loans { .. } => Ok(ReplyData::Loans {
                loans: loans.loans_for(account).await,
            }),
            LoanRequest::Loan { loan_id, .. } => Ok(ReplyData::Loan {
                loan: loans.loan(account, &loan_id).await?,
            }),
            LoanRequest::Pay {
                loan_id,
                amount,
                payment_key,
                ..
            } => Ok(ReplyData::Loan {
                loan: loans
                    .pay_with_key(&loan_id, account, amount, payment_key.as_deref())
                    .await?,
            }),
            LoanRequest::CreditProfile { .. } => Ok(ReplyData::Credit {
                credit: loans.credit_profile(account).await?,
            }),
            LoanRequest::AdminPending { .. } => Ok(ReplyData::Applications {
                applications: loans.pending_applications().await,
            }),
            LoanRequest::AdminApprove { application_id, .. } => Ok(ReplyData::Loan {
                loan: loans.approve(&application_id, account).await?,
            }),
            LoanRequest::AdminDeny {
                application_id,
                reason,
                ..
            } => Ok(ReplyData::Application {
                application: loans.deny(&application_id, account, &reason).await?,
            }),
        }
    }
}

#[async_trait]
impl Handler for LoanHandler {
    async fn handle(&self, ctx: RequestContext, body: RequestBody) -> Reply {
        let result = match body {
            RequestBody::Loan(request) => self.dispatch(request).await,
            other => Err(BankError::validation(format!(
                "{} is not a loan command",
                other.command()
            ))),
        };
        if let Err(e) = &result {
            tracing::debug!(request_id = %ctx.id, error = %e, "Loan request failed");
        }
        Reply::from(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LendingConfig;
    use crate::testing::FakeLedger;
    use meshbank_rpc::KeyScope;
    use meshbank_store::MemoryStore;
    use meshbank_types::ErrorKind;
    use rust_decimal_macros::dec;

    fn handler() -> LoanHandler {
        let service = LoanService::new(
            LendingConfig::default(),
            Arc::new(FakeLedger::default()),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();
        LoanHandler::new(Arc::new(service))
    }

    fn ctx() -> RequestContext {
        RequestContext::local("relay", KeyScope::Network)
    }

    #[tokio::test]
    async fn test_admin_command_needs_admin_session() {
        let handler = handler();
        let reply = handler
            .handle(
                ctx(),
                RequestBody::Loan(LoanRequest::AdminPending {
                    token: "alice-token".into(),
                }),
            )
            .await;
        assert_eq!(reply.into_result().unwrap_err().kind(), ErrorKind::SessionInvalid);

        let reply = handler
            .handle(
                ctx(),
                RequestBody::Loan(LoanRequest::AdminPending {
                    token: "admin-token".into(),
                }),
            )
            .await;
        assert_eq!(reply.into_result().unwrap(), ReplyData::Applications { applications: vec![] });
    }

    #[tokio::test]
    async fn test_apply_uses_session_account() {
        let handler = handler();
        let reply = handler
            .handle(
                ctx(),
                RequestBody::Loan(LoanRequest::Apply {
                    token: "alice-token".into(),
                    amount: dec!(1000),
                    term_days: 30,
                }),
            )
            .await;
        match reply.into_result().unwrap() {
            ReplyData::Application { application } => {
                assert_eq!(application.account, "alice");
                assert_eq!(application.total_owed, dec!(1120));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bad_token_rejected() {
        let reply = handler()
            .handle(ctx(), RequestBody::Loan(LoanRequest::Loans { token: String::new() }))
            .await;
        assert_eq!(reply.into_result().unwrap_err().kind(), ErrorKind::SessionInvalid);
    }
}
