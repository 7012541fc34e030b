//! MeshBank SDK - the client side of a private link
//!
//! A [`BankClient`] owns one private link to a relay. It registers with a
//! role, tags every request with a fresh correlation id and waits for the
//! matching response, so many calls can be in flight on one link.
//!
//! # Quick Start
//!
//! ```ignore
//! use meshbank_sdk::{BankClient, SdkConfig};
//!
//! let link = relay.connect()?;
//! let bank = BankClient::connect(link, SdkConfig::default()).await?;
//!
//! bank.login("alice", "alicepw").await?;
//! let receipt = bank.transfer("bob", dec!(300)).await?;
//! println!("alice now has {}", receipt.from_balance);
//! ```

pub use meshbank_protocol::{
    AccountStatus, AccountView, ApplicationView, CreditView, EligibilityView, LoanView,
    LoginGrant, TransferReceipt,
};
pub use meshbank_types::{ApplicationId, BankError, ErrorKind, LinkRole, LoanId, Money};

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use meshbank_protocol::{LedgerRequest, LinkFrame, LoanRequest, Reply, ReplyData, RequestBody};
use meshbank_transport::{LinkEnd, LinkReceiver, LinkSender};
use meshbank_types::CorrelationId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

// ============================================================================
// Error Types
// ============================================================================

/// SDK-specific errors
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    #[error("Link closed")]
    LinkClosed,

    #[error("No reply within {0:?}")]
    Timeout(Duration),

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Unexpected reply: expected {expected}, got {got}")]
    UnexpectedReply { expected: &'static str, got: &'static str },

    #[error("Serialization error: {0}")]
    Serialization(#[from] meshbank_protocol::ProtocolError),

    #[error("Bank error: {0}")]
    Bank(#[from] BankError),
}

impl SdkError {
    /// Wire kind of a bank-side failure
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            SdkError::Bank(e) => Some(e.kind()),
            _ => None,
        }
    }
}

/// SDK Result type
pub type SdkResult<T> = std::result::Result<T, SdkError>;

// ============================================================================
// Configuration
// ============================================================================

/// SDK configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// Role declared when registering with the relay
    pub role: LinkRole,
    /// Free-form label shown in relay telemetry and audit lines
    pub label: Option<String>,
    /// Request timeout. Should exceed the relay's own request timeout so the
    /// relay's synthetic failure arrives first.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            role: LinkRole::BankClient,
            label: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl SdkConfig {
    pub fn role(mut self, role: LinkRole) -> Self {
        self.role = role;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// ============================================================================
// Client
// ============================================================================

struct Inner {
    link: LinkSender,
    pending: DashMap<CorrelationId, oneshot::Sender<Reply>>,
    token: Mutex<Option<String>>,
    timeout: Duration,
}

/// A registered client link. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct BankClient {
    inner: Arc<Inner>,
}

impl BankClient {
    /// Register on `link` and start reading replies
    pub async fn connect(link: LinkEnd, config: SdkConfig) -> SdkResult<Self> {
        let (sender, receiver) = link.split();
        let inner = Arc::new(Inner {
            link: sender,
            pending: DashMap::new(),
            token: Mutex::new(None),
            timeout: config.timeout,
        });
        tokio::spawn(read_replies(Arc::clone(&inner), receiver));

        let client = Self { inner };
        client
            .send_frame(&LinkFrame::Register {
                role: config.role,
                label: config.label,
            })
            .await?;
        Ok(client)
    }

    /// Session token from the last successful login
    pub fn token(&self) -> Option<String> {
        self.inner.token.lock().clone()
    }

    /// Adopt a token obtained elsewhere
    pub fn set_token(&self, token: impl Into<String>) {
        *self.inner.token.lock() = Some(token.into());
    }

    fn session(&self) -> SdkResult<String> {
        self.token().ok_or(SdkError::NotLoggedIn)
    }

    async fn send_frame(&self, frame: &LinkFrame) -> SdkResult<()> {
        let text = meshbank_protocol::encode(frame)?;
        self.inner
            .link
            .send(text)
            .await
            .map_err(|_| SdkError::LinkClosed)
    }

    /// Send any request and wait for its reply
    pub async fn request(&self, body: RequestBody) -> SdkResult<ReplyData> {
        let id = CorrelationId::new();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(id.clone(), tx);

        let frame = LinkFrame::Request {
            id: id.clone(),
            body,
        };
        if let Err(e) = self.send_frame(&frame).await {
            self.inner.pending.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.inner.timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply.into_result()?),
            Ok(Err(_)) => Err(SdkError::LinkClosed),
            Err(_) => {
                self.inner.pending.remove(&id);
                Err(SdkError::Timeout(self.inner.timeout))
            }
        }
    }

    async fn ledger(&self, request: LedgerRequest) -> SdkResult<ReplyData> {
        self.request(RequestBody::Ledger(request)).await
    }

    async fn loan(&self, request: LoanRequest) -> SdkResult<ReplyData> {
        self.request(RequestBody::Loan(request)).await
    }

    /// Stop routing on this link
    pub async fn deregister(&self) -> SdkResult<()> {
        self.send_frame(&LinkFrame::Deregister).await
    }

    // ========================================================================
    // Ledger
    // ========================================================================

    pub async fn login(&self, username: &str, password: &str) -> SdkResult<LoginGrant> {
        let reply = self
            .ledger(LedgerRequest::Login {
                username: username.to_string(),
                password: password.to_string(),
            })
            .await?;
        match reply {
            ReplyData::Login { grant } => {
                self.set_token(grant.token.clone());
                Ok(grant)
            }
            other => Err(unexpected("login", &other)),
        }
    }

    pub async fn logout(&self) -> SdkResult<()> {
        let token = self.session()?;
        self.ledger(LedgerRequest::Logout { token }).await?;
        *self.inner.token.lock() = None;
        Ok(())
    }

    pub async fn balance(&self) -> SdkResult<Money> {
        let token = self.session()?;
        match self.ledger(LedgerRequest::Balance { token }).await? {
            ReplyData::Balance { balance, .. } => Ok(balance),
            other => Err(unexpected("balance", &other)),
        }
    }

    pub async fn account_info(&self) -> SdkResult<AccountView> {
        let token = self.session()?;
        account(self.ledger(LedgerRequest::AccountInfo { token }).await?)
    }

    pub async fn transfer(&self, to: &str, amount: Money) -> SdkResult<TransferReceipt> {
        let token = self.session()?;
        let reply = self
            .ledger(LedgerRequest::Transfer {
                token,
                to: to.to_string(),
                amount,
            })
            .await?;
        match reply {
            ReplyData::Transfer { receipt } => Ok(receipt),
            other => Err(unexpected("transfer", &other)),
        }
    }

    pub async fn admin_create_account(
        &self,
        username: &str,
        password: &str,
        initial_balance: Money,
        is_admin: bool,
    ) -> SdkResult<AccountView> {
        let token = self.session()?;
        account(
            self.ledger(LedgerRequest::AdminCreateAccount {
                token,
                username: username.to_string(),
                password: password.to_string(),
                initial_balance,
                is_admin,
            })
            .await?,
        )
    }

    pub async fn admin_set_balance(&self, username: &str, balance: Money) -> SdkResult<AccountView> {
        let token = self.session()?;
        account(
            self.ledger(LedgerRequest::AdminSetBalance {
                token,
                username: username.to_string(),
                balance,
            })
            .await?,
        )
    }

    pub async fn admin_lock(&self, username: &str, reason: &str) -> SdkResult<AccountStatus> {
        let token = self.session()?;
        status(
            self.ledger(LedgerRequest::AdminLock {
                token,
                username: username.to_string(),
                reason: reason.to_string(),
            })
            .await?,
        )
    }

    pub async fn admin_unlock(&self, username: &str) -> SdkResult<AccountStatus> {
        let token = self.session()?;
        status(
            self.ledger(LedgerRequest::AdminUnlock {
                token,
                username: username.to_string(),
            })
            .await?,
        )
    }

    pub async fn admin_reset_password(&self, username: &str, new_password: &str) -> SdkResult<()> {
        let token = self.session()?;
        self.ledger(LedgerRequest::AdminResetPassword {
            token,
            username: username.to_string(),
            new_password: new_password.to_string(),
        })
        .await?;
        Ok(())
    }

    pub async fn admin_list_accounts(&self) -> SdkResult<Vec<AccountView>> {
        let token = self.session()?;
        match self.ledger(LedgerRequest::AdminListAccounts { token }).await? {
            ReplyData::Accounts { accounts } => Ok(accounts),
            other => Err(unexpected("accounts", &other)),
        }
    }

    // ========================================================================
    // Loans
    // ========================================================================

    pub async fn eligibility(&self) -> SdkResult<EligibilityView> {
        let token = self.session()?;
        match self.loan(LoanRequest::Eligibility { token }).await? {
            ReplyData::Eligibility { eligibility } => Ok(eligibility),
            other => Err(unexpected("eligibility", &other)),
        }
    }

    pub async fn apply(&self, amount: Money, term_days: u32) -> SdkResult<ApplicationView> {
        let token = self.session()?;
        application(
            self.loan(LoanRequest::Apply {
                token,
                amount,
                term_days,
            })
            .await?,
        )
    }

    pub async fn loans(&self) -> SdkResult<Vec<LoanView>> {
        let token = self.session()?;
        match self.loan(LoanRequest::Loans { token }).await? {
            ReplyData::Loans { loans } => Ok(loans),
            other => Err(unexpected("loans", &other)),
        }
    }

    pub async fn loan_details(&self, loan_id: &LoanId) -> SdkResult<LoanView> {
        let token = self.session()?;
        loan(
            self.loan(LoanRequest::Loan {
                token,
                loan_id: loan_id.clone(),
            })
            .await?,
        )
    }

    pub async fn pay(&self, loan_id: &LoanId, amount: Money) -> SdkResult<LoanView> {
        self.send_payment(loan_id, amount, None).await
    }

    /// Pay with a caller-chosen key. Resending after a timeout with the same
    /// key never charges twice.
    pub async fn pay_with_key(&self, loan_id: &LoanId, amount: Money, key: &str) -> SdkResult<LoanView> {
        self.send_payment(loan_id, amount, Some(key.to_string())).await
    }

    async fn send_payment(&self, loan_id: &LoanId, amount: Money, payment_key: Option<String>) -> SdkResult<LoanView> {
        let token = self.session()?;
        loan(
            self.loan(LoanRequest::Pay {
                token,
                loan_id: loan_id.clone(),
                amount,
                payment_key,
            })
            .await?,
        )
    }

    pub async fn credit_profile(&self) -> SdkResult<CreditView> {
        let token = self.session()?;
        match self.loan(LoanRequest::CreditProfile { token }).await? {
            ReplyData::Credit { credit } => Ok(credit),
            other => Err(unexpected("credit", &other)),
        }
    }

    pub async fn admin_pending(&self) -> SdkResult<Vec<ApplicationView>> {
        let token = self.session()?;
        match self.loan(LoanRequest::AdminPending { token }).await? {
            ReplyData::Applications { applications } => Ok(applications),
            other => Err(unexpected("applications", &other)),
        }
    }

    pub async fn admin_approve(&self, application_id: &ApplicationId) -> SdkResult<LoanView> {
        let token = self.session()?;
        loan(
            self.loan(LoanRequest::AdminApprove {
                token,
                application_id: application_id.clone(),
            })
            .await?,
        )
    }

    pub async fn admin_deny(&self, application_id: &ApplicationId, reason: &str) -> SdkResult<ApplicationView> {
        let token = self.session()?;
        application(
            self.loan(LoanRequest::AdminDeny {
                token,
                application_id: application_id.clone(),
                reason: reason.to_string(),
            })
            .await?,
        )
    }
}

fn unexpected(expected: &'static str, got: &ReplyData) -> SdkError {
    SdkError::UnexpectedReply {
        expected,
        got: got.kind(),
    }
}

fn account(reply: ReplyData) -> SdkResult<AccountView> {
    match reply {
        ReplyData::Account { account } => Ok(account),
        other => Err(unexpected("account", &other)),
    }
}

fn status(reply: ReplyData) -> SdkResult<AccountStatus> {
    match reply {
        ReplyData::AccountStatus { status } => Ok(status),
        other => Err(unexpected("account_status", &other)),
    }
}

fn application(reply: ReplyData) -> SdkResult<ApplicationView> {
    match reply {
        ReplyData::Application { application } => Ok(application),
        other => Err(unexpected("application", &other)),
    }
}

fn loan(reply: ReplyData) -> SdkResult<LoanView> {
    match reply {
        ReplyData::Loan { loan } => Ok(loan),
        other => Err(unexpected("loan", &other)),
    }
}

async fn read_replies(inner: Arc<Inner>, mut receiver: LinkReceiver) {
    while let Some(text) = receiver.recv().await {
        match meshbank_protocol::decode::<LinkFrame>(&text) {
            Ok(LinkFrame::Response { id, reply }) => match inner.pending.remove(&id) {
                Some((_, waiter)) => {
                    let _ = waiter.send(reply);
                }
                None => tracing::debug!(request_id = %id, "Reply for a request no longer waited on"),
            },
            Ok(_) => tracing::debug!("Ignoring non-response frame from relay"),
            Err(e) => tracing::debug!(error = %e, "Unreadable frame from relay"),
        }
    }
    // Wake every waiter with a closed channel
    inner.pending.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshbank_protocol::LinkFrame;
    use meshbank_transport::PrivateLink;
    use rust_decimal_macros::dec;

    /// Answers every request on the far end of a link with `reply`
    fn fake_relay(mut far: LinkEnd, reply: Reply) {
        tokio::spawn(async move {
            while let Some(text) = far.recv().await {
                if let Ok(LinkFrame::Request { id, .. }) = meshbank_protocol::decode(&text) {
                    let frame = LinkFrame::Response {
                        id,
                        reply: reply.clone(),
                    };
                    let _ = far.send(meshbank_protocol::encode(&frame).unwrap()).await;
                }
            }
        });
    }

    #[tokio::test]
    async fn test_registers_on_connect() {
        let (near, mut far) = PrivateLink::pair(8);
        let _client = BankClient::connect(near, SdkConfig::default().role(LinkRole::LoanClient))
            .await
            .unwrap();
        let first: LinkFrame = meshbank_protocol::decode(&far.recv().await.unwrap()).unwrap();
        assert_eq!(
            first,
            LinkFrame::Register {
                role: LinkRole::LoanClient,
                label: None
            }
        );
    }

    #[tokio::test]
    async fn test_calls_need_a_session() {
        let (near, _far) = PrivateLink::pair(8);
        let client = BankClient::connect(near, SdkConfig::default()).await.unwrap();
        assert!(matches!(client.balance().await, Err(SdkError::NotLoggedIn)));
    }

    #[tokio::test]
    async fn test_failure_reply_surfaces_bank_error() {
        let (near, far) = PrivateLink::pair(8);
        fake_relay(far, Reply::failure(&BankError::Auth));
        let client = BankClient::connect(near, SdkConfig::default()).await.unwrap();

        let err = client.login("alice", "wrong").await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Auth));
        assert!(client.token().is_none());
    }

    #[tokio::test]
    async fn test_wrong_reply_kind_is_reported() {
        let (near, far) = PrivateLink::pair(8);
        fake_relay(
            far,
            Reply::ok(ReplyData::Balance {
                account: "alice".into(),
                balance: dec!(1),
            }),
        );
        let client = BankClient::connect(near, SdkConfig::default()).await.unwrap();
        client.set_token("tok");

        assert!(matches!(
            client.loans().await,
            Err(SdkError::UnexpectedReply { expected: "loans", .. })
        ));
        assert_eq!(client.balance().await.unwrap(), dec!(1));
    }

    #[tokio::test]
    async fn test_silent_relay_times_out() {
        let (near, _far) = PrivateLink::pair(8);
        let client = BankClient::connect(near, SdkConfig::default().timeout(Duration::from_millis(50)))
            .await
            .unwrap();
        client.set_token("tok");
        assert!(matches!(client.balance().await, Err(SdkError::Timeout(_))));
    }
}
