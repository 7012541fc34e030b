//! Full path: SDK client → private link → relay → broadcast → services

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use meshbank_crypto::{KeyPair, SymmetricKey};
use meshbank_ledger::{LedgerConfig, LedgerHandler, LedgerService, PasswordConfig};
use meshbank_lending::{LedgerClient, LendingConfig, LoanHandler, LoanService};
use meshbank_relay::{Relay, RelayConfig};
use meshbank_rpc::{KeyRing, RpcClient, RpcClientConfig, ServiceHost};
use meshbank_sdk::{BankClient, ErrorKind, LinkRole, SdkConfig, SdkError};
use meshbank_store::{MemoryAuditLog, MemoryStore};
use meshbank_transport::{Broadcast, MemoryBroadcast, NodeId};
use meshbank_types::ServiceKind;
use rust_decimal_macros::dec;
use tokio::sync::watch;

const NETWORK_SECRET: &str = "e2e-network";
const SERVICE_SECRET: &str = "e2e-service";

struct Cluster {
    relay: Relay,
    ledger: Arc<LedgerService>,
    loans: Arc<LoanService>,
    _shutdown: watch::Sender<bool>,
}

async fn cluster() -> Cluster {
    let net: Arc<dyn Broadcast> = Arc::new(MemoryBroadcast::default());
    let (tx, rx) = watch::channel(false);

    let ledger_config = LedgerConfig {
        password: PasswordConfig::light(),
        ..LedgerConfig::default()
    };
    let ledger = Arc::new(
        LedgerService::new(ledger_config, Arc::new(MemoryStore::new()), Arc::new(MemoryAuditLog::new())).unwrap(),
    );
    ledger.create_account("admin", "adminpw", dec!(0), true).await.unwrap();
    ledger.create_account("alice", "alicepw", dec!(1000), false).await.unwrap();
    ledger.create_account("bob", "bobpw", dec!(50), false).await.unwrap();

    ServiceHost::new(
        NodeId::new("ledger-1"),
        ServiceKind::Ledger,
        KeyRing::from_secrets(NETWORK_SECRET, Some(SERVICE_SECRET)),
        Arc::clone(&net),
        Arc::new(LedgerHandler::new(Arc::clone(&ledger))),
    )
    .spawn(rx.clone());

    let to_ledger = RpcClient::spawn(
        NodeId::new("loan-1"),
        ServiceKind::Ledger,
        SymmetricKey::from_passphrase(SERVICE_SECRET, "service"),
        KeyPair::generate(),
        Arc::clone(&net),
        RpcClientConfig::default(),
        rx.clone(),
    );
    let loans = Arc::new(
        LoanService::new(
            LendingConfig {
                default_score: 660,
                ..LendingConfig::default()
            },
            Arc::new(LedgerClient::new(Arc::new(to_ledger))),
            Arc::new(MemoryStore::new()),
        )
        .unwrap(),
    );
    ServiceHost::new(
        NodeId::new("loan-1"),
        ServiceKind::Loan,
        KeyRing::from_secrets(NETWORK_SECRET, None),
        Arc::clone(&net),
        Arc::new(LoanHandler::new(Arc::clone(&loans))),
    )
    .spawn(rx.clone());

    let relay = Relay::new(
        NodeId::new("relay-1"),
        SymmetricKey::from_passphrase(NETWORK_SECRET, "network"),
        KeyPair::generate(),
        Arc::clone(&net),
        RelayConfig::default(),
    );
    relay.spawn(rx).unwrap();

    Cluster {
        relay,
        ledger,
        loans,
        _shutdown: tx,
    }
}

impl Cluster {
    async fn client(&self, role: LinkRole) -> BankClient {
        let link = self.relay.connect().unwrap();
        BankClient::connect(link, SdkConfig::default().role(role)).await.unwrap()
    }

    async fn login(&self, role: LinkRole, user: &str, password: &str) -> BankClient {
        let client = self.client(role).await;
        client.login(user, password).await.unwrap();
        client
    }
}

#[tokio::test]
async fn test_transfer_through_relay() {
    let bank = cluster().await;
    let alice = bank.login(LinkRole::BankClient, "alice", "alicepw").await;

    let receipt = alice.transfer("bob", dec!(300)).await.unwrap();
    assert_eq!(receipt.from_balance, dec!(700));
    assert_eq!(alice.balance().await.unwrap(), dec!(700));
    assert_eq!(bank.ledger.get_balance("bob").await.unwrap(), dec!(350));
}

#[tokio::test]
async fn test_second_login_conflicts() {
    let bank = cluster().await;
    let _alice = bank.login(LinkRole::BankClient, "alice", "alicepw").await;
    let again = bank.client(LinkRole::BankClient).await;

    let err = again.login("alice", "alicepw").await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::SessionConflict));
    let err = again.login("bob", "wrong").await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Auth));
}

#[tokio::test]
async fn test_loan_lifecycle_through_relay() {
    let bank = cluster().await;
    let alice = bank.login(LinkRole::LoanClient, "alice", "alicepw").await;
    let admin = bank.login(LinkRole::Controller, "admin", "adminpw").await;

    let eligibility = alice.eligibility().await.unwrap();
    assert_eq!(eligibility.tier, "FAIR");

    let app = alice.apply(dec!(1000), 15).await.unwrap();
    assert_eq!(app.interest, dec!(120));
    assert_eq!(app.total_owed, dec!(1120));

    let err = alice.admin_approve(&app.id).await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::SessionInvalid));

    let pending = admin.admin_pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    let loan = admin.admin_approve(&app.id).await.unwrap();
    assert_eq!(loan.remaining, dec!(1120));
    assert_eq!(alice.balance().await.unwrap(), dec!(2000));

    let loan = alice.pay(&loan.id, dec!(200)).await.unwrap();
    assert_eq!(loan.remaining, dec!(920));
    assert_eq!(alice.balance().await.unwrap(), dec!(1800));
    assert_eq!(alice.loans().await.unwrap().len(), 1);

    let first = alice.pay_with_key(&loan.id, dec!(100), "rent-march").await.unwrap();
    let resent = alice.pay_with_key(&loan.id, dec!(100), "rent-march").await.unwrap();
    assert_eq!(first.remaining, dec!(820));
    assert_eq!(resent.remaining, dec!(820));
    assert_eq!(alice.balance().await.unwrap(), dec!(1700));
}

#[tokio::test]
async fn test_delinquency_locks_out_borrower() {
    let bank = cluster().await;
    let alice = bank.login(LinkRole::LoanClient, "alice", "alicepw").await;
    let admin = bank.login(LinkRole::Controller, "admin", "adminpw").await;

    let app = alice.apply(dec!(1000), 15).await.unwrap();
    let loan = admin.admin_approve(&app.id).await.unwrap();

    let report = bank.loans.sweep_at(loan.due_at + ChronoDuration::days(7)).await;
    assert_eq!(report.locks_placed, 1);

    let err = alice.balance().await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::SessionInvalid));

    let retry = bank.client(LinkRole::LoanClient).await;
    match retry.login("alice", "alicepw").await {
        Err(SdkError::Bank(e)) => {
            assert_eq!(e.kind(), ErrorKind::AccountLocked);
            let wire = e.to_wire();
            assert!(wire.lock_reason.unwrap_or_default().starts_with("Loan delinquency"));
            assert!(wire.locked_at.is_some());
        }
        other => panic!("expected a locked account, got {other:?}"),
    }
}

#[tokio::test]
async fn test_concurrent_clients_on_one_relay() {
    let bank = cluster().await;
    let alice = bank.login(LinkRole::BankClient, "alice", "alicepw").await;
    let bob = bank.login(LinkRole::BankClient, "bob", "bobpw").await;

    let (a, b) = tokio::join!(alice.balance(), bob.balance());
    assert_eq!(a.unwrap(), dec!(1000));
    assert_eq!(b.unwrap(), dec!(50));

    let stats = bank.relay.stats();
    assert_eq!(stats.routes_by_role.get("bank_client"), Some(&2));
}

#[test]
fn test_garbage_ciphertext_is_not_an_error() {
    let key = SymmetricKey::from_passphrase(NETWORK_SECRET, "network");
    assert!(key.open("definitely not an envelope").is_err());
    assert!(meshbank_crypto::open_with_any(&[&key], "AAAA").is_none());
}
