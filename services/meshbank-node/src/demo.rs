//! Guided walk through the core banking flows
//!
//! Every step goes through the relay with the client SDK, the same path a
//! terminal would take.

use anyhow::{bail, Context};
use chrono::Duration as ChronoDuration;
use meshbank_sdk::{BankClient, ErrorKind, LinkRole, SdkConfig, SdkError};
use rust_decimal_macros::dec;

use crate::cluster::Cluster;
use crate::config::NodeConfig;

/// What each scenario ended with
#[derive(Debug, Default)]
pub struct DemoOutcome {
    pub transfer_ok: bool,
    pub loan_priced: bool,
    pub partial_payment_ok: bool,
    pub lockout_ok: bool,
}

impl DemoOutcome {
    pub fn all_passed(&self) -> bool {
        self.transfer_ok && self.loan_priced && self.partial_payment_ok && self.lockout_ok
    }
}

/// Configuration the demo runs with: in-memory, cheap hashing, a borrower
/// with no history scores 660
pub fn demo_config() -> NodeConfig {
    let mut config = NodeConfig::development();
    config.lending.default_score = 660;
    config
}

async fn client(cluster: &Cluster, role: LinkRole, label: &str) -> anyhow::Result<BankClient> {
    let link = cluster.relay.connect()?;
    let client = BankClient::connect(link, SdkConfig::default().role(role).label(label)).await?;
    Ok(client)
}

fn step(name: &str, ok: bool, detail: impl std::fmt::Display) {
    let mark = if ok { "ok  " } else { "FAIL" };
    println!("  [{mark}] {name}: {detail}");
}

/// Run scenarios A to D against a fresh node
pub async fn run(config: &NodeConfig) -> anyhow::Result<DemoOutcome> {
    let cluster = Cluster::start(config).await?;
    let outcome = scenarios(&cluster, config).await;
    cluster.stop().await;
    outcome
}

async fn scenarios(cluster: &Cluster, config: &NodeConfig) -> anyhow::Result<DemoOutcome> {
    let mut outcome = DemoOutcome::default();

    let admin = client(cluster, LinkRole::Controller, "demo-admin").await?;
    admin
        .login(&config.admin.username, &config.admin.password)
        .await
        .context("admin login failed")?;
    admin.admin_create_account("alice", "alicepw", dec!(1000), false).await?;
    admin.admin_create_account("bob", "bobpw", dec!(50), false).await?;

    println!("\nScenario A: transfer");
    let teller = client(cluster, LinkRole::BankClient, "demo-teller").await?;
    teller.login("alice", "alicepw").await?;
    let receipt = teller.transfer("bob", dec!(300)).await?;
    let bob = cluster.ledger.get_balance("bob").await?;
    outcome.transfer_ok = receipt.from_balance == dec!(700) && bob == dec!(350);
    step(
        "alice -> bob 300",
        outcome.transfer_ok,
        format!("alice {}, bob {}", receipt.from_balance, bob),
    );
    teller.logout().await?;

    println!("\nScenario B: loan application and approval");
    let borrower = client(cluster, LinkRole::LoanClient, "demo-borrower").await?;
    borrower.login("alice", "alicepw").await?;
    let eligibility = borrower.eligibility().await?;
    step(
        "eligibility",
        eligibility.eligible,
        format!(
            "score {} ({}), rate {}, limit {}",
            eligibility.score, eligibility.tier, eligibility.rate, eligibility.tier_limit
        ),
    );
    let application = borrower.apply(dec!(1000), 15).await?;
    outcome.loan_priced = application.interest == dec!(120) && application.total_owed == dec!(1120);
    step(
        "apply 1000 over 15 days",
        outcome.loan_priced,
        format!("interest {}, total owed {}", application.interest, application.total_owed),
    );
    let loan = admin.admin_approve(&application.id).await?;
    step(
        "approve",
        loan.remaining == dec!(1120),
        format!("loan {} remaining {}, due {}", loan.id, loan.remaining, loan.due_at.date_naive()),
    );

    println!("\nScenario C: partial payment");
    let paid = borrower.pay(&loan.id, dec!(200)).await?;
    outcome.partial_payment_ok = paid.remaining == dec!(920) && paid.paid_at.is_none();
    step(
        "pay 200",
        outcome.partial_payment_ok,
        format!("remaining {}, status {:?}", paid.remaining, paid.status),
    );

    println!("\nScenario D: delinquency lockout");
    let as_of = loan.due_at + ChronoDuration::days(i64::from(config.lending.days_until_lock));
    let report = cluster.loans.sweep_at(as_of).await;
    step(
        "sweep",
        report.locks_placed == 1,
        format!(
            "{} fee days charged, {} lock(s) placed",
            report.fee_days, report.locks_placed
        ),
    );

    let session_dropped = matches!(
        borrower.balance().await,
        Err(SdkError::Bank(ref e)) if e.kind() == ErrorKind::SessionInvalid
    );
    step("open session", session_dropped, "terminated by the lock");

    let retry = client(cluster, LinkRole::LoanClient, "demo-retry").await?;
    let login_refused = match retry.login("alice", "alicepw").await {
        Err(SdkError::Bank(e)) if e.kind() == ErrorKind::AccountLocked => {
            let wire = e.to_wire();
            step(
                "login",
                true,
                format!("refused: {}", wire.lock_reason.unwrap_or_default()),
            );
            true
        }
        Err(e) => {
            step("login", false, format!("unexpected error: {e}"));
            false
        }
        Ok(_) => {
            step("login", false, "account is still open");
            false
        }
    };
    outcome.lockout_ok = report.locks_placed == 1 && session_dropped && login_refused;

    let stats = cluster.relay.stats();
    println!(
        "\nRelay: {} forwarded, {} replied, {} failed, {} timed out",
        stats.forwarded, stats.replied, stats.failed, stats.timed_out
    );

    if !outcome.all_passed() {
        bail!("demo finished with failures: {outcome:?}");
    }
    Ok(outcome)
}
