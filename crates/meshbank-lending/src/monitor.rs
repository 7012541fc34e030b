//! Delinquency Monitor
//!
//! A periodic sweep over active loans. For each overdue loan it compounds the
//! daily late fee, asks the ledger to lock the borrower once the loan crosses
//! the lock threshold, and marks the loan defaulted at the default threshold.
//!
//! Fees and defaults are computed under the state lock. Ledger calls are made
//! after the lock is released; a failed lock is retried on the next sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use meshbank_protocol::LoanStatus;
use meshbank_types::{round_cents, LoanId, Money};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::profile::CreditEventKind;
use crate::service::LoanService;

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Active loans looked at
    pub examined: usize,
    /// Late-fee days charged across all loans
    pub fee_days: u32,
    pub locks_placed: usize,
    /// Account was already locked
    pub locks_skipped: usize,
    pub locks_failed: usize,
    pub defaulted: Vec<LoanId>,
}

struct LockCandidate {
    loan_id: LoanId,
    account: String,
    days_overdue: u32,
}

impl LoanService {
    /// Run one sweep as of `now`
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let config = &self.config;
        let one = Money::ONE;

        let candidates = {
            let mut state = self.state.write().await;
            let mut candidates = Vec::new();
            let mut defaulted_accounts = Vec::new();

            for loan in state.loans.values_mut().filter(|l| l.is_active()) {
                report.examined += 1;
                let days = loan.days_overdue(now);
                if days == 0 {
                    continue;
                }

                let chargeable = days.min(config.days_until_default);
                while loan.fee_days_applied < chargeable {
                    let before = loan.remaining;
                    loan.remaining = round_cents(loan.remaining * (one + config.late_fee_rate));
                    loan.late_fees += loan.remaining - before;
                    loan.fee_days_applied += 1;
                    report.fee_days += 1;
                }

                if days >= config.days_until_default {
                    loan.status = LoanStatus::Default;
                    loan.defaulted_at = Some(now);
                    report.defaulted.push(loan.id.clone());
                    defaulted_accounts.push((loan.account.clone(), loan.id.clone(), days));
                    tracing::warn!(
                        loan_id = %loan.id,
                        account = %loan.account,
                        days_overdue = days,
                        remaining = %loan.remaining,
                        "Loan defaulted"
                    );
                }
            }

            // Defaulted loans stay candidates until their lock lands, so a
            // loan first seen past the default threshold is still locked.
            if config.auto_lock {
                for loan in state.loans.values().filter(|l| !l.lock_requested) {
                    if !matches!(loan.status, LoanStatus::Active | LoanStatus::Default) {
                        continue;
                    }
                    let days = loan.days_overdue(now);
                    if days >= config.days_until_lock {
                        candidates.push(LockCandidate {
                            loan_id: loan.id.clone(),
                            account: loan.account.clone(),
                            days_overdue: days,
                        });
                    }
                }
            }

            for (account, loan_id, days) in defaulted_accounts {
                let base = config.default_score;
                state.profile_mut(&account, base, now, config.history_cap).defaults += 1;
                self.credit_event(
                    &mut state,
                    &account,
                    CreditEventKind::Defaulted,
                    format!("Loan {loan_id} defaulted after {days} days overdue"),
                    now,
                );
            }

            if report.fee_days > 0 || !report.defaulted.is_empty() {
                if let Err(e) = self.persist(&state) {
                    tracing::error!(error = %e, "Sweep could not persist fees");
                }
            }
            candidates
        };

        for candidate in candidates {
            self.lock_delinquent(candidate, now, &mut report).await;
        }

        if report.fee_days > 0 || report.locks_placed > 0 || !report.defaulted.is_empty() {
            tracing::info!(
                examined = report.examined,
                fee_days = report.fee_days,
                locks_placed = report.locks_placed,
                locks_skipped = report.locks_skipped,
                locks_failed = report.locks_failed,
                defaulted = report.defaulted.len(),
                "Delinquency sweep finished"
            );
        }
        report
    }

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    async fn lock_delinquent(&self, candidate: LockCandidate, now: DateTime<Utc>, report: &mut SweepReport) {
        let LockCandidate {
            loan_id,
            account,
            days_overdue,
        } = candidate;

        let placed = match self.gateway.verify_account(&account).await {
            Ok(status) if status.locked => false,
            Ok(_) => {
                let reason = format!(
                    "{}: loan {loan_id} overdue {days_overdue} days",
                    self.config.lock_reason
                );
                match self.gateway.lock(&account, &reason).await {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::warn!(account = %account, loan_id = %loan_id, error = %e, "Delinquency lock failed");
                        report.locks_failed += 1;
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(account = %account, error = %e, "Could not check account before locking");
                report.locks_failed += 1;
                return;
            }
        };

        let mut state = self.state.write().await;
        if let Some(loan) = state.loans.get_mut(&loan_id) {
            loan.lock_requested = true;
            loan.caused_lock = placed;
        }
        if placed {
            report.locks_placed += 1;
            self.credit_event(
                &mut state,
                &account,
                CreditEventKind::AccountLocked,
                format!("Account locked: loan {loan_id} overdue {days_overdue} days"),
                now,
            );
            tracing::warn!(account = %account, loan_id = %loan_id, days_overdue, "Delinquent account locked");
        } else {
            report.locks_skipped += 1;
        }
        if let Err(e) = self.persist(&state) {
            tracing::error!(error = %e, "Sweep could not persist lock state");
        }
    }
}

/// Runs [`LoanService::sweep`] on a fixed interval until shutdown
pub struct DelinquencyMonitor {
    service: Arc<LoanService>,
    interval: Duration,
}

impl DelinquencyMonitor {
    pub fn new(service: Arc<LoanService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(interval = ?self.interval, "Delinquency monitor started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.service.sweep().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Delinquency monitor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LendingConfig;
    use crate::testing::FakeLedger;
    use chrono::Duration as ChronoDuration;
    use meshbank_store::MemoryStore;
    use rust_decimal_macros::dec;

    async fn service_with_loan(ledger: Arc<FakeLedger>) -> (LoanService, LoanId, DateTime<Utc>) {
        let service = LoanService::new(LendingConfig::default(), ledger, Arc::new(MemoryStore::new())).unwrap();
        let app = service.apply("dave", dec!(1000), 10).await.unwrap();
        let loan = service.approve(&app.id, "admin").await.unwrap();
        (service, loan.id, loan.due_at)
    }

    #[tokio::test]
    async fn test_not_overdue_is_untouched() {
        let (service, loan_id, due) = service_with_loan(Arc::new(FakeLedger::default())).await;
        let report = service.sweep_at(due).await;
        assert_eq!(report.examined, 1);
        assert_eq!(report.fee_days, 0);
        assert_eq!(service.loan("dave", &loan_id).await.unwrap().remaining, dec!(1120));
    }

    #[tokio::test]
    async fn test_fees_compound_once_per_day() {
        let (service, loan_id, due) = service_with_loan(Arc::new(FakeLedger::default())).await;

        let report = service.sweep_at(due + ChronoDuration::days(2)).await;
        assert_eq!(report.fee_days, 2);
        // 1120 * 1.02 = 1142.40, * 1.02 = 1165.248
        let loan = service.loan("dave", &loan_id).await.unwrap();
        assert_eq!(loan.remaining, dec!(1165.25));
        assert_eq!(loan.late_fees, dec!(45.25));

        let report = service.sweep_at(due + ChronoDuration::days(2)).await;
        assert_eq!(report.fee_days, 0);
        assert_eq!(service.loan("dave", &loan_id).await.unwrap().remaining, dec!(1165.25));
    }

    #[tokio::test]
    async fn test_lock_requested_once() {
        let ledger = Arc::new(FakeLedger::default());
        let (service, loan_id, due) = service_with_loan(ledger.clone()).await;

        let report = service.sweep_at(due + ChronoDuration::days(7)).await;
        assert_eq!(report.locks_placed, 1);
        assert!(service.loan("dave", &loan_id).await.unwrap().caused_lock);

        let report = service.sweep_at(due + ChronoDuration::days(8)).await;
        assert_eq!(report.locks_placed, 0);
        assert_eq!(ledger.count("lock:"), 1);
    }

    #[tokio::test]
    async fn test_already_locked_is_skipped() {
        let ledger = Arc::new(FakeLedger::default());
        let (service, loan_id, due) = service_with_loan(ledger.clone()).await;
        ledger.set_locked(true, Some("fraud review"));

        let report = service.sweep_at(due + ChronoDuration::days(7)).await;
        assert_eq!(report.locks_skipped, 1);
        assert_eq!(ledger.count("lock:"), 0);
        assert!(!service.loan("dave", &loan_id).await.unwrap().caused_lock);
    }

    #[tokio::test]
    async fn test_failed_lock_is_retried() {
        let ledger = Arc::new(FakeLedger::failing_locks());
        let (service, _, due) = service_with_loan(ledger.clone()).await;

        let report = service.sweep_at(due + ChronoDuration::days(7)).await;
        assert_eq!(report.locks_failed, 1);
        let report = service.sweep_at(due + ChronoDuration::days(8)).await;
        assert_eq!(report.locks_failed, 1);
        assert_eq!(ledger.count("lock:"), 2);
    }

    #[tokio::test]
    async fn test_default_counted_once() {
        let (service, loan_id, due) = service_with_loan(Arc::new(FakeLedger::default())).await;

        let report = service.sweep_at(due + ChronoDuration::days(30)).await;
        assert_eq!(report.defaulted, vec![loan_id.clone()]);
        assert_eq!(report.fee_days, 30);

        let report = service.sweep_at(due + ChronoDuration::days(45)).await;
        assert!(report.defaulted.is_empty());
        assert_eq!(report.examined, 0);

        let credit = service.credit_profile("dave").await.unwrap();
        assert_eq!(credit.defaults, 1);
        assert_eq!(service.loan("dave", &loan_id).await.unwrap().status, LoanStatus::Default);
    }

    #[tokio::test]
    async fn test_first_sweep_past_default_still_locks() {
        let ledger = Arc::new(FakeLedger::default());
        let (service, loan_id, due) = service_with_loan(ledger.clone()).await;

        let report = service.sweep_at(due + ChronoDuration::days(30)).await;
        assert_eq!(report.defaulted, vec![loan_id.clone()]);
        assert_eq!(report.locks_placed, 1);
        assert!(ledger.is_locked());

        let loan = service.loan("dave", &loan_id).await.unwrap();
        assert_eq!(loan.status, LoanStatus::Default);
        assert!(loan.caused_lock);

        let report = service.sweep_at(due + ChronoDuration::days(31)).await;
        assert_eq!(report.locks_placed, 0);
        assert_eq!(ledger.count("lock:"), 1);
    }

    #[tokio::test]
    async fn test_failed_lock_on_defaulted_loan_is_retried() {
        let ledger = Arc::new(FakeLedger::failing_locks());
        let (service, _, due) = service_with_loan(ledger.clone()).await;

        let report = service.sweep_at(due + ChronoDuration::days(30)).await;
        assert_eq!(report.defaulted.len(), 1);
        assert_eq!(report.locks_failed, 1);

        let report = service.sweep_at(due + ChronoDuration::days(31)).await;
        assert_eq!(report.examined, 0);
        assert_eq!(report.locks_failed, 1);
        assert_eq!(ledger.count("lock:"), 2);
    }

    #[tokio::test]
    async fn test_monitor_stops_on_shutdown() {
        let (service, _, _) = service_with_loan(Arc::new(FakeLedger::default())).await;
        let (tx, rx) = watch::channel(false);
        let handle = DelinquencyMonitor::new(Arc::new(service), Duration::from_millis(10)).spawn(rx);
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
