//! The Loan/Credit Service state machine

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use meshbank_protocol::{ApplicationStatus, ApplicationView, CreditView, EligibilityView, LoanStatus, LoanView};
use meshbank_store::{load_json, save_json, BlobStore};
use meshbank_types::{
    round_cents, validate_amount, ApplicationId, BankError, LoanId, Money, PaymentId, Result,
    PAID_EPSILON,
};
use tokio::sync::RwLock;

use crate::config::{AutoUnlockPolicy, LendingConfig};
use crate::credit::CreditTier;
use crate::datasets;
use crate::gateway::LedgerGateway;
use crate::loan::{Application, Loan, Payment};
use crate::profile::{CreditEventKind, CreditProfile};

pub(crate) struct LendingState {
    pub(crate) loans: HashMap<LoanId, Loan>,
    pub(crate) applications: HashMap<ApplicationId, Application>,
    pub(crate) profiles: HashMap<String, CreditProfile>,
}

impl LendingState {
    pub(crate) fn active_count(&self, account: &str) -> u32 {
        self.loans
            .values()
            .filter(|l| l.account == account && l.is_active())
            .count() as u32
    }

    fn outstanding(&self, account: &str) -> Money {
        self.loans
            .values()
            .filter(|l| l.account == account && l.is_active())
            .map(|l| l.remaining)
            .sum()
    }

    /// Profile for `account`, created at the base score on first use
    pub(crate) fn profile_mut(&mut self, account: &str, base: u16, now: DateTime<Utc>, cap: usize) -> &mut CreditProfile {
        self.profiles.entry(account.to_string()).or_insert_with(|| {
            let mut profile = CreditProfile::new(account, base, now);
            profile.log(CreditEventKind::ProfileOpened, "Credit profile opened", cap, now);
            profile
        })
    }
}

/// Marks a key as busy for the lifetime of the guard
struct InFlight<'a, K: Eq + Hash + Clone> {
    set: &'a DashMap<K, ()>,
    key: K,
}

impl<'a, K: Eq + Hash + Clone + std::fmt::Display> InFlight<'a, K> {
    fn acquire(set: &'a DashMap<K, ()>, key: K, what: &str) -> Result<Self> {
        if set.insert(key.clone(), ()).is_some() {
            return Err(BankError::Conflict(format!("{what} {key} is already in progress")));
        }
        Ok(Self { set, key })
    }
}

impl<K: Eq + Hash + Clone> Drop for InFlight<'_, K> {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}

/// Eligibility, application, approval and payment
pub struct LoanService {
    pub(crate) state: RwLock<LendingState>,
    pub(crate) gateway: Arc<dyn LedgerGateway>,
    store: Arc<dyn BlobStore>,
    pub(crate) config: LendingConfig,
    approving: DashMap<ApplicationId, ()>,
    paying: DashMap<LoanId, ()>,
}

impl LoanService {
    /// Create the service, restoring persisted loans, applications and
    /// profiles
    pub fn new(config: LendingConfig, gateway: Arc<dyn LedgerGateway>, store: Arc<dyn BlobStore>) -> Result<Self> {
        let loans: Vec<Loan> = load_json(&*store, datasets::LOANS)?.unwrap_or_default();
        let applications: Vec<Application> = load_json(&*store, datasets::APPLICATIONS)?.unwrap_or_default();
        let profiles: Vec<CreditProfile> = load_json(&*store, datasets::CREDIT_PROFILES)?.unwrap_or_default();

        tracing::info!(
            loans = loans.len(),
            applications = applications.len(),
            profiles = profiles.len(),
            "Lending state loaded"
        );

        Ok(Self {
            state: RwLock::new(LendingState {
                loans: loans.into_iter().map(|l| (l.id.clone(), l)).collect(),
                applications: applications.into_iter().map(|a| (a.id.clone(), a)).collect(),
                profiles: profiles.into_iter().map(|p| (p.account.clone(), p)).collect(),
            }),
            gateway,
            store,
            config,
            approving: DashMap::new(),
            paying: DashMap::new(),
        })
    }

    pub fn config(&self) -> &LendingConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<dyn LedgerGateway> {
        &self.gateway
    }

    /// Write all three datasets
    pub(crate) fn persist(&self, state: &LendingState) -> Result<()> {
        let mut loans: Vec<&Loan> = state.loans.values().collect();
        loans.sort_by_key(|l| l.issued_at);
        let mut applications: Vec<&Application> = state.applications.values().collect();
        applications.sort_by_key(|a| a.created_at);
        let mut profiles: Vec<&CreditProfile> = state.profiles.values().collect();
        profiles.sort_by(|a, b| a.account.cmp(&b.account));

        save_json(&*self.store, datasets::LOANS, &loans)
            .and_then(|_| save_json(&*self.store, datasets::APPLICATIONS, &applications))
            .and_then(|_| save_json(&*self.store, datasets::CREDIT_PROFILES, &profiles))
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to persist lending state");
                BankError::from(e)
            })
    }

    /// Recompute a profile after a credit-affecting event and log it
    pub(crate) fn credit_event(
        &self,
        state: &mut LendingState,
        account: &str,
        kind: CreditEventKind,
        detail: String,
        now: DateTime<Utc>,
    ) {
        let active = state.active_count(account);
        let base = self.config.default_score;
        let cap = self.config.history_cap;
        let profile = state.profile_mut(account, base, now, cap);
        let before = profile.score;
        let after = profile.recompute(active, base, now);
        profile.log(kind, detail, cap, now);
        if before != after {
            tracing::info!(account = %account, before, after, event = kind.as_str(), "Credit score changed");
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Tier, limit and remaining credit for `account`
    pub async fn get_eligibility(&self, account: &str) -> Result<EligibilityView> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let created = !state.profiles.contains_key(account);
        let view = self.eligibility_in(&mut state, account, now);
        if created {
            self.persist(&state)?;
        }
        Ok(view)
    }

    fn eligibility_in(&self, state: &mut LendingState, account: &str, now: DateTime<Utc>) -> EligibilityView {
        let active = state.active_count(account);
        let outstanding = state.outstanding(account);
        let base = self.config.default_score;
        let profile = state.profile_mut(account, base, now, self.config.history_cap);
        profile.recompute(active, base, now);

        let tier = profile.tier();
        let available = (tier.max_outstanding() - outstanding).max(Money::ZERO);
        EligibilityView {
            account: account.to_string(),
            score: profile.score,
            tier: tier.to_string(),
            rate: tier.rate(),
            tier_limit: tier.max_outstanding(),
            outstanding,
            available,
            min_loan: self.config.min_loan,
            eligible: available >= self.config.min_loan,
        }
    }

    pub async fn credit_profile(&self, account: &str) -> Result<CreditView> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let created = !state.profiles.contains_key(account);
        let active = state.active_count(account);
        let base = self.config.default_score;
        let profile = state.profile_mut(account, base, now, self.config.history_cap);
        profile.recompute(active, base, now);
        let view = profile.view();
        if created {
            self.persist(&state)?;
        }
        Ok(view)
    }

    pub async fn loans_for(&self, account: &str) -> Vec<LoanView> {
        let state = self.state.read().await;
        let mut loans: Vec<&Loan> = state.loans.values().filter(|l| l.account == account).collect();
        loans.sort_by_key(|l| l.issued_at);
        loans.into_iter().map(Loan::view).collect()
    }

    /// One loan, visible only to its owner
    pub async fn loan(&self, account: &str, loan_id: &LoanId) -> Result<LoanView> {
        let state = self.state.read().await;
        match state.loans.get(loan_id) {
            Some(loan) if loan.account == account => Ok(loan.view()),
            _ => Err(BankError::not_found("loan", loan_id)),
        }
    }

    pub async fn pending_applications(&self) -> Vec<ApplicationView> {
        let state = self.state.read().await;
        let mut pending: Vec<&Application> = state.applications.values().filter(|a| a.is_pending()).collect();
        pending.sort_by_key(|a| a.created_at);
        pending.into_iter().map(Application::view).collect()
    }

    pub async fn application(&self, id: &ApplicationId) -> Result<ApplicationView> {
        let state = self.state.read().await;
        state
            .applications
            .get(id)
            .map(Application::view)
            .ok_or_else(|| BankError::not_found("application", id))
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Open a pending application priced at the borrower's current tier
    pub async fn apply(&self, account: &str, amount: Money, term_days: u32) -> Result<ApplicationView> {
        let amount = validate_amount(amount)?;
        if amount < self.config.min_loan {
            return Err(BankError::validation(format!(
                "Minimum loan is {}",
                self.config.min_loan
            )));
        }
        if term_days < 1 || term_days > self.config.max_term_days {
            return Err(BankError::validation(format!(
                "Term must be between 1 and {} days",
                self.config.max_term_days
            )));
        }

        let now = Utc::now();
        let mut state = self.state.write().await;
        let eligibility = self.eligibility_in(&mut state, account, now);
        if !eligibility.eligible {
            return Err(BankError::validation(format!(
                "Not eligible: available credit {} is below the minimum loan",
                eligibility.available
            )));
        }
        if amount > eligibility.available {
            return Err(BankError::validation(format!(
                "Requested {amount} exceeds available credit {}",
                eligibility.available
            )));
        }

        let score = eligibility.score;
        let tier = CreditTier::from_score(score);
        let rate = tier.rate();
        let interest = round_cents(amount * rate);
        let application = Application {
            id: ApplicationId::new(),
            account: account.to_string(),
            amount,
            term_days,
            tier,
            score,
            rate,
            interest,
            total_owed: amount + interest,
            status: ApplicationStatus::Pending,
            created_at: now,
            resolved_at: None,
            resolved_by: None,
            denial_reason: None,
            loan_id: None,
        };
        let view = application.view();
        state.applications.insert(application.id.clone(), application);
        self.persist(&state)?;

        tracing::info!(
            account = %account,
            application_id = %view.id,
            amount = %amount,
            term_days,
            tier = %tier,
            "Loan application received"
        );
        Ok(view)
    }

    /// Approve a pending application: disburse through the ledger, then
    /// record the loan. Nothing is written unless the ledger confirms.
    pub async fn approve(&self, application_id: &ApplicationId, approver: &str) -> Result<LoanView> {
        let _guard = InFlight::acquire(&self.approving, application_id.clone(), "approval of")?;

        let application = {
            let state = self.state.read().await;
            let app = state
                .applications
                .get(application_id)
                .ok_or_else(|| BankError::not_found("application", application_id))?;
            if !app.is_pending() {
                return Err(BankError::Conflict(format!(
                    "application {application_id} is already {:?}",
                    app.status
                )));
            }
            app.clone()
        };

        let status = self.gateway.verify_account(&application.account).await?;
        if !status.exists {
            return Err(BankError::not_found("account", &application.account));
        }

        let op_id = format!("disburse:{application_id}");
        if let Err(e) = self
            .gateway
            .add(&application.account, application.amount, &op_id)
            .await
        {
            tracing::warn!(
                application_id = %application_id,
                account = %application.account,
                error = %e,
                "Disbursement failed, application stays pending"
            );
            return Err(e);
        }

        let now = Utc::now();
        let mut state = self.state.write().await;
        let loan = Loan::issue(&application, now);
        let view = loan.view();
        if let Some(app) = state.applications.get_mut(application_id) {
            app.status = ApplicationStatus::Approved;
            app.resolved_at = Some(now);
            app.resolved_by = Some(approver.to_string());
            app.loan_id = Some(loan.id.clone());
        }
        state.loans.insert(loan.id.clone(), loan);

        state
            .profile_mut(&application.account, self.config.default_score, now, self.config.history_cap)
            .total_loans += 1;
        self.credit_event(
            &mut state,
            &application.account,
            CreditEventKind::LoanIssued,
            format!("Loan {} issued: {} at {}", view.id, application.amount, application.rate),
            now,
        );
        self.persist(&state)?;

        tracing::info!(
            application_id = %application_id,
            loan_id = %view.id,
            account = %application.account,
            approver,
            principal = %application.amount,
            "Loan approved"
        );
        Ok(view)
    }

    /// Deny a pending application. No balance effect.
    pub async fn deny(&self, application_id: &ApplicationId, approver: &str, reason: &str) -> Result<ApplicationView> {
        let _guard = InFlight::acquire(&self.approving, application_id.clone(), "resolution of")?;

        let now = Utc::now();
        let mut state = self.state.write().await;
        let app = state
            .applications
            .get_mut(application_id)
            .ok_or_else(|| BankError::not_found("application", application_id))?;
        if !app.is_pending() {
            return Err(BankError::Conflict(format!(
                "application {application_id} is already {:?}",
                app.status
            )));
        }
        app.status = ApplicationStatus::Denied;
        app.resolved_at = Some(now);
        app.resolved_by = Some(approver.to_string());
        app.denial_reason = Some(reason.to_string());
        let view = app.view();

        self.credit_event(
            &mut state,
            &view.account,
            CreditEventKind::ApplicationDenied,
            format!("Application {application_id} denied: {reason}"),
            now,
        );
        self.persist(&state)?;

        tracing::info!(application_id = %application_id, approver, reason, "Loan application denied");
        Ok(view)
    }

    /// Pay towards a loan. The amount charged is capped at what remains.
    pub async fn pay(&self, loan_id: &LoanId, account: &str, amount: Money) -> Result<LoanView> {
        self.pay_with_key(loan_id, account, amount, None).await
    }

    /// Like [`LoanService::pay`], keyed for retries: the ledger debit uses
    /// `pay:<loan>:<key>` and a key already recorded on the loan returns the
    /// loan as it stands without charging again.
    pub async fn pay_with_key(
        &self,
        loan_id: &LoanId,
        account: &str,
        amount: Money,
        key: Option<&str>,
    ) -> Result<LoanView> {
        let amount = validate_amount(amount)?;
        if let Some(key) = key {
            if key.is_empty() || key.len() > 64 {
                return Err(BankError::validation("payment key must be 1-64 characters"));
            }
        }
        let _guard = InFlight::acquire(&self.paying, loan_id.clone(), "payment on")?;

        let remaining = {
            let state = self.state.read().await;
            let loan = match state.loans.get(loan_id) {
                Some(loan) if loan.account == account => loan,
                _ => return Err(BankError::not_found("loan", loan_id)),
            };
            if key.is_some() && loan.payments.iter().any(|p| p.key.as_deref() == key) {
                tracing::info!(loan_id = %loan_id, account = %account, "Payment key already applied");
                return Ok(loan.view());
            }
            if !loan.is_active() {
                return Err(BankError::Conflict(format!(
                    "loan {loan_id} is not active ({:?})",
                    loan.status
                )));
            }
            loan.remaining
        };

        let charge = amount.min(round_cents(remaining));
        let payment_id = PaymentId::new();
        let op_id = match key {
            Some(key) => format!("pay:{loan_id}:{key}"),
            None => format!("pay:{payment_id}"),
        };
        self.gateway.deduct(account, charge, &op_id).await?;

        let now = Utc::now();
        let mut state = self.state.write().await;
        let Some(loan) = state.loans.get_mut(loan_id) else {
            return Err(BankError::not_found("loan", loan_id));
        };
        loan.remaining -= charge;
        let paid_off = loan.remaining <= PAID_EPSILON && loan.is_active();
        if paid_off {
            loan.remaining = Money::ZERO;
            loan.status = LoanStatus::Paid;
            loan.paid_at = Some(now);
        }
        loan.payments.push(Payment {
            id: payment_id,
            key: key.map(str::to_string),
            amount: charge,
            remaining_after: loan.remaining,
            paid_at: now,
        });
        let on_time = now <= loan.due_at;
        let view = loan.view();

        if paid_off {
            let base = self.config.default_score;
            let profile = state.profile_mut(account, base, now, self.config.history_cap);
            let kind = if on_time {
                profile.paid_on_time += 1;
                CreditEventKind::PaidOnTime
            } else {
                profile.paid_late += 1;
                CreditEventKind::PaidLate
            };
            self.credit_event(&mut state, account, kind, format!("Loan {loan_id} paid off"), now);
        } else {
            self.credit_event(
                &mut state,
                account,
                CreditEventKind::PartialPayment,
                format!("Paid {charge} on loan {loan_id}, {} remaining", view.remaining),
                now,
            );
        }
        self.persist(&state)?;

        let other_overdue = state
            .loans
            .values()
            .any(|l| l.account == account && l.id != *loan_id && l.is_overdue(now));
        drop(state);

        tracing::info!(
            loan_id = %loan_id,
            account = %account,
            charged = %charge,
            remaining = %view.remaining,
            paid_off,
            "Loan payment applied"
        );

        if paid_off && !other_overdue {
            self.maybe_unlock(account).await;
        }
        Ok(view)
    }

    /// Lift an account lock after a payoff, as the auto-unlock policy allows.
    /// Failures are logged; the payment already stands.
    async fn maybe_unlock(&self, account: &str) {
        let policy = self.config.auto_unlock;
        if policy == AutoUnlockPolicy::Disabled {
            return;
        }
        let status = match self.gateway.verify_account(account).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(account = %account, error = %e, "Could not check lock after payoff");
                return;
            }
        };
        if !status.locked {
            return;
        }
        if policy == AutoUnlockPolicy::DelinquencyLocksOnly {
            let ours = status
                .lock_reason
                .as_deref()
                .map_or(false, |r| r.starts_with(&self.config.lock_reason));
            if !ours {
                tracing::info!(account = %account, "Lock kept: not placed for delinquency");
                return;
            }
        }
        match self.gateway.unlock(account).await {
            Ok(_) => tracing::info!(account = %account, "Account unlocked after payoff"),
            Err(e) => tracing::warn!(account = %account, error = %e, "Auto-unlock failed"),
        }
    }
}
