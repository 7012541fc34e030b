//! The Ledger Service

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use meshbank_protocol::{AccountStatus, AccountView, LoginGrant, SessionInfo, TransferReceipt};
use meshbank_store::{load_json, save_json, AuditEntry, AuditLog, BlobStore};
use meshbank_types::{validate_amount, BankError, Money, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::account::{validate_username, Account, EntryType, LedgerEntry};
use crate::config::LedgerConfig;
use crate::password::PasswordService;
use crate::session::SessionTable;
use crate::ACCOUNTS_DATASET;

/// Persisted form of the ledger
#[derive(Debug, Default, Serialize, Deserialize)]
struct AccountsSnapshot {
    accounts: Vec<Account>,
    #[serde(default)]
    applied_ops: Vec<LedgerEntry>,
}

struct LedgerState {
    accounts: HashMap<String, Account>,
    sessions: SessionTable,
    applied_ops: HashMap<String, LedgerEntry>,
}

impl LedgerState {
    fn account(&self, name: &str) -> Result<&Account> {
        self.accounts
            .get(name)
            .ok_or_else(|| BankError::not_found("account", name))
    }

    fn account_mut(&mut self, name: &str) -> Result<&mut Account> {
        self.accounts
            .get_mut(name)
            .ok_or_else(|| BankError::not_found("account", name))
    }

    fn snapshot(&self) -> AccountsSnapshot {
        let mut accounts: Vec<Account> = self.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.name.cmp(&b.name));
        let mut applied_ops: Vec<LedgerEntry> = self.applied_ops.values().cloned().collect();
        applied_ops.sort_by_key(|e| e.created_at);
        AccountsSnapshot {
            accounts,
            applied_ops,
        }
    }
}

/// Authoritative balances, login, transfers and inter-service balance
/// mutation
pub struct LedgerService {
    state: RwLock<LedgerState>,
    store: Arc<dyn BlobStore>,
    audit: Arc<dyn AuditLog>,
    passwords: PasswordService,
    config: LedgerConfig,
}

impl LedgerService {
    /// Create the service, restoring any persisted accounts
    pub fn new(config: LedgerConfig, store: Arc<dyn BlobStore>, audit: Arc<dyn AuditLog>) -> Result<Self> {
        let snapshot: AccountsSnapshot = load_json(&*store, ACCOUNTS_DATASET)?.unwrap_or_default();
        let accounts: HashMap<String, Account> = snapshot
            .accounts
            .into_iter()
            .map(|a| (a.name.clone(), a))
            .collect();
        let applied_ops = snapshot
            .applied_ops
            .into_iter()
            .map(|e| (e.op_id.clone(), e))
            .collect();

        tracing::info!(accounts = accounts.len(), "Ledger state loaded");

        Ok(Self {
            state: RwLock::new(LedgerState {
                accounts,
                sessions: SessionTable::new(config.session_idle_timeout, config.token_length),
                applied_ops,
            }),
            store,
            audit,
            passwords: PasswordService::new(config.password.clone(), config.min_password_length),
            config,
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub async fn account_count(&self) -> usize {
        self.state.read().await.accounts.len()
    }

    pub async fn session_count(&self) -> usize {
        self.state.read().await.sessions.len()
    }

    fn persist(&self, state: &LedgerState) -> Result<()> {
        save_json(&*self.store, ACCOUNTS_DATASET, &state.snapshot()).map_err(|e| {
            tracing::error!(error = %e, "Failed to persist ledger state");
            BankError::from(e)
        })
    }

    fn record(&self, actor: &str, action: &str, target: &str, detail: String) {
        if let Err(e) = self.audit.append(&AuditEntry::new(actor, action, target, detail)) {
            tracing::error!(error = %e, action, "Failed to write audit entry");
        }
    }

    // ========================================================================
    // Accounts and sessions
    // ========================================================================

    /// Create an account. The initial balance is taken as given.
    pub async fn create_account(
        &self,
        name: &str,
        password: &str,
        initial_balance: Money,
        is_admin: bool,
    ) -> Result<AccountView> {
        validate_username(name)?;
        let hash = self.passwords.hash_password(password)?;

        let mut state = self.state.write().await;
        if state.accounts.contains_key(name) {
            return Err(BankError::Conflict(format!("account {name} already exists")));
        }
        let account = Account::new(name.to_string(), hash, initial_balance, is_admin);
        let view = account.view();
        state.accounts.insert(name.to_string(), account);
        self.persist(&state)?;
        drop(state);

        tracing::info!(account = %name, is_admin, balance = %initial_balance, "Account created");
        Ok(view)
    }

    /// Authenticate and open a session
    pub async fn login(&self, username: &str, password: &str, origin: Option<String>) -> Result<LoginGrant> {
        let hash = {
            let state = self.state.read().await;
            match state.accounts.get(username) {
                Some(account) => account.password_hash.clone(),
                None => return Err(BankError::Auth),
            }
        };

        if !self.passwords.verify_password(password, &hash) {
            tracing::warn!(account = %username, "Login failed: bad credentials");
            return Err(BankError::Auth);
        }

        let now = Utc::now();
        let mut state = self.state.write().await;
        let account = state.accounts.get(username).ok_or(BankError::Auth)?;
        account.ensure_unlocked()?;
        let is_admin = account.is_admin;

        let token = state.sessions.open(username, origin, now)?;
        let account = state.account_mut(username)?;
        account.online = true;
        account.last_activity = now;
        let balance = account.balance;
        self.persist(&state)?;

        tracing::info!(account = %username, "Login");
        Ok(LoginGrant {
            token,
            username: username.to_string(),
            balance,
            is_admin,
        })
    }

    pub async fn logout(&self, token: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .close(token)
            .ok_or_else(|| BankError::session_invalid("unknown or expired token"))?;
        if let Some(account) = state.accounts.get_mut(&session.account) {
            account.online = false;
        }
        tracing::info!(account = %session.account, "Logout");
        Ok(())
    }

    /// Resolve a token to its account, refreshing the session
    pub async fn validate_session(&self, token: &str) -> Result<SessionInfo> {
        let mut state = self.state.write().await;
        Self::session_in(&mut state, token)
    }

    fn session_in(state: &mut LedgerState, token: &str) -> Result<SessionInfo> {
        let session = state.sessions.validate(token, Utc::now())?;
        let (locked_error, is_admin) = match state.accounts.get(&session.account) {
            Some(account) if account.locked => (Some(account.locked_error()), account.is_admin),
            Some(account) => (None, account.is_admin),
            None => {
                state.sessions.close(token);
                return Err(BankError::session_invalid("account no longer exists"));
            }
        };
        if let Some(err) = locked_error {
            state.sessions.close(token);
            return Err(err);
        }
        Ok(SessionInfo {
            account: session.account,
            is_admin,
        })
    }

    async fn require_admin(&self, token: &str) -> Result<String> {
        let info = self.validate_session(token).await?;
        if !info.is_admin {
            tracing::warn!(account = %info.account, "Admin command refused");
            return Err(BankError::session_invalid("admin privilege required"));
        }
        Ok(info.account)
    }

    pub async fn balance(&self, token: &str) -> Result<(String, Money)> {
        let mut state = self.state.write().await;
        let info = Self::session_in(&mut state, token)?;
        let balance = state.account(&info.account)?.balance;
        Ok((info.account, balance))
    }

    pub async fn account_info(&self, token: &str) -> Result<AccountView> {
        let mut state = self.state.write().await;
        let info = Self::session_in(&mut state, token)?;
        Ok(state.account(&info.account)?.view())
    }

    /// Expire idle sessions as of `now`
    pub async fn sweep_sessions(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.write().await;
        let expired = state.sessions.sweep(now);
        for name in &expired {
            if let Some(account) = state.accounts.get_mut(name) {
                account.online = false;
            }
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Idle sessions expired");
        }
        expired.len()
    }

    // ========================================================================
    // Transfers
    // ========================================================================

    /// Transfer from the session's account
    pub async fn transfer(&self, token: &str, to: &str, amount: Money) -> Result<TransferReceipt> {
        let mut state = self.state.write().await;
        let info = Self::session_in(&mut state, token)?;
        self.transfer_in(&mut state, &info.account, to, amount)
    }

    /// Move `amount` between two accounts atomically
    pub async fn transfer_between(&self, from: &str, to: &str, amount: Money) -> Result<TransferReceipt> {
        let mut state = self.state.write().await;
        self.transfer_in(&mut state, from, to, amount)
    }

    fn transfer_in(&self, state: &mut LedgerState, from: &str, to: &str, amount: Money) -> Result<TransferReceipt> {
        let amount = validate_amount(amount)?;
        if from == to {
            return Err(BankError::validation("Cannot transfer to the same account"));
        }

        let source = state.account(from)?;
        source.ensure_unlocked()?;
        state.account(to)?.ensure_unlocked()?;
        if source.balance < amount {
            return Err(BankError::InsufficientFunds {
                account: from.to_string(),
                requested: amount,
                available: source.balance,
            });
        }

        let now = Utc::now();
        let source = state.account_mut(from)?;
        source.balance -= amount;
        source.touch(now);
        let from_balance = source.balance;

        let destination = state.account_mut(to)?;
        destination.balance += amount;
        destination.touch(now);

        self.persist(state)?;
        self.record(from, "transfer", to, format!("amount={amount}"));
        tracing::info!(from = %from, to = %to, amount = %amount, "Transfer completed");

        Ok(TransferReceipt {
            from: from.to_string(),
            to: to.to_string(),
            amount,
            from_balance,
        })
    }

    // ========================================================================
    // Admin commands
    // ========================================================================

    pub async fn admin_create_account(
        &self,
        token: &str,
        username: &str,
        password: &str,
        initial_balance: Money,
        is_admin: bool,
    ) -> Result<AccountView> {
        let admin = self.require_admin(token).await?;
        let view = self
            .create_account(username, password, initial_balance, is_admin)
            .await?;
        self.record(
            &admin,
            "create_account",
            username,
            format!("balance={initial_balance} is_admin={is_admin}"),
        );
        Ok(view)
    }

    pub async fn admin_set_balance(&self, token: &str, username: &str, balance: Money) -> Result<AccountView> {
        let admin = self.require_admin(token).await?;
        if balance < Money::ZERO && !self.config.allow_negative_admin_balance {
            return Err(BankError::validation("Balance must not be negative"));
        }

        let mut state = self.state.write().await;
        let account = state.account_mut(username)?;
        let previous = account.balance;
        account.balance = balance;
        account.last_activity = Utc::now();
        let view = account.view();
        self.persist(&state)?;
        drop(state);

        self.record(&admin, "set_balance", username, format!("from={previous} to={balance}"));
        tracing::info!(admin = %admin, account = %username, from = %previous, to = %balance, "Balance set");
        Ok(view)
    }

    pub async fn admin_lock(&self, token: &str, username: &str, reason: &str) -> Result<AccountStatus> {
        let admin = self.require_admin(token).await?;
        if username == admin {
            return Err(BankError::validation("Admins cannot lock their own account"));
        }
        self.lock_account(username, reason, &admin).await
    }

    pub async fn admin_unlock(&self, token: &str, username: &str) -> Result<AccountStatus> {
        let admin = self.require_admin(token).await?;
        self.unlock_account(username, &admin).await
    }

    pub async fn admin_reset_password(&self, token: &str, username: &str, new_password: &str) -> Result<()> {
        let admin = self.require_admin(token).await?;
        let hash = self.passwords.hash_password(new_password)?;

        let mut state = self.state.write().await;
        state.account_mut(username)?.password_hash = hash;
        if state.sessions.close_account(username).is_some() {
            if let Some(account) = state.accounts.get_mut(username) {
                account.online = false;
            }
        }
        self.persist(&state)?;
        drop(state);

        self.record(&admin, "reset_password", username, String::new());
        tracing::info!(admin = %admin, account = %username, "Password reset");
        Ok(())
    }

    pub async fn admin_list_accounts(&self, token: &str) -> Result<Vec<AccountView>> {
        self.require_admin(token).await?;
        let state = self.state.read().await;
        let mut accounts: Vec<AccountView> = state.accounts.values().map(Account::view).collect();
        accounts.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(accounts)
    }

    // ========================================================================
    // Inter-service surface
    // ========================================================================

    pub async fn verify_account_exists(&self, account: &str) -> AccountStatus {
        let state = self.state.read().await;
        match state.accounts.get(account) {
            Some(a) => a.status(),
            None => AccountStatus {
                account: account.to_string(),
                exists: false,
                locked: false,
                lock_reason: None,
                locked_at: None,
            },
        }
    }

    pub async fn get_balance(&self, account: &str) -> Result<Money> {
        let state = self.state.read().await;
        Ok(state.account(account)?.balance)
    }

    /// Debit `amount`. The lock flag is not consulted.
    pub async fn deduct_balance(&self, account: &str, amount: Money, op_id: &str) -> Result<Money> {
        self.apply_entry(account, amount, op_id, EntryType::Debit).await
    }

    /// Credit `amount`. The lock flag is not consulted.
    pub async fn add_balance(&self, account: &str, amount: Money, op_id: &str) -> Result<Money> {
        self.apply_entry(account, amount, op_id, EntryType::Credit).await
    }

    async fn apply_entry(&self, account: &str, amount: Money, op_id: &str, entry_type: EntryType) -> Result<Money> {
        let amount = validate_amount(amount)?;
        if op_id.is_empty() {
            return Err(BankError::validation("Operation id is required"));
        }

        let mut state = self.state.write().await;
        if let Some(previous) = state.applied_ops.get(op_id) {
            if previous.account == account && previous.amount == amount && previous.entry_type == entry_type {
                tracing::info!(op_id, account = %account, "Replayed balance operation");
                return Ok(previous.balance_after);
            }
            return Err(BankError::Conflict(format!(
                "operation id {op_id} was already used for a different operation"
            )));
        }

        let now = Utc::now();
        let target = state.account_mut(account)?;
        if entry_type == EntryType::Debit && target.balance < amount {
            return Err(BankError::InsufficientFunds {
                account: account.to_string(),
                requested: amount,
                available: target.balance,
            });
        }
        match entry_type {
            EntryType::Credit => target.balance += amount,
            EntryType::Debit => target.balance -= amount,
        }
        target.touch(now);
        let balance_after = target.balance;

        state.applied_ops.insert(
            op_id.to_string(),
            LedgerEntry {
                op_id: op_id.to_string(),
                account: account.to_string(),
                entry_type,
                amount,
                balance_after,
                created_at: now,
            },
        );
        self.prune_applied_ops(&mut state);
        self.persist(&state)?;
        drop(state);

        let action = match entry_type {
            EntryType::Credit => "rpc_add_balance",
            EntryType::Debit => "rpc_deduct_balance",
        };
        self.record("service", action, account, format!("amount={amount} op={op_id}"));
        tracing::info!(account = %account, amount = %amount, op_id, ?entry_type, "Balance operation applied");
        Ok(balance_after)
    }

    fn prune_applied_ops(&self, state: &mut LedgerState) {
        let excess = state.applied_ops.len().saturating_sub(self.config.max_applied_ops);
        if excess == 0 {
            return;
        }
        let mut by_age: Vec<(DateTime<Utc>, String)> = state
            .applied_ops
            .values()
            .map(|e| (e.created_at, e.op_id.clone()))
            .collect();
        by_age.sort();
        for (_, op_id) in by_age.into_iter().take(excess) {
            state.applied_ops.remove(&op_id);
        }
    }

    /// Lock an account and end its session. Locking a locked account keeps
    /// the original reason.
    pub async fn lock_account(&self, account: &str, reason: &str, actor: &str) -> Result<AccountStatus> {
        let mut state = self.state.write().await;
        let target = state.account_mut(account)?;
        if target.locked {
            tracing::debug!(account = %account, "Account already locked");
            return Ok(target.status());
        }
        target.locked = true;
        target.lock_reason = Some(reason.to_string());
        target.locked_at = Some(Utc::now());
        target.online = false;
        let status = target.status();

        state.sessions.close_account(account);
        self.persist(&state)?;
        drop(state);

        self.record(actor, "lock", account, format!("reason={reason}"));
        tracing::warn!(account = %account, reason, actor, "Account locked");
        Ok(status)
    }

    pub async fn unlock_account(&self, account: &str, actor: &str) -> Result<AccountStatus> {
        let mut state = self.state.write().await;
        let target = state.account_mut(account)?;
        if !target.locked {
            return Ok(target.status());
        }
        let previous_reason = target.lock_reason.take().unwrap_or_default();
        target.locked = false;
        target.locked_at = None;
        let status = target.status();
        self.persist(&state)?;
        drop(state);

        self.record(actor, "unlock", account, format!("previous_reason={previous_reason}"));
        tracing::info!(account = %account, actor, "Account unlocked");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PasswordConfig;
    use meshbank_store::{MemoryAuditLog, MemoryStore};
    use rust_decimal_macros::dec;

    fn config() -> LedgerConfig {
        LedgerConfig {
            password: PasswordConfig::light(),
            ..LedgerConfig::default()
        }
    }

    async fn ledger() -> (LedgerService, Arc<MemoryStore>, Arc<MemoryAuditLog>) {
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(MemoryAuditLog::new());
        let ledger = LedgerService::new(config(), store.clone(), audit.clone()).unwrap();
        ledger.create_account("root", "rootpw", dec!(0), true).await.unwrap();
        ledger.create_account("alice", "alicepw", dec!(1000), false).await.unwrap();
        ledger.create_account("bob", "bobpw", dec!(50), false).await.unwrap();
        (ledger, store, audit)
    }

    #[tokio::test]
    async fn test_transfer_conserves_money() {
        let (ledger, _, audit) = ledger().await;
        let grant = ledger.login("alice", "alicepw", None).await.unwrap();

        let receipt = ledger.transfer(&grant.token, "bob", dec!(300)).await.unwrap();
        assert_eq!(receipt.from_balance, dec!(700));
        assert_eq!(ledger.get_balance("alice").await.unwrap(), dec!(700));
        assert_eq!(ledger.get_balance("bob").await.unwrap(), dec!(350));
        assert_eq!(audit.actions("transfer").len(), 1);
    }

    #[tokio::test]
    async fn test_transfer_failures_leave_balances_alone() {
        let (ledger, _, _) = ledger().await;
        let token = ledger.login("alice", "alicepw", None).await.unwrap().token;

        assert!(matches!(
            ledger.transfer(&token, "bob", dec!(0)).await,
            Err(BankError::Validation(_))
        ));
        assert!(matches!(
            ledger.transfer(&token, "nobody", dec!(5)).await,
            Err(BankError::NotFound { .. })
        ));
        assert!(matches!(
            ledger.transfer(&token, "bob", dec!(5000)).await,
            Err(BankError::InsufficientFunds { .. })
        ));
        ledger.lock_account("bob", "review", "test").await.unwrap();
        assert!(matches!(
            ledger.transfer(&token, "bob", dec!(5)).await,
            Err(BankError::AccountLocked { .. })
        ));

        assert_eq!(ledger.get_balance("alice").await.unwrap(), dec!(1000));
        assert_eq!(ledger.get_balance("bob").await.unwrap(), dec!(50));
    }

    #[tokio::test]
    async fn test_login_error_order() {
        let (ledger, _, _) = ledger().await;
        assert!(matches!(ledger.login("alice", "wrong", None).await, Err(BankError::Auth)));
        assert!(matches!(ledger.login("ghost", "x", None).await, Err(BankError::Auth)));

        ledger.login("alice", "alicepw", None).await.unwrap();
        assert!(matches!(
            ledger.login("alice", "alicepw", None).await,
            Err(BankError::SessionConflict { .. })
        ));

        ledger.lock_account("bob", "Loan delinquency", "monitor").await.unwrap();
        // Wrong password on a locked account is still an auth failure
        assert!(matches!(ledger.login("bob", "nope", None).await, Err(BankError::Auth)));
        match ledger.login("bob", "bobpw", None).await {
            Err(BankError::AccountLocked { reason, locked_at, .. }) => {
                assert_eq!(reason, "Loan delinquency");
                assert!(locked_at.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lock_terminates_session() {
        let (ledger, _, _) = ledger().await;
        let token = ledger.login("bob", "bobpw", None).await.unwrap().token;
        assert_eq!(ledger.session_count().await, 1);

        ledger.lock_account("bob", "overdue", "monitor").await.unwrap();
        assert_eq!(ledger.session_count().await, 0);
        assert!(ledger.balance(&token).await.is_err());
        assert!(ledger.verify_account_exists("bob").await.locked);
    }

    #[tokio::test]
    async fn test_logout_allows_new_login() {
        let (ledger, _, _) = ledger().await;
        let token = ledger.login("alice", "alicepw", None).await.unwrap().token;
        ledger.logout(&token).await.unwrap();
        assert!(ledger.logout(&token).await.is_err());
        assert!(ledger.login("alice", "alicepw", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_admin_commands_require_admin() {
        let (ledger, _, audit) = ledger().await;
        let user = ledger.login("alice", "alicepw", None).await.unwrap().token;
        assert!(matches!(
            ledger.admin_set_balance(&user, "bob", dec!(1)).await,
            Err(BankError::SessionInvalid { .. })
        ));

        let admin = ledger.login("root", "rootpw", None).await.unwrap().token;
        let view = ledger.admin_set_balance(&admin, "bob", dec!(75)).await.unwrap();
        assert_eq!(view.balance, dec!(75));
        assert_eq!(audit.actions("set_balance").len(), 1);

        assert_eq!(ledger.admin_list_accounts(&admin).await.unwrap().len(), 3);
        ledger
            .admin_create_account(&admin, "dave", "davepw", dec!(-20), false)
            .await
            .unwrap();
        assert_eq!(ledger.get_balance("dave").await.unwrap(), dec!(-20));
    }

    #[tokio::test]
    async fn test_negative_admin_balance_is_a_policy() {
        let (ledger, _, _) = ledger().await;
        let admin = ledger.login("root", "rootpw", None).await.unwrap().token;
        assert!(matches!(
            ledger.admin_set_balance(&admin, "bob", dec!(-5)).await,
            Err(BankError::Validation(_))
        ));

        let store = Arc::new(MemoryStore::new());
        let permissive = LedgerService::new(
            LedgerConfig {
                allow_negative_admin_balance: true,
                ..config()
            },
            store,
            Arc::new(MemoryAuditLog::new()),
        )
        .unwrap();
        permissive.create_account("root", "rootpw", dec!(0), true).await.unwrap();
        permissive.create_account("bob", "bobpw", dec!(0), false).await.unwrap();
        let admin = permissive.login("root", "rootpw", None).await.unwrap().token;
        let view = permissive.admin_set_balance(&admin, "bob", dec!(-5)).await.unwrap();
        assert_eq!(view.balance, dec!(-5));
    }

    #[tokio::test]
    async fn test_balance_operations_are_idempotent() {
        let (ledger, _, _) = ledger().await;
        assert_eq!(ledger.add_balance("bob", dec!(100), "disburse:app_1").await.unwrap(), dec!(150));
        assert_eq!(ledger.add_balance("bob", dec!(100), "disburse:app_1").await.unwrap(), dec!(150));
        assert_eq!(ledger.get_balance("bob").await.unwrap(), dec!(150));

        assert!(matches!(
            ledger.add_balance("bob", dec!(99), "disburse:app_1").await,
            Err(BankError::Conflict(_))
        ));
        assert!(matches!(
            ledger.deduct_balance("bob", dec!(500), "pay:1").await,
            Err(BankError::InsufficientFunds { .. })
        ));
        // A failed attempt does not burn the id
        ledger.add_balance("bob", dec!(400), "topup").await.unwrap();
        assert_eq!(ledger.deduct_balance("bob", dec!(500), "pay:1").await.unwrap(), dec!(50));
    }

    #[tokio::test]
    async fn test_rpc_mutations_ignore_lock() {
        let (ledger, _, _) = ledger().await;
        ledger.lock_account("alice", "overdue", "monitor").await.unwrap();
        assert_eq!(ledger.deduct_balance("alice", dec!(10), "op").await.unwrap(), dec!(990));
    }

    #[tokio::test]
    async fn test_lock_is_idempotent_and_keeps_reason() {
        let (ledger, _, audit) = ledger().await;
        ledger.lock_account("bob", "first", "admin").await.unwrap();
        let status = ledger.lock_account("bob", "second", "admin").await.unwrap();
        assert_eq!(status.lock_reason.as_deref(), Some("first"));
        assert_eq!(audit.actions("lock").len(), 1);

        let status = ledger.unlock_account("bob", "admin").await.unwrap();
        assert!(!status.locked);
        assert!(status.lock_reason.is_none());
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let (ledger, store, _) = ledger().await;
        ledger.add_balance("alice", dec!(5), "op-1").await.unwrap();
        ledger.lock_account("bob", "review", "admin").await.unwrap();
        drop(ledger);

        let reloaded = LedgerService::new(config(), store, Arc::new(MemoryAuditLog::new())).unwrap();
        assert_eq!(reloaded.account_count().await, 3);
        assert_eq!(reloaded.get_balance("alice").await.unwrap(), dec!(1005));
        assert!(reloaded.verify_account_exists("bob").await.locked);
        // The replay record survives too
        assert_eq!(reloaded.add_balance("alice", dec!(5), "op-1").await.unwrap(), dec!(1005));
        assert!(reloaded.login("alice", "alicepw", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_sweep_expires_idle_sessions() {
        let (ledger, _, _) = ledger().await;
        let token = ledger.login("alice", "alicepw", None).await.unwrap().token;
        assert_eq!(ledger.sweep_sessions(Utc::now()).await, 0);
        let later = Utc::now() + chrono::Duration::minutes(11);
        assert_eq!(ledger.sweep_sessions(later).await, 1);
        assert!(ledger.validate_session(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_and_invalid_accounts() {
        let (ledger, _, _) = ledger().await;
        assert!(matches!(
            ledger.create_account("alice", "whatever", dec!(0), false).await,
            Err(BankError::Conflict(_))
        ));
        assert!(matches!(
            ledger.create_account("bad name", "whatever", dec!(0), false).await,
            Err(BankError::Validation(_))
        ));
    }
}
