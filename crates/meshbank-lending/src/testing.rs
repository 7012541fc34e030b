//! In-memory ledger for unit tests

use async_trait::async_trait;
use meshbank_protocol::{AccountStatus, SessionInfo};
use meshbank_types::{BankError, Money, Result};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use tokio::sync::Notify;

use crate::gateway::LedgerGateway;

/// Accepts every call, records it, and tracks a single lock flag
#[derive(Default)]
pub struct FakeLedger {
    calls: Mutex<Vec<String>>,
    lock: Mutex<Option<String>>,
    fail_locks: bool,
    fail_adds: bool,
    hold: Mutex<bool>,
    entered: Notify,
    released: Notify,
}

impl FakeLedger {
    pub fn failing_locks() -> Self {
        Self {
            fail_locks: true,
            ..Self::default()
        }
    }

    pub fn failing_adds() -> Self {
        Self {
            fail_adds: true,
            ..Self::default()
        }
    }

    /// Park the next `add` or `deduct` until [`FakeLedger::release`]
    pub fn hold(&self) {
        *self.hold.lock() = true;
    }

    /// Wait until a held call has reached the ledger
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        *self.hold.lock() = false;
        self.released.notify_one();
    }

    async fn maybe_park(&self) {
        let held = *self.hold.lock();
        if held {
            self.entered.notify_one();
            self.released.notified().await;
        }
    }

    pub fn set_locked(&self, locked: bool, reason: Option<&str>) {
        *self.lock.lock() = locked.then(|| reason.unwrap_or("locked").to_string());
    }

    pub fn is_locked(&self) -> bool {
        self.lock.lock().is_some()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn status(&self, account: &str) -> AccountStatus {
        let reason = self.lock.lock().clone();
        AccountStatus {
            account: account.to_string(),
            exists: account != "ghost",
            locked: reason.is_some(),
            lock_reason: reason,
            locked_at: None,
        }
    }
}

#[async_trait]
impl LedgerGateway for FakeLedger {
    async fn verify_account(&self, account: &str) -> Result<AccountStatus> {
        Ok(self.status(account))
    }

    async fn get_balance(&self, _account: &str) -> Result<Money> {
        Ok(dec!(0))
    }

    async fn deduct(&self, _account: &str, _amount: Money, op_id: &str) -> Result<Money> {
        self.calls.lock().push(format!("deduct:{op_id}"));
        self.maybe_park().await;
        Ok(dec!(0))
    }

    async fn add(&self, _account: &str, _amount: Money, op_id: &str) -> Result<Money> {
        self.calls.lock().push(format!("add:{op_id}"));
        self.maybe_park().await;
        if self.fail_adds {
            return Err(BankError::Timeout("ledger".into()));
        }
        Ok(dec!(0))
    }

    async fn lock(&self, account: &str, reason: &str) -> Result<AccountStatus> {
        self.calls.lock().push(format!("lock:{reason}"));
        if self.fail_locks {
            return Err(BankError::Timeout("ledger".into()));
        }
        self.set_locked(true, Some(reason));
        Ok(self.status(account))
    }

    async fn unlock(&self, account: &str) -> Result<AccountStatus> {
        self.calls.lock().push("unlock".into());
        self.set_locked(false, None);
        Ok(self.status(account))
    }

    async fn validate_session(&self, token: &str) -> Result<SessionInfo> {
        match token {
            "admin-token" => Ok(SessionInfo {
                account: "admin".into(),
                is_admin: true,
            }),
            "" => Err(BankError::session_invalid("unknown token")),
            other => Ok(SessionInfo {
                account: other.trim_end_matches("-token").to_string(),
                is_admin: false,
            }),
        }
    }
}
