//! Account records

use chrono::{DateTime, Utc};
use meshbank_protocol::{AccountStatus, AccountView};
use meshbank_types::{BankError, Money, Result};
use serde::{Deserialize, Serialize};

/// Longest accepted username
pub const MAX_USERNAME_LEN: usize = 32;

/// A ledger account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub password_hash: String,
    pub balance: Money,
    pub locked: bool,
    pub lock_reason: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    /// Live-session indicator; not meaningful across restarts
    #[serde(skip)]
    pub online: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub transaction_count: u64,
    pub is_admin: bool,
}

impl Account {
    pub fn new(name: String, password_hash: String, balance: Money, is_admin: bool) -> Self {
        let now = Utc::now();
        Self {
            name,
            password_hash,
            balance,
            locked: false,
            lock_reason: None,
            locked_at: None,
            online: false,
            created_at: now,
            last_activity: now,
            transaction_count: 0,
            is_admin,
        }
    }

    /// Record a balance-affecting operation
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
        self.transaction_count += 1;
    }

    /// Error describing this account's lock
    pub fn locked_error(&self) -> BankError {
        BankError::AccountLocked {
            account: self.name.clone(),
            reason: self.lock_reason.clone().unwrap_or_default(),
            locked_at: self.locked_at,
        }
    }

    pub fn ensure_unlocked(&self) -> Result<()> {
        if self.locked {
            Err(self.locked_error())
        } else {
            Ok(())
        }
    }

    pub fn view(&self) -> AccountView {
        AccountView {
            username: self.name.clone(),
            balance: self.balance,
            locked: self.locked,
            lock_reason: self.lock_reason.clone(),
            locked_at: self.locked_at,
            online: self.online,
            is_admin: self.is_admin,
            created_at: self.created_at,
            last_activity: self.last_activity,
            transaction_count: self.transaction_count,
        }
    }

    pub fn status(&self) -> AccountStatus {
        AccountStatus {
            account: self.name.clone(),
            exists: true,
            locked: self.locked,
            lock_reason: self.lock_reason.clone(),
            locked_at: self.locked_at,
        }
    }
}

/// Usernames are 1 to 32 characters of `[A-Za-z0-9_-]`
pub fn validate_username(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_USERNAME_LEN {
        return Err(BankError::validation(format!(
            "Username must be 1-{MAX_USERNAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(BankError::validation(
            "Username may only contain letters, digits, '_' and '-'",
        ));
    }
    Ok(())
}

/// Side of a balance entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// Increase
    Credit,
    /// Decrease
    Debit,
}

/// Outcome of an inter-service balance operation, kept so a retried
/// operation id returns the same answer instead of applying twice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub op_id: String,
    pub account: String,
    pub entry_type: EntryType,
    pub amount: Money,
    pub balance_after: Money,
    pub created_at: DateTime<Utc>,
}
