//! Login sessions
//!
//! Tokens are random and URL-safe; only their SHA-256 hash is held. Each
//! account has at most one live session.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use meshbank_crypto::sha256_hex;
use meshbank_types::{BankError, Result};
use rand::RngCore;

/// A live session
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub account: String,
    /// Link or node the login arrived from
    pub origin: Option<String>,
    pub login_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    fn is_expired(&self, now: DateTime<Utc>, idle_timeout: Duration) -> bool {
        now - self.last_activity > idle_timeout
    }
}

/// Sessions indexed by token hash and by account
pub struct SessionTable {
    by_token: HashMap<String, Session>,
    by_account: HashMap<String, String>,
    idle_timeout: Duration,
    token_length: usize,
}

impl SessionTable {
    pub fn new(idle_timeout: std::time::Duration, token_length: usize) -> Self {
        Self {
            by_token: HashMap::new(),
            by_account: HashMap::new(),
            idle_timeout: Duration::from_std(idle_timeout).unwrap_or(Duration::minutes(10)),
            token_length: token_length.max(16),
        }
    }

    fn generate_token(&self) -> String {
        let mut bytes = vec![0u8; self.token_length];
        rand::thread_rng().fill_bytes(&mut bytes);
        base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, &bytes)
    }

    fn hash_token(token: &str) -> String {
        sha256_hex(token.as_bytes())
    }

    /// Whether `account` currently holds a non-expired session
    pub fn has_live(&self, account: &str, now: DateTime<Utc>) -> bool {
        self.by_account
            .get(account)
            .and_then(|hash| self.by_token.get(hash))
            .map_or(false, |s| !s.is_expired(now, self.idle_timeout))
    }

    /// Start a session. An expired leftover session is replaced; a live one
    /// is a conflict.
    pub fn open(&mut self, account: &str, origin: Option<String>, now: DateTime<Utc>) -> Result<String> {
        if self.has_live(account, now) {
            return Err(BankError::SessionConflict {
                account: account.to_string(),
            });
        }
        self.close_account(account);

        let token = self.generate_token();
        let hash = Self::hash_token(&token);
        self.by_token.insert(
            hash.clone(),
            Session {
                account: account.to_string(),
                origin,
                login_time: now,
                last_activity: now,
            },
        );
        self.by_account.insert(account.to_string(), hash);
        Ok(token)
    }

    /// Check a token and refresh its activity time
    pub fn validate(&mut self, token: &str, now: DateTime<Utc>) -> Result<Session> {
        let hash = Self::hash_token(token);
        let expired = match self.by_token.get(&hash) {
            None => return Err(BankError::session_invalid("unknown or expired token")),
            Some(session) => session.is_expired(now, self.idle_timeout),
        };
        if expired {
            self.remove_hash(&hash);
            return Err(BankError::session_invalid("session expired"));
        }

        match self.by_token.get_mut(&hash) {
            Some(session) => {
                session.last_activity = now;
                Ok(session.clone())
            }
            None => Err(BankError::session_invalid("unknown or expired token")),
        }
    }

    /// End the session behind `token`
    pub fn close(&mut self, token: &str) -> Option<Session> {
        self.remove_hash(&Self::hash_token(token))
    }

    /// End whatever session `account` holds
    pub fn close_account(&mut self, account: &str) -> Option<Session> {
        let hash = self.by_account.get(account).cloned()?;
        self.remove_hash(&hash)
    }

    fn remove_hash(&mut self, hash: &str) -> Option<Session> {
        let session = self.by_token.remove(hash)?;
        self.by_account.remove(&session.account);
        Some(session)
    }

    /// Drop every expired session, returning the affected accounts
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = self
            .by_token
            .iter()
            .filter(|(_, s)| s.is_expired(now, self.idle_timeout))
            .map(|(hash, _)| hash.clone())
            .collect();

        expired
            .iter()
            .filter_map(|hash| self.remove_hash(hash))
            .map(|s| s.account)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}
