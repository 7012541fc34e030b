//! Error types for MeshBank
//!
//! One taxonomy is shared by every service so a failure raised in the ledger
//! can travel through the loan service and a relay and still reach the client
//! with its original kind. On the wire an error is `(ErrorKind, message)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Money;

/// Result type for MeshBank operations
pub type Result<T> = std::result::Result<T, BankError>;

/// MeshBank error types
#[derive(Debug, Clone, Error)]
pub enum BankError {
    // ========================================================================
    // Authentication Errors
    // ========================================================================

    /// Bad credentials
    #[error("Invalid username or password")]
    Auth,

    /// Account is locked
    #[error("Account {account} is locked: {reason}")]
    AccountLocked {
        account: String,
        reason: String,
        locked_at: Option<DateTime<Utc>>,
    },

    /// A live session already exists for the account
    #[error("Account {account} already has an active session")]
    SessionConflict { account: String },

    /// Token is unknown, expired, or lacks the required privilege
    #[error("Invalid session: {reason}")]
    SessionInvalid { reason: String },

    // ========================================================================
    // Funds Errors
    // ========================================================================

    /// Insufficient funds
    #[error("Insufficient funds in {account}: requested {requested}, available {available}")]
    InsufficientFunds {
        account: String,
        requested: Money,
        available: Money,
    },

    // ========================================================================
    // Request Errors
    // ========================================================================

    /// Bad amount, term, username, ...
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Account, loan or application not found
    #[error("{kind} {id} not found")]
    NotFound { kind: String, id: String },

    /// Another operation on the same record is in flight, or the record is
    /// not in a state that allows the operation
    #[error("Conflict: {0}")]
    Conflict(String),

    // ========================================================================
    // Transport Errors
    // ========================================================================

    /// No reply within the deadline
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// Envelope could not be opened with any candidate key
    #[error("Decryption failed")]
    Decryption,

    /// No upstream service known
    #[error("No {0} service reachable")]
    Discovery(String),

    // ========================================================================
    // Infrastructure Errors
    // ========================================================================

    /// Persisting state failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BankError {
    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.to_string(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an invalid-session error
    pub fn session_invalid(reason: impl Into<String>) -> Self {
        Self::SessionInvalid {
            reason: reason.into(),
        }
    }

    /// Wire kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth => ErrorKind::Auth,
            Self::AccountLocked { .. } => ErrorKind::AccountLocked,
            Self::SessionConflict { .. } => ErrorKind::SessionConflict,
            Self::SessionInvalid { .. } => ErrorKind::SessionInvalid,
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Decryption => ErrorKind::Decryption,
            Self::Discovery(_) => ErrorKind::Discovery,
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a caller may retry the same request later
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Discovery(_) | Self::Conflict(_)
        )
    }

    /// Convert to the wire representation
    pub fn to_wire(&self) -> WireError {
        let (lock_reason, locked_at) = match self {
            Self::AccountLocked {
                reason, locked_at, ..
            } => (Some(reason.clone()), *locked_at),
            _ => (None, None),
        };
        WireError {
            kind: self.kind(),
            message: self.to_string(),
            lock_reason,
            locked_at,
        }
    }
}

/// Wire form of the error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Auth,
    AccountLocked,
    SessionConflict,
    SessionInvalid,
    InsufficientFunds,
    Validation,
    NotFound,
    Conflict,
    Timeout,
    Decryption,
    Discovery,
    Persistence,
    Internal,
}

/// A structured failure carried inside a reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
}

impl From<WireError> for BankError {
    /// Rebuild a typed error on the receiving side. Structured fields that are
    /// not carried on the wire are left empty; the message is preserved.
    fn from(wire: WireError) -> Self {
        match wire.kind {
            ErrorKind::Auth => BankError::Auth,
            ErrorKind::AccountLocked => BankError::AccountLocked {
                account: String::new(),
                reason: wire.lock_reason.unwrap_or(wire.message),
                locked_at: wire.locked_at,
            },
            ErrorKind::SessionConflict => BankError::SessionConflict {
                account: String::new(),
            },
            ErrorKind::SessionInvalid => BankError::SessionInvalid {
                reason: wire.message,
            },
            ErrorKind::InsufficientFunds => BankError::InsufficientFunds {
                account: String::new(),
                requested: Money::ZERO,
                available: Money::ZERO,
            },
            ErrorKind::Validation => BankError::Validation(wire.message),
            ErrorKind::NotFound => BankError::NotFound {
                kind: "record".to_string(),
                id: wire.message,
            },
            ErrorKind::Conflict => BankError::Conflict(wire.message),
            ErrorKind::Timeout => BankError::Timeout(wire.message),
            ErrorKind::Decryption => BankError::Decryption,
            ErrorKind::Discovery => BankError::Discovery(wire.message),
            ErrorKind::Persistence => BankError::Persistence(wire.message),
            ErrorKind::Internal => BankError::Internal(wire.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_kinds() {
        let err = BankError::InsufficientFunds {
            account: "alice".to_string(),
            requested: dec!(100),
            available: dec!(50),
        };
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
        assert!(!err.is_retriable());
        assert!(BankError::Timeout("ledger".into()).is_retriable());
    }

    #[test]
    fn test_locked_error_survives_the_wire() {
        let at = Utc::now();
        let err = BankError::AccountLocked {
            account: "bob".to_string(),
            reason: "Loan delinquency".to_string(),
            locked_at: Some(at),
        };
        let json = serde_json::to_string(&err.to_wire()).unwrap();
        let wire: WireError = serde_json::from_str(&json).unwrap();
        match BankError::from(wire) {
            BankError::AccountLocked {
                reason, locked_at, ..
            } => {
                assert_eq!(reason, "Loan delinquency");
                assert_eq!(locked_at, Some(at));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
