//! MeshBank Ledger - the authoritative owner of accounts and balances
//!
//! The ledger is:
//! - Name-keyed (an account is identified by its unique username)
//! - Session-gated (client commands carry an opaque login token)
//! - Idempotent on the inter-service surface (every balance mutation carries
//!   an operation id; a repeated id returns the original outcome)
//! - Persisted after every mutating operation
//!
//! # Invariants
//!
//! 1. Transfers conserve money: `from' + to' == from + to`
//! 2. At most one live session per account
//! 3. Locking an account tears down its session immediately
//! 4. Inter-service calls are only honoured under the service key

pub mod account;
pub mod config;
pub mod handler;
pub mod password;
pub mod service;
pub mod session;

pub use account::*;
pub use config::*;
pub use handler::LedgerHandler;
pub use password::PasswordService;
pub use service::LedgerService;
pub use session::{Session, SessionTable};

/// Dataset name of the persisted account snapshot
pub const ACCOUNTS_DATASET: &str = "accounts";
