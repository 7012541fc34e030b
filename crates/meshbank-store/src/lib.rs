//! MeshBank Store - how services keep their state across restarts
//!
//! Each service serializes its full in-memory state, one blob per logical
//! dataset, after every mutating operation. Blobs may be sealed with a
//! storage key. Admin and balance-affecting actions are also written to a
//! separate plain-text audit log.
//!
//! Services depend on the [`BlobStore`] and [`AuditLog`] traits so tests can
//! swap in [`MemoryStore`] and [`MemoryAuditLog`].

pub mod audit;
pub mod blob;

pub use audit::*;
pub use blob::*;

use meshbank_types::BankError;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Dataset {0} could not be decrypted with the configured storage key")]
    Decryption(String),

    #[error("Encryption error: {0}")]
    Encryption(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for BankError {
    fn from(err: StoreError) -> Self {
        BankError::Persistence(err.to_string())
    }
}
