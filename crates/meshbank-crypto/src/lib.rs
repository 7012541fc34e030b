//! MeshBank Crypto - Cryptographic primitives for the relay network
//!
//! This crate provides:
//! - Symmetric envelopes (AES-256-GCM, random IV prepended, base64 on the wire)
//! - Passphrase key derivation (SHA-256)
//! - Node key pairs and Ed25519 signatures for discovery pings
//!
//! # Wire Invariant
//!
//! **Opening an envelope never panics.** Garbage, truncated input, or a
//! ciphertext sealed under another key all yield `CryptoError::Decryption`,
//! so a receiver can try several candidate keys against the same payload.

pub mod keys;
pub mod signature;
pub mod hash;
pub mod envelope;

pub use keys::*;
pub use signature::*;
pub use hash::*;
pub use envelope::*;

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed")]
    Decryption,

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
