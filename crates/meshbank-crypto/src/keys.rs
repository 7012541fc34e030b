//! Node key pairs for MeshBank
//!
//! Every relay holds an Ed25519 key pair and signs its discovery pings with
//! it; services check the signature and, when configured, that the signer is
//! a trusted relay.

use crate::{derive_key_bytes, CryptoError, CryptoResult};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// A key pair for signing operations
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        let verifying_key = signing_key.verifying_key();

        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Create from existing signing key bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(bytes);
        let verifying_key = signing_key.verifying_key();

        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Deterministic key pair for a node, derived from a configured seed phrase
    pub fn from_seed_phrase(seed: &str) -> Self {
        Self::from_bytes(&derive_key_bytes(seed, "node-identity"))
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Get the verifying key (public)
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Get the public key as hex string
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key.as_bytes())
    }

    /// Public half, safe to put on the wire
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.public_key_hex())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

/// Hex-encoded Ed25519 public key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub String);

impl PublicKey {
    /// Parse the verifying key
    pub fn to_verifying_key(&self) -> CryptoResult<VerifyingKey> {
        let bytes =
            hex::decode(&self.0).map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))?;

        let key_bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidKeyFormat("Public key must be 32 bytes".to_string())
        })?;

        VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let keypair = KeyPair::generate();
        assert_eq!(keypair.public_key_hex().len(), 64); // 32 bytes = 64 hex chars
    }

    #[test]
    fn test_seed_phrase_is_deterministic() {
        let a = KeyPair::from_seed_phrase("relay-north");
        let b = KeyPair::from_seed_phrase("relay-north");
        let c = KeyPair::from_seed_phrase("relay-south");
        assert_eq!(a.public_key(), b.public_key());
        assert_ne!(a.public_key(), c.public_key());
    }

    #[test]
    fn test_public_key_roundtrip() {
        let keypair = KeyPair::generate();
        let verifying = keypair.public_key().to_verifying_key().unwrap();
        assert_eq!(keypair.verifying_key(), &verifying);
    }

    #[test]
    fn test_bad_public_key_rejected() {
        assert!(PublicKey("zz".into()).to_verifying_key().is_err());
        assert!(PublicKey("abcd".into()).to_verifying_key().is_err());
    }
}
