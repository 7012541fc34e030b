//! Hashing utilities for MeshBank

use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of data
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute SHA-256 hash and return as hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Compute hash of multiple items
pub fn hash_all(items: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for item in items {
        hasher.update(item);
    }
    hasher.finalize().into()
}

/// Derive 32 bytes of key material from a shared passphrase.
///
/// The `context` label separates keys derived from the same passphrase for
/// different purposes (network traffic, service traffic, storage).
pub fn derive_key_bytes(passphrase: &str, context: &str) -> [u8; 32] {
    hash_all(&[b"meshbank/v1/", context.as_bytes(), b"/", passphrase.as_bytes()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_derive_key_context_separation() {
        let a = derive_key_bytes("secret", "network");
        let b = derive_key_bytes("secret", "service");
        let c = derive_key_bytes("secret", "network");
        assert_ne!(a, b);
        assert_eq!(a, c);
    }
}
