//! Symmetric envelopes for the broadcast segment
//!
//! Wire format: `base64(iv || ciphertext || tag)` with a fresh random 96-bit
//! IV per message and AES-256-GCM as the cipher.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::{derive_key_bytes, CryptoError, CryptoResult};

/// Length of the random IV prepended to every ciphertext
pub const IV_LEN: usize = 12;

/// AES-GCM authentication tag length
const TAG_LEN: usize = 16;

/// A shared 256-bit key
#[derive(Clone)]
pub struct SymmetricKey {
    bytes: Zeroizing<[u8; 32]>,
}

impl SymmetricKey {
    /// Use raw key bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    /// Derive a key from a shared passphrase and a purpose label
    pub fn from_passphrase(passphrase: &str, context: &str) -> Self {
        Self::from_bytes(derive_key_bytes(passphrase, context))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.bytes[..]))
    }

    /// Encrypt and encode for the wire
    pub fn seal(&self, plaintext: &[u8]) -> CryptoResult<String> {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let ciphertext = self
            .cipher()
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut framed = Vec::with_capacity(IV_LEN + ciphertext.len());
        framed.extend_from_slice(&iv);
        framed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(framed))
    }

    /// Decode and decrypt a wire payload
    pub fn open(&self, encoded: &str) -> CryptoResult<Vec<u8>> {
        let framed = STANDARD
            .decode(encoded.trim())
            .map_err(|_| CryptoError::Decryption)?;
        if framed.len() < IV_LEN + TAG_LEN {
            return Err(CryptoError::Decryption);
        }

        let (iv, ciphertext) = framed.split_at(IV_LEN);
        self.cipher()
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|_| CryptoError::Decryption)
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Try each candidate key in order.
///
/// Returns the index of the key that opened the payload together with the
/// plaintext, or `None` when no key fits.
pub fn open_with_any(keys: &[&SymmetricKey], encoded: &str) -> Option<(usize, Vec<u8>)> {
    keys.iter()
        .enumerate()
        .find_map(|(idx, key)| key.open(encoded).ok().map(|plain| (idx, plain)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(label: &str) -> SymmetricKey {
        SymmetricKey::from_passphrase("correct horse", label)
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let k = key("network");
        let messages: [&[u8]; 4] = [b"", b"{}", b"{\"type\":\"ping\"}", &[0u8; 4096]];
        for message in messages {
            let sealed = k.seal(message).unwrap();
            assert_eq!(k.open(&sealed).unwrap(), message);
        }
    }

    #[test]
    fn test_fresh_iv_per_message() {
        let k = key("network");
        assert_ne!(k.seal(b"same").unwrap(), k.seal(b"same").unwrap());
    }

    #[test]
    fn test_wrong_key_fails_without_panic() {
        let sealed = key("network").seal(b"balance request").unwrap();
        assert!(matches!(key("service").open(&sealed), Err(CryptoError::Decryption)));
    }

    #[test]
    fn test_garbage_fails_without_panic() {
        let k = key("network");
        for garbage in ["", "not base64 at all!!", "AAAA", "{\"type\":\"request\"}"] {
            assert!(matches!(k.open(garbage), Err(CryptoError::Decryption)));
        }
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let k = key("network");
        let sealed = k.seal(b"transfer 300").unwrap();
        let mut raw = STANDARD.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        assert!(k.open(&STANDARD.encode(raw)).is_err());
    }

    #[test]
    fn test_open_with_any_reports_matching_key() {
        let network = key("network");
        let service = key("service");
        let sealed = service.seal(b"rpc").unwrap();

        let (idx, plain) = open_with_any(&[&network, &service], &sealed).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(plain, b"rpc");
        assert!(open_with_any(&[&network], &sealed).is_none());
    }
}
