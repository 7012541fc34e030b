//! MeshBank Protocol - every message that crosses a link or the broadcast channel
//!
//! # Segments
//!
//! ```text
//! client ──(LinkFrame, plaintext JSON)──▶ relay ──(Frame{payload = sealed WireMessage})──▶ service
//!        ◀────────────────────────────────       ◀──────────────────────────────────────────
//! ```
//!
//! Commands are closed enums: adding a command is a compile-checked change to
//! every handler's `match`.

pub mod dto;
pub mod messages;
pub mod reply;
pub mod requests;

pub use dto::*;
pub use messages::*;
pub use reply::*;
pub use requests::*;

use meshbank_crypto::{open_with_any, SymmetricKey};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Fixed port numbers on the shared broadcast channel
pub mod ports {
    use meshbank_types::ServiceKind;

    /// Replies travelling back toward relays
    pub const CLIENT: u16 = 1400;
    /// Ledger service traffic
    pub const LEDGER: u16 = 1401;
    /// Loan service traffic
    pub const LOAN: u16 = 1402;

    /// Port a service listens on
    pub fn for_service(service: ServiceKind) -> u16 {
        match service {
            ServiceKind::Ledger => LEDGER,
            ServiceKind::Loan => LOAN,
        }
    }
}

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Envelope error: {0}")]
    Envelope(#[from] meshbank_crypto::CryptoError),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Encode a message as JSON text
pub fn encode<T: Serialize>(message: &T) -> ProtocolResult<String> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a message from JSON text
pub fn decode<T: DeserializeOwned>(text: &str) -> ProtocolResult<T> {
    Ok(serde_json::from_str(text)?)
}

/// Encode and seal a broadcast message
pub fn seal(key: &SymmetricKey, message: &WireMessage) -> ProtocolResult<String> {
    let json = serde_json::to_vec(message)?;
    Ok(key.seal(&json)?)
}

/// Open a broadcast payload with the first candidate key that fits.
///
/// Returns the index of the matching key and the decoded message. A payload
/// that no key opens, or that opens but is not a valid message, yields
/// `None`: it is simply not addressed to this protocol.
pub fn open(keys: &[&SymmetricKey], payload: &str) -> Option<(usize, WireMessage)> {
    let (idx, plain) = open_with_any(keys, payload)?;
    serde_json::from_slice(&plain).ok().map(|msg| (idx, msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshbank_types::{CorrelationId, ServiceKind};

    #[test]
    fn test_sealed_message_opens_with_matching_key() {
        let network = SymmetricKey::from_passphrase("pw", "network");
        let service = SymmetricKey::from_passphrase("pw", "service");
        let msg = WireMessage::Pong {
            service: ServiceKind::Ledger,
            nonce: 9,
        };

        let sealed = seal(&service, &msg).unwrap();
        let (idx, opened) = open(&[&network, &service], &sealed).unwrap();
        assert_eq!(idx, 1);
        assert!(matches!(opened, WireMessage::Pong { nonce: 9, .. }));
    }

    #[test]
    fn test_garbage_payload_is_not_ours() {
        let network = SymmetricKey::from_passphrase("pw", "network");
        assert!(open(&[&network], "definitely-not-a-frame").is_none());

        let plaintext = encode(&WireMessage::Response {
            id: CorrelationId::new(),
            reply: Reply::ack("ok"),
        })
        .unwrap();
        assert!(open(&[&network], &plaintext).is_none());
    }

    #[test]
    fn test_port_mapping() {
        assert_eq!(ports::for_service(ServiceKind::Ledger), ports::LEDGER);
        assert_eq!(ports::for_service(ServiceKind::Loan), ports::LOAN);
    }
}
