//! Envelope contents for both network segments

use chrono::{DateTime, Utc};
use meshbank_crypto::{KeyPair, Signable, Signature};
use meshbank_types::{CorrelationId, LinkRole, ServiceKind};
use serde::{Deserialize, Serialize};

use crate::reply::Reply;
use crate::requests::RequestBody;

/// Discovery probe for a backend service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub service: ServiceKind,
    pub nonce: u64,
    pub sent_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

impl Ping {
    pub fn new(service: ServiceKind, nonce: u64) -> Self {
        Self {
            service,
            nonce,
            sent_at: Utc::now(),
            signature: None,
        }
    }

    /// Attach a signature from the sending node
    pub fn signed(mut self, keypair: &KeyPair) -> meshbank_crypto::CryptoResult<Self> {
        self.signature = Some(meshbank_crypto::sign(keypair, &self)?);
        Ok(self)
    }

    /// Check the signature. Unsigned pings never verify.
    pub fn verify(&self) -> bool {
        match &self.signature {
            Some(sig) => meshbank_crypto::verify(sig, self).unwrap_or(false),
            None => false,
        }
    }
}

impl Signable for Ping {
    fn signable_bytes(&self) -> Vec<u8> {
        format!(
            "meshbank-ping:{}:{}:{}",
            self.service,
            self.nonce,
            self.sent_at.timestamp_millis()
        )
        .into_bytes()
    }
}

/// Message sealed inside a broadcast frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    Ping(Ping),
    Pong {
        service: ServiceKind,
        nonce: u64,
    },
    Request {
        id: CorrelationId,
        /// Label of the originating client link, for audit only
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<String>,
        body: RequestBody,
    },
    Response {
        id: CorrelationId,
        reply: Reply,
    },
}

/// Plaintext frame on a private client link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkFrame {
    Register {
        role: LinkRole,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    Deregister,
    Request {
        id: CorrelationId,
        body: RequestBody,
    },
    Response {
        id: CorrelationId,
        reply: Reply,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requests::LedgerRequest;

    #[test]
    fn test_signed_ping_verifies() {
        let keys = KeyPair::generate();
        let ping = Ping::new(ServiceKind::Loan, 7).signed(&keys).unwrap();
        assert!(ping.verify());

        let mut forged = ping.clone();
        forged.nonce = 8;
        assert!(!forged.verify());

        assert!(!Ping::new(ServiceKind::Loan, 7).verify());
    }

    #[test]
    fn test_link_frame_shape() {
        let frame = LinkFrame::Request {
            id: CorrelationId::new(),
            body: RequestBody::Ledger(LedgerRequest::Balance {
                token: "t".into(),
            }),
        };
        let json: serde_json::Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "request");
        assert_eq!(json["body"]["service"], "ledger");
        assert_eq!(json["body"]["request"]["command"], "balance");

        let register: LinkFrame =
            serde_json::from_str(r#"{"type":"register","role":"bank_client"}"#).unwrap();
        assert_eq!(
            register,
            LinkFrame::Register {
                role: LinkRole::BankClient,
                label: None
            }
        );
    }
}
