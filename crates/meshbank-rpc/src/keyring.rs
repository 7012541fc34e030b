//! Candidate keys for the broadcast segment

use meshbank_crypto::SymmetricKey;
use meshbank_protocol::WireMessage;

/// Which shared key opened a message.
///
/// The scope decides which request surface is reachable: inter-service calls
/// are only honoured under [`KeyScope::Service`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScope {
    /// Relay to service traffic
    Network,
    /// Service to service traffic
    Service,
}

/// The keys a node may use on the broadcast channel
#[derive(Debug, Clone)]
pub struct KeyRing {
    network: SymmetricKey,
    service: Option<SymmetricKey>,
}

impl KeyRing {
    pub fn new(network: SymmetricKey, service: Option<SymmetricKey>) -> Self {
        Self { network, service }
    }

    /// Derive both keys from shared secrets
    pub fn from_secrets(network_secret: &str, service_secret: Option<&str>) -> Self {
        Self::new(
            SymmetricKey::from_passphrase(network_secret, "network"),
            service_secret.map(|s| SymmetricKey::from_passphrase(s, "service")),
        )
    }

    pub fn key_for(&self, scope: KeyScope) -> Option<&SymmetricKey> {
        match scope {
            KeyScope::Network => Some(&self.network),
            KeyScope::Service => self.service.as_ref(),
        }
    }

    /// Try the network key first, then the service key
    pub fn open(&self, payload: &str) -> Option<(KeyScope, WireMessage)> {
        let mut candidates = vec![&self.network];
        if let Some(service) = &self.service {
            candidates.push(service);
        }
        let (idx, message) = meshbank_protocol::open(&candidates, payload)?;
        let scope = if idx == 0 {
            KeyScope::Network
        } else {
            KeyScope::Service
        };
        Some((scope, message))
    }
}
