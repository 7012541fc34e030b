//! Signed ping/pong discovery with a per-service upstream cache

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use meshbank_crypto::{KeyPair, SymmetricKey};
use meshbank_protocol::{ports, Ping, WireMessage};
use meshbank_transport::{Broadcast, Frame, NodeId};
use meshbank_types::{BankError, ServiceKind};
use tokio::sync::oneshot;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Upstream {
    node: NodeId,
    seen: Instant,
}

/// Tracks which node currently answers for each service kind
pub struct Discovery {
    node: NodeId,
    signer: KeyPair,
    key: SymmetricKey,
    ttl: Duration,
    timeout: Duration,
    upstreams: DashMap<ServiceKind, Upstream>,
    waiters: DashMap<u64, oneshot::Sender<NodeId>>,
    nonce: AtomicU64,
}

impl Discovery {
    /// `key` seals outgoing pings; `ttl` bounds how long an answer is trusted
    /// and `timeout` how long [`resolve`](Self::resolve) waits for one.
    pub fn new(
        node: NodeId,
        signer: KeyPair,
        key: SymmetricKey,
        ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            node,
            signer,
            key,
            ttl,
            timeout,
            upstreams: DashMap::new(),
            waiters: DashMap::new(),
            nonce: AtomicU64::new(1),
        }
    }

    /// Fresh cached upstream for `service`
    pub fn cached(&self, service: ServiceKind) -> Option<NodeId> {
        let entry = self.upstreams.get(&service)?;
        if entry.seen.elapsed() <= self.ttl {
            Some(entry.node.clone())
        } else {
            None
        }
    }

    /// Every non-expired upstream
    pub fn known(&self) -> Vec<(ServiceKind, NodeId)> {
        self.upstreams
            .iter()
            .filter(|e| e.seen.elapsed() <= self.ttl)
            .map(|e| (*e.key(), e.node.clone()))
            .collect()
    }

    /// Drop the cached upstream, e.g. after it stopped answering
    pub fn forget(&self, service: ServiceKind) {
        if self.upstreams.remove(&service).is_some() {
            tracing::info!(node = %self.node, %service, "Forgot upstream");
        }
    }

    /// Broadcast a signed ping for `service`. Returns the nonce used.
    pub fn ping(&self, net: &dyn Broadcast, service: ServiceKind) -> Result<u64, BankError> {
        let nonce = self.nonce.fetch_add(1, Ordering::Relaxed);
        self.send_ping(net, service, nonce)?;
        Ok(nonce)
    }

    fn send_ping(&self, net: &dyn Broadcast, service: ServiceKind, nonce: u64) -> Result<(), BankError> {
        let ping = Ping::new(service, nonce)
            .signed(&self.signer)
            .map_err(|e| BankError::Internal(e.to_string()))?;
        let payload = meshbank_protocol::seal(&self.key, &WireMessage::Ping(ping))
            .map_err(|e| BankError::Internal(e.to_string()))?;
        net.send(Frame::to_all(
            self.node.clone(),
            ports::for_service(service),
            payload,
        ))
        .map_err(|e| BankError::Discovery(format!("{service}: {e}")))?;
        tracing::debug!(node = %self.node, %service, nonce, "Discovery ping sent");
        Ok(())
    }

    /// Cached upstream, or ping and wait for the first answer
    pub async fn resolve(&self, net: &dyn Broadcast, service: ServiceKind) -> Result<NodeId, BankError> {
        if let Some(node) = self.cached(service) {
            return Ok(node);
        }

        let nonce = self.nonce.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(nonce, tx);

        if let Err(e) = self.send_ping(net, service, nonce) {
            self.waiters.remove(&nonce);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(node)) => Ok(node),
            _ => {
                self.waiters.remove(&nonce);
                tracing::warn!(node = %self.node, %service, "Discovery timed out");
                Err(BankError::Discovery(service.to_string()))
            }
        }
    }

    /// Record an answer. Unsolicited pongs from periodic pings refresh the
    /// cache too.
    pub fn on_pong(&self, from: NodeId, service: ServiceKind, nonce: u64) {
        let previous = self.upstreams.insert(
            service,
            Upstream {
                node: from.clone(),
                seen: Instant::now(),
            },
        );
        if previous.as_ref().map_or(true, |p| p.node != from) {
            tracing::info!(node = %self.node, %service, upstream = %from, "Upstream discovered");
        }
        if let Some((_, waiter)) = self.waiters.remove(&nonce) {
            let _ = waiter.send(from);
        }
    }
}
