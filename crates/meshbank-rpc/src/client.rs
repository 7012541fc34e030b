//! Correlated request/reply client for service-to-service calls

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use meshbank_crypto::{KeyPair, SymmetricKey};
use meshbank_protocol::{ports, Reply, ReplyData, RequestBody, WireMessage};
use meshbank_transport::{Broadcast, Frame, FrameReceiver, NodeId};
use meshbank_types::{BankError, CorrelationId, ServiceKind};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};

use crate::{Call, Discovery};

/// Client tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcClientConfig {
    /// Bounded wait for one reply
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Bounded wait for a pong during inline discovery
    #[serde(with = "humantime_serde")]
    pub discovery_timeout: Duration,
    /// How long a discovered upstream is trusted without a fresh pong
    #[serde(with = "humantime_serde")]
    pub upstream_ttl: Duration,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            discovery_timeout: Duration::from_secs(2),
            upstream_ttl: Duration::from_secs(60),
        }
    }
}

struct Inner {
    node: NodeId,
    target: ServiceKind,
    key: SymmetricKey,
    net: Arc<dyn Broadcast>,
    discovery: Discovery,
    pending: DashMap<CorrelationId, oneshot::Sender<Reply>>,
    request_timeout: Duration,
}

/// Calls one target service over the broadcast channel.
///
/// A timeout is a definite failure for the caller; whether the remote side
/// applied the request is unknown.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

impl RpcClient {
    /// Subscribe to replies and start the reader task
    pub fn spawn(
        node: NodeId,
        target: ServiceKind,
        key: SymmetricKey,
        signer: KeyPair,
        net: Arc<dyn Broadcast>,
        config: RpcClientConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let discovery = Discovery::new(
            node.clone(),
            signer,
            key.clone(),
            config.upstream_ttl,
            config.discovery_timeout,
        );
        let inner = Arc::new(Inner {
            node,
            target,
            key,
            net: Arc::clone(&net),
            discovery,
            pending: DashMap::new(),
            request_timeout: config.request_timeout,
        });

        let frames = net.subscribe();
        tokio::spawn(read_replies(Arc::clone(&inner), frames, shutdown));

        Self { inner }
    }

    pub fn node(&self) -> &NodeId {
        &self.inner.node
    }

    /// Upstream currently cached for the target service
    pub fn upstream(&self) -> Option<NodeId> {
        self.inner.discovery.cached(self.inner.target)
    }

    /// Send `body` and wait for its reply
    pub async fn request(&self, body: RequestBody) -> Result<Reply, BankError> {
        let inner = &self.inner;
        let upstream = inner.discovery.resolve(&*inner.net, inner.target).await?;

        let id = CorrelationId::new();
        let command = body.command();
        let message = WireMessage::Request {
            id: id.clone(),
            origin: None,
            body,
        };
        let payload = meshbank_protocol::seal(&inner.key, &message)
            .map_err(|e| BankError::Internal(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        inner.pending.insert(id.clone(), tx);

        let frame = Frame::to_node(
            inner.node.clone(),
            upstream.clone(),
            ports::for_service(inner.target),
            payload,
        );
        if let Err(e) = inner.net.send(frame) {
            inner.pending.remove(&id);
            return Err(BankError::Internal(e.to_string()));
        }

        match tokio::time::timeout(inner.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(BankError::Internal("reply channel dropped".to_string())),
            Err(_) => {
                inner.pending.remove(&id);
                inner.discovery.forget(inner.target);
                tracing::warn!(
                    node = %inner.node,
                    upstream = %upstream,
                    request_id = %id,
                    command,
                    "RPC timed out"
                );
                Err(BankError::Timeout(format!("{} reply to {command}", inner.target)))
            }
        }
    }
}

#[async_trait]
impl Call for RpcClient {
    async fn call(&self, body: RequestBody) -> Result<ReplyData, BankError> {
        self.request(body).await?.into_result()
    }
}

async fn read_replies(inner: Arc<Inner>, mut frames: FrameReceiver, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                if !frame.is_for(&inner.node, ports::CLIENT) {
                    continue;
                }
                let Some((_, message)) = meshbank_protocol::open(&[&inner.key], &frame.payload) else {
                    continue;
                };
                match message {
                    WireMessage::Pong { service, nonce } => {
                        inner.discovery.on_pong(frame.sender, service, nonce);
                    }
                    WireMessage::Response { id, reply } => {
                        match inner.pending.remove(&id) {
                            Some((_, waiter)) => {
                                let _ = waiter.send(reply);
                            }
                            None => {
                                tracing::debug!(node = %inner.node, request_id = %id, "Late or unknown reply dropped");
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    tracing::debug!(node = %inner.node, "RPC reader stopped");
}
