//! Inbound loop for a backend service

use std::sync::Arc;

use meshbank_crypto::PublicKey;
use meshbank_protocol::{ports, Ping, Reply, RequestBody, WireMessage};
use meshbank_transport::{Broadcast, Frame, FrameReceiver, NodeId};
use meshbank_types::{BankError, CorrelationId, ServiceKind};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::{Handler, KeyRing, KeyScope, RequestContext};

/// Runs one service on the broadcast channel
pub struct ServiceHost {
    node: NodeId,
    service: ServiceKind,
    keys: KeyRing,
    net: Arc<dyn Broadcast>,
    handler: Arc<dyn Handler>,
    trusted_pingers: Vec<PublicKey>,
}

impl ServiceHost {
    pub fn new(
        node: NodeId,
        service: ServiceKind,
        keys: KeyRing,
        net: Arc<dyn Broadcast>,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            node,
            service,
            keys,
            net,
            handler,
            trusted_pingers: Vec::new(),
        }
    }

    /// Only answer pings signed by one of these keys. Empty means any valid
    /// signature.
    pub fn with_trusted_pingers(mut self, keys: Vec<PublicKey>) -> Self {
        self.trusted_pingers = keys;
        self
    }

    /// Run on a background task until `shutdown` flips
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        // Subscribe before returning so no frame sent afterwards is missed
        let frames = self.net.subscribe();
        tokio::spawn(self.serve(frames, shutdown))
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let frames = self.net.subscribe();
        self.serve(frames, shutdown).await
    }

    async fn serve(self, mut frames: FrameReceiver, mut shutdown: watch::Receiver<bool>) {
        let port = ports::for_service(self.service);
        let mut tasks = JoinSet::new();

        tracing::info!(node = %self.node, service = %self.service, port, "Service host started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                frame = frames.recv() => {
                    let Some(frame) = frame else { break };
                    if frame.is_for(&self.node, port) {
                        self.dispatch(frame, &mut tasks);
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(node = %self.node, error = %e, "Request task failed");
                    }
                }
            }
        }

        tasks.abort_all();
        tracing::info!(node = %self.node, service = %self.service, "Service host stopped");
    }

    fn dispatch(&self, frame: Frame, tasks: &mut JoinSet<()>) {
        let Some((scope, message)) = self.keys.open(&frame.payload) else {
            tracing::debug!(node = %self.node, from = %frame.sender, "Ignoring frame no key opens");
            return;
        };

        match message {
            WireMessage::Ping(ping) => self.answer_ping(&frame.sender, scope, ping),
            WireMessage::Request { id, origin, body } => {
                let ctx = RequestContext {
                    id,
                    sender: frame.sender,
                    origin,
                    scope,
                };
                let worker = Worker {
                    node: self.node.clone(),
                    service: self.service,
                    keys: self.keys.clone(),
                    net: Arc::clone(&self.net),
                    handler: Arc::clone(&self.handler),
                };
                tasks.spawn(worker.serve(ctx, body));
            }
            WireMessage::Pong { .. } | WireMessage::Response { .. } => {
                tracing::debug!(node = %self.node, "Ignoring reply-side message on service port");
            }
        }
    }

    fn answer_ping(&self, from: &NodeId, scope: KeyScope, ping: Ping) {
        if ping.service != self.service {
            return;
        }
        if !ping.verify() {
            tracing::warn!(node = %self.node, from = %from, "Rejected ping with bad signature");
            return;
        }
        if !self.trusted_pingers.is_empty() {
            let signer = ping.signature.as_ref().map(|s| &s.public_key);
            if !signer.map_or(false, |k| self.trusted_pingers.contains(k)) {
                tracing::warn!(node = %self.node, from = %from, "Rejected ping from untrusted node");
                return;
            }
        }

        let pong = WireMessage::Pong {
            service: self.service,
            nonce: ping.nonce,
        };
        send_sealed(&self.keys, scope, &*self.net, &self.node, from, &pong);
    }
}

struct Worker {
    node: NodeId,
    service: ServiceKind,
    keys: KeyRing,
    net: Arc<dyn Broadcast>,
    handler: Arc<dyn Handler>,
}

impl Worker {
    async fn serve(self, ctx: RequestContext, body: RequestBody) {
        let id: CorrelationId = ctx.id.clone();
        let sender = ctx.sender.clone();
        let scope = ctx.scope;
        let command = body.command();

        let reply = if body.target() != self.service {
            Reply::failure(&BankError::validation(format!(
                "{command} is not a {} command",
                self.service
            )))
        } else {
            self.handler.handle(ctx, body).await
        };

        tracing::debug!(
            node = %self.node,
            request_id = %id,
            command,
            ok = reply.is_ok(),
            "Request handled"
        );

        let response = WireMessage::Response { id, reply };
        send_sealed(&self.keys, scope, &*self.net, &self.node, &sender, &response);
    }
}

/// Seal `message` under the key of `scope` and address it to `to`
fn send_sealed(
    keys: &KeyRing,
    scope: KeyScope,
    net: &dyn Broadcast,
    from: &NodeId,
    to: &NodeId,
    message: &WireMessage,
) {
    let Some(key) = keys.key_for(scope) else {
        return;
    };
    let payload = match meshbank_protocol::seal(key, message) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(node = %from, error = %e, "Failed to seal reply");
            return;
        }
    };
    if let Err(e) = net.send(Frame::to_node(from.clone(), to.clone(), ports::CLIENT, payload)) {
        tracing::warn!(node = %from, to = %to, error = %e, "Failed to send reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use meshbank_crypto::KeyPair;
    use meshbank_protocol::{LedgerRequest, LoanRequest, ReplyData};
    use meshbank_transport::MemoryBroadcast;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn handle(&self, ctx: RequestContext, body: RequestBody) -> Reply {
            Reply::ack(format!("{}:{:?}", body.command(), ctx.scope))
        }
    }

    async fn next_reply(rx: &mut FrameReceiver, keys: &KeyRing, me: &NodeId) -> WireMessage {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if frame.is_for(me, ports::CLIENT) {
                return keys.open(&frame.payload).unwrap().1;
            }
        }
    }

    fn start(net: &MemoryBroadcast, keys: KeyRing) -> watch::Sender<bool> {
        let (tx, rx) = watch::channel(false);
        ServiceHost::new(
            NodeId::new("ledger"),
            ServiceKind::Ledger,
            keys,
            Arc::new(net.clone()),
            Arc::new(Echo),
        )
        .spawn(rx);
        tx
    }

    #[tokio::test]
    async fn test_request_is_answered_under_the_same_key() {
        let net = MemoryBroadcast::default();
        let keys = KeyRing::from_secrets("net", Some("svc"));
        let _stop = start(&net, keys.clone());

        let me = NodeId::new("loan");
        let mut rx = net.subscribe();
        let id = CorrelationId::new();
        let request = WireMessage::Request {
            id: id.clone(),
            origin: None,
            body: RequestBody::Ledger(LedgerRequest::Balance { token: "t".into() }),
        };
        let payload = meshbank_protocol::seal(keys.key_for(KeyScope::Service).unwrap(), &request).unwrap();
        net.send(Frame::to_node(me.clone(), NodeId::new("ledger"), ports::LEDGER, payload))
            .unwrap();

        match next_reply(&mut rx, &keys, &me).await {
            WireMessage::Response { id: got, reply } => {
                assert_eq!(got, id);
                match reply.into_result().unwrap() {
                    ReplyData::Ack { message } => assert_eq!(message, "balance:Service"),
                    other => panic!("unexpected {other:?}"),
                }
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wrong_service_request_is_rejected() {
        let net = MemoryBroadcast::default();
        let keys = KeyRing::from_secrets("net", None);
        let _stop = start(&net, keys.clone());

        let me = NodeId::new("relay");
        let mut rx = net.subscribe();
        let request = WireMessage::Request {
            id: CorrelationId::new(),
            origin: Some("link".into()),
            body: RequestBody::Loan(LoanRequest::Loans { token: "t".into() }),
        };
        let payload = meshbank_protocol::seal(keys.key_for(KeyScope::Network).unwrap(), &request).unwrap();
        net.send(Frame::to_all(me.clone(), ports::LEDGER, payload)).unwrap();

        match next_reply(&mut rx, &keys, &me).await {
            WireMessage::Response { reply, .. } => assert!(!reply.is_ok()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_signed_ping_gets_pong_and_forged_ping_does_not() {
        let net = MemoryBroadcast::default();
        let keys = KeyRing::from_secrets("net", None);
        let _stop = start(&net, keys.clone());

        let me = NodeId::new("relay");
        let mut rx = net.subscribe();
        let key = keys.key_for(KeyScope::Network).unwrap();

        let mut forged = Ping::new(ServiceKind::Ledger, 1).signed(&KeyPair::generate()).unwrap();
        forged.nonce = 2;
        let payload = meshbank_protocol::seal(key, &WireMessage::Ping(forged)).unwrap();
        net.send(Frame::to_all(me.clone(), ports::LEDGER, payload)).unwrap();

        let good = Ping::new(ServiceKind::Ledger, 3).signed(&KeyPair::generate()).unwrap();
        let payload = meshbank_protocol::seal(key, &WireMessage::Ping(good)).unwrap();
        net.send(Frame::to_all(me.clone(), ports::LEDGER, payload)).unwrap();

        match next_reply(&mut rx, &keys, &me).await {
            WireMessage::Pong { service, nonce } => {
                assert_eq!(service, ServiceKind::Ledger);
                assert_eq!(nonce, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
