//! The relay node

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use meshbank_crypto::{KeyPair, SymmetricKey};
use meshbank_protocol::{ports, LinkFrame, Reply, RequestBody, WireMessage};
use meshbank_rpc::Discovery;
use meshbank_transport::{Broadcast, Frame, FrameReceiver, LinkEnd, LinkSender, NodeId, PrivateLink};
use meshbank_types::{BankError, CorrelationId, LinkId, LinkRole, ServiceKind};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use crate::route::{Route, RouteInfo};
use crate::stats::{RelayStats, StatsSnapshot};
use crate::{RelayConfig, RelayError, RelayResult};

/// A request forwarded upstream and not yet answered
struct Pending {
    link: LinkId,
    reply_to: LinkSender,
    service: ServiceKind,
    command: &'static str,
    sent_at: Instant,
}

struct Inner {
    node: NodeId,
    key: SymmetricKey,
    net: Arc<dyn Broadcast>,
    discovery: Discovery,
    config: RelayConfig,
    routes: DashMap<LinkId, Route>,
    pending: DashMap<CorrelationId, Pending>,
    stats: RelayStats,
    accept_tx: mpsc::UnboundedSender<LinkEnd>,
    accept_rx: Mutex<Option<mpsc::UnboundedReceiver<LinkEnd>>>,
}

/// Forwards client requests to backend services and replies back.
///
/// Cheap to clone; all clones share one routing table.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<Inner>,
}

impl Relay {
    /// `key` is the network key shared with the backend services; `signer`
    /// signs discovery pings.
    pub fn new(
        node: NodeId,
        key: SymmetricKey,
        signer: KeyPair,
        net: Arc<dyn Broadcast>,
        config: RelayConfig,
    ) -> Self {
        let discovery = Discovery::new(
            node.clone(),
            signer,
            key.clone(),
            config.upstream_ttl,
            config.discovery_timeout,
        );
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                node,
                key,
                net,
                discovery,
                config,
                routes: DashMap::new(),
                pending: DashMap::new(),
                stats: RelayStats::default(),
                accept_tx,
                accept_rx: Mutex::new(Some(accept_rx)),
            }),
        }
    }

    pub fn node(&self) -> &NodeId {
        &self.inner.node
    }

    /// Open a private link to this relay. The returned end belongs to the
    /// client; it must register before sending requests.
    pub fn connect(&self) -> RelayResult<LinkEnd> {
        let (client, relay_end) = PrivateLink::pair(self.inner.config.link_capacity);
        self.inner
            .accept_tx
            .send(relay_end)
            .map_err(|_| RelayError::Stopped)?;
        Ok(client)
    }

    /// Start the relay loop. Can only be called once.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> RelayResult<JoinHandle<()>> {
        let accept = self
            .inner
            .accept_rx
            .lock()
            .take()
            .ok_or(RelayError::AlreadyRunning)?;
        let frames = self.inner.net.subscribe();
        let inner = Arc::clone(&self.inner);
        Ok(tokio::spawn(inner.run(frames, accept, shutdown)))
    }

    pub fn routes(&self) -> Vec<RouteInfo> {
        self.inner
            .routes
            .iter()
            .map(|entry| entry.value().info(entry.key()))
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Services with a fresh upstream and the node answering for them
    pub fn upstreams(&self) -> Vec<(ServiceKind, NodeId)> {
        self.inner.discovery.known()
    }

    pub fn stats(&self) -> StatsSnapshot {
        let mut by_role: BTreeMap<String, usize> = BTreeMap::new();
        for route in self.inner.routes.iter() {
            *by_role.entry(route.role.to_string()).or_default() += 1;
        }
        self.inner.stats.snapshot(by_role, self.inner.pending.len())
    }

    /// Send discovery pings for every service kind now
    pub fn ping_all(&self) {
        self.inner.ping_all();
    }
}

impl Inner {
    async fn run(
        self: Arc<Self>,
        mut frames: FrameReceiver,
        mut accept: mpsc::UnboundedReceiver<LinkEnd>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut tasks = JoinSet::new();
        let mut ping = tokio::time::interval(self.config.ping_interval);
        let mut maintenance = tokio::time::interval(self.config.maintenance_interval);
        maintenance.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(node = %self.node, "Relay started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                link = accept.recv() => {
                    let Some(link) = link else { break };
                    tasks.spawn(Arc::clone(&self).serve_link(link));
                }
                frame = frames.recv() => {
                    let Some(frame) = frame else { break };
                    if frame.is_for(&self.node, ports::CLIENT) {
                        self.on_frame(frame, &mut tasks);
                    }
                }
                _ = ping.tick() => self.ping_all(),
                _ = maintenance.tick() => self.maintain(&mut tasks),
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        if !e.is_cancelled() {
                            tracing::error!(node = %self.node, error = %e, "Relay task failed");
                        }
                    }
                }
            }
        }

        tasks.abort_all();
        self.routes.clear();
        self.pending.clear();
        tracing::info!(node = %self.node, "Relay stopped");
    }

    fn ping_all(&self) {
        for service in ServiceKind::ALL {
            if let Err(e) = self.discovery.ping(&*self.net, service) {
                tracing::warn!(node = %self.node, %service, error = %e, "Discovery ping failed");
            }
        }
    }

    // ========================================================================
    // Service-facing side
    // ========================================================================

    fn on_frame(&self, frame: Frame, tasks: &mut JoinSet<()>) {
        let Some((_, message)) = meshbank_protocol::open(&[&self.key], &frame.payload) else {
            tracing::debug!(node = %self.node, from = %frame.sender, "Ignoring frame the network key does not open");
            return;
        };

        match message {
            WireMessage::Pong { service, nonce } => {
                self.discovery.on_pong(frame.sender, service, nonce);
            }
            WireMessage::Response { id, reply } => {
                let Some((_, pending)) = self.pending.remove(&id) else {
                    RelayStats::bump(&self.stats.dropped);
                    tracing::debug!(node = %self.node, request_id = %id, "Reply with no pending request dropped");
                    return;
                };
                tracing::debug!(
                    node = %self.node,
                    request_id = %id,
                    link = %pending.link,
                    command = pending.command,
                    ok = reply.is_ok(),
                    elapsed_ms = pending.sent_at.elapsed().as_millis() as u64,
                    "Reply routed"
                );
                RelayStats::bump(&self.stats.replied);
                tasks.spawn(deliver(pending.reply_to, LinkFrame::Response { id, reply }));
            }
            WireMessage::Ping(_) | WireMessage::Request { .. } => {}
        }
    }

    /// Expire unanswered requests and evict idle routes
    fn maintain(&self, tasks: &mut JoinSet<()>) {
        let timeout = self.config.request_timeout;
        let expired: Vec<CorrelationId> = self
            .pending
            .iter()
            .filter(|p| p.sent_at.elapsed() >= timeout)
            .map(|p| p.key().clone())
            .collect();

        for id in expired {
            let Some((_, pending)) = self.pending.remove(&id) else {
                continue;
            };
            self.discovery.forget(pending.service);
            RelayStats::bump(&self.stats.timed_out);
            tracing::warn!(
                node = %self.node,
                request_id = %id,
                link = %pending.link,
                service = %pending.service,
                command = pending.command,
                "Request timed out"
            );
            let err = BankError::Timeout(format!("{} reply to {}", pending.service, pending.command));
            tasks.spawn(deliver(
                pending.reply_to,
                LinkFrame::Response {
                    id,
                    reply: Reply::failure(&err),
                },
            ));
        }

        let idle = self.config.route_idle_timeout;
        let stale: Vec<LinkId> = self
            .routes
            .iter()
            .filter(|r| r.idle_for() >= idle)
            .map(|r| r.key().clone())
            .collect();
        for link in stale {
            if let Some((_, route)) = self.routes.remove(&link) {
                RelayStats::bump(&self.stats.evictions);
                tracing::info!(node = %self.node, link = %link, role = %route.role, "Evicted idle route");
            }
        }
    }

    // ========================================================================
    // Client-facing side
    // ========================================================================

    async fn serve_link(self: Arc<Self>, link: LinkEnd) {
        let (sender, mut receiver) = link.split();
        let link_id = sender.id().clone();
        // Held here until the link registers; then owned by its route, so
        // removing the route wakes `closed`.
        let (close_tx, mut closed) = oneshot::channel::<()>();
        let mut close_tx = Some(close_tx);
        let mut workers = JoinSet::new();
        let register_by = Instant::now() + self.config.route_idle_timeout;

        tracing::debug!(node = %self.node, link = %link_id, "Link opened");

        loop {
            tokio::select! {
                _ = &mut closed => break,
                _ = tokio::time::sleep_until(register_by), if close_tx.is_some() => {
                    tracing::debug!(node = %self.node, link = %link_id, "Closing link that never registered");
                    break;
                }
                text = receiver.recv() => {
                    let Some(text) = text else { break };
                    self.on_link_text(&sender, &mut close_tx, text, &mut workers);
                }
                Some(_) = workers.join_next(), if !workers.is_empty() => {}
            }
        }

        receiver.close();
        self.routes.remove(&link_id);
        tracing::debug!(node = %self.node, link = %link_id, "Link closed");
    }

    fn on_link_text(
        self: &Arc<Self>,
        sender: &LinkSender,
        close_tx: &mut Option<oneshot::Sender<()>>,
        text: String,
        workers: &mut JoinSet<()>,
    ) {
        let link_id = sender.id();
        let frame: LinkFrame = match meshbank_protocol::decode(&text) {
            Ok(frame) => frame,
            Err(e) => {
                RelayStats::bump(&self.stats.dropped);
                tracing::debug!(node = %self.node, link = %link_id, error = %e, "Dropped unreadable link frame");
                return;
            }
        };

        match frame {
            LinkFrame::Register { role, label } => self.register(sender, close_tx, role, label),
            LinkFrame::Deregister => {
                if self.routes.remove(link_id).is_some() {
                    tracing::info!(node = %self.node, link = %link_id, "Link deregistered");
                }
            }
            LinkFrame::Request { id, body } => {
                let label = match self.routes.get_mut(link_id) {
                    Some(mut route) => {
                        route.touch();
                        route.label.clone()
                    }
                    None => {
                        RelayStats::bump(&self.stats.failed);
                        let err = BankError::validation("link must register before sending requests");
                        workers.spawn(deliver(
                            sender.clone(),
                            LinkFrame::Response {
                                id,
                                reply: Reply::failure(&err),
                            },
                        ));
                        return;
                    }
                };
                workers.spawn(Arc::clone(self).forward(sender.clone(), label, id, body));
            }
            LinkFrame::Response { .. } => {
                RelayStats::bump(&self.stats.dropped);
                tracing::debug!(node = %self.node, link = %link_id, "Clients do not send responses");
            }
        }
    }

    fn register(
        &self,
        sender: &LinkSender,
        close_tx: &mut Option<oneshot::Sender<()>>,
        role: LinkRole,
        label: Option<String>,
    ) {
        let link_id = sender.id().clone();
        if let Some(mut route) = self.routes.get_mut(&link_id) {
            route.role = role;
            route.label = label;
            route.touch();
            tracing::debug!(node = %self.node, link = %link_id, %role, "Route updated");
            return;
        }
        let Some(close) = close_tx.take() else {
            return;
        };
        self.routes
            .insert(link_id.clone(), Route::new(role, label.clone(), sender.clone(), close));
        RelayStats::bump(&self.stats.registrations);
        tracing::info!(
            node = %self.node,
            link = %link_id,
            %role,
            label = label.as_deref().unwrap_or("-"),
            "Link registered"
        );
    }

    /// Resolve the target service, seal and send. Failures before the frame
    /// leaves are answered immediately; afterwards the pending table owns
    /// the reply.
    async fn forward(self: Arc<Self>, reply_to: LinkSender, label: Option<String>, id: CorrelationId, body: RequestBody) {
        let service = body.target();
        let command = body.command();

        if let Err(err) = self.try_forward(&reply_to, label, id.clone(), body).await {
            RelayStats::bump(&self.stats.failed);
            tracing::warn!(
                node = %self.node,
                request_id = %id,
                %service,
                command,
                error = %err,
                "Request not forwarded"
            );
            deliver(
                reply_to,
                LinkFrame::Response {
                    id,
                    reply: Reply::failure(&err),
                },
            )
            .await;
        }
    }

    async fn try_forward(
        &self,
        reply_to: &LinkSender,
        origin: Option<String>,
        id: CorrelationId,
        body: RequestBody,
    ) -> Result<(), BankError> {
        let service = body.target();
        let command = body.command();
        let upstream = self.discovery.resolve(&*self.net, service).await?;

        match self.pending.entry(id.clone()) {
            Entry::Occupied(_) => {
                return Err(BankError::Conflict(format!("request {id} is already in flight")));
            }
            Entry::Vacant(slot) => {
                slot.insert(Pending {
                    link: reply_to.id().clone(),
                    reply_to: reply_to.clone(),
                    service,
                    command,
                    sent_at: Instant::now(),
                });
            }
        }

        let message = WireMessage::Request {
            id: id.clone(),
            origin: origin.or_else(|| Some(reply_to.id().to_string())),
            body,
        };
        let payload = match meshbank_protocol::seal(&self.key, &message) {
            Ok(payload) => payload,
            Err(e) => {
                self.pending.remove(&id);
                return Err(BankError::Internal(e.to_string()));
            }
        };

        let frame = Frame::to_node(self.node.clone(), upstream.clone(), ports::for_service(service), payload);
        if let Err(e) = self.net.send(frame) {
            self.pending.remove(&id);
            return Err(BankError::Internal(e.to_string()));
        }

        RelayStats::bump(&self.stats.forwarded);
        tracing::debug!(node = %self.node, request_id = %id, %service, upstream = %upstream, command, "Request forwarded");
        Ok(())
    }
}

async fn deliver(to: LinkSender, frame: LinkFrame) {
    let text = match meshbank_protocol::encode(&frame) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(link = %to.id(), error = %e, "Failed to encode link frame");
            return;
        }
    };
    if to.send(text).await.is_err() {
        tracing::debug!(link = %to.id(), "Link closed before reply could be delivered");
    }
}
