//! Shared broadcast channel

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::{NodeId, TransportError, TransportResult};

/// One transmission on the shared channel
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub sender: NodeId,
    /// `None` means every listener on the port may read it
    pub recipient: Option<NodeId>,
    pub port: u16,
    pub payload: String,
}

impl Frame {
    /// Frame addressed to everyone listening on `port`
    pub fn to_all(sender: NodeId, port: u16, payload: String) -> Self {
        Self {
            sender,
            recipient: None,
            port,
            payload,
        }
    }

    /// Frame addressed to a single node
    pub fn to_node(sender: NodeId, recipient: NodeId, port: u16, payload: String) -> Self {
        Self {
            sender,
            recipient: Some(recipient),
            port,
            payload,
        }
    }

    /// Whether `node` listening on `port` should look at this frame.
    /// Nodes never hear their own transmissions.
    pub fn is_for(&self, node: &NodeId, port: u16) -> bool {
        self.port == port
            && &self.sender != node
            && self.recipient.as_ref().map_or(true, |r| r == node)
    }
}

/// A broadcast medium
pub trait Broadcast: Send + Sync {
    /// Transmit a frame. Succeeds even if nobody is listening.
    fn send(&self, frame: Frame) -> TransportResult<()>;

    /// Start hearing frames sent after this call
    fn subscribe(&self) -> FrameReceiver;
}

/// Receiving half of a broadcast subscription
pub struct FrameReceiver {
    inner: broadcast::Receiver<Frame>,
}

impl FrameReceiver {
    /// Next frame, or `None` once the channel is gone. Frames lost to lag are
    /// skipped.
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            match self.inner.recv().await {
                Ok(frame) => return Some(frame),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Broadcast subscriber lagged, frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// In-process broadcast channel
#[derive(Clone)]
pub struct MemoryBroadcast {
    tx: broadcast::Sender<Frame>,
    sent: Arc<AtomicU64>,
}

impl MemoryBroadcast {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            sent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Frames transmitted so far
    pub fn frames_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for MemoryBroadcast {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl Broadcast for MemoryBroadcast {
    fn send(&self, frame: Frame) -> TransportResult<()> {
        if frame.payload.is_empty() {
            return Err(TransportError::DeliveryFailed("empty payload".to_string()));
        }
        self.sent.fetch_add(1, Ordering::Relaxed);
        // No receivers is not an error on a radio-style medium
        let _ = self.tx.send(frame);
        Ok(())
    }

    fn subscribe(&self) -> FrameReceiver {
        FrameReceiver {
            inner: self.tx.subscribe(),
        }
    }
}
