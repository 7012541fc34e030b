//! Private point-to-point links

use meshbank_types::LinkId;
use tokio::sync::mpsc;

use crate::{TransportError, TransportResult};

/// Factory for link pairs
pub struct PrivateLink;

impl PrivateLink {
    /// Create both ends of a new link. Both ends share one [`LinkId`].
    pub fn pair(capacity: usize) -> (LinkEnd, LinkEnd) {
        let id = LinkId::new();
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        (
            LinkEnd {
                sender: LinkSender { id: id.clone(), tx: a_tx },
                receiver: LinkReceiver { id: id.clone(), rx: a_rx },
            },
            LinkEnd {
                sender: LinkSender { id: id.clone(), tx: b_tx },
                receiver: LinkReceiver { id, rx: b_rx },
            },
        )
    }
}

/// One end of a private link
pub struct LinkEnd {
    sender: LinkSender,
    receiver: LinkReceiver,
}

impl LinkEnd {
    pub fn id(&self) -> &LinkId {
        &self.sender.id
    }

    pub async fn send(&self, text: String) -> TransportResult<()> {
        self.sender.send(text).await
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Split into independently owned halves
    pub fn split(self) -> (LinkSender, LinkReceiver) {
        (self.sender, self.receiver)
    }
}

/// Sending half of a link end; cheap to clone
#[derive(Clone)]
pub struct LinkSender {
    id: LinkId,
    tx: mpsc::Sender<String>,
}

impl LinkSender {
    pub fn id(&self) -> &LinkId {
        &self.id
    }

    pub async fn send(&self, text: String) -> TransportResult<()> {
        self.tx
            .send(text)
            .await
            .map_err(|_| TransportError::LinkClosed(self.id.to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of a link end
pub struct LinkReceiver {
    id: LinkId,
    rx: mpsc::Receiver<String>,
}

impl LinkReceiver {
    pub fn id(&self) -> &LinkId {
        &self.id
    }

    /// Next message; `None` once the peer has dropped its sender
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Stop accepting messages from the peer
    pub fn close(&mut self) {
        self.rx.close();
    }
}
