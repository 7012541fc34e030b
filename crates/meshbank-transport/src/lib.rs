//! MeshBank Transport - the two segments a message can cross
//!
//! - [`MemoryBroadcast`]: a shared channel every node hears. Frames carry a
//!   sender, an optional recipient and a port number; delivery is best-effort
//!   and a slow subscriber loses frames rather than blocking the sender.
//! - [`PrivateLink`]: a point-to-point pipe pairing exactly two endpoints,
//!   used between a client and its relay.
//!
//! Transports only move opaque text. Encryption and message shape live in
//! `meshbank-protocol`.

pub mod broadcast;
pub mod link;

pub use broadcast::*;
pub use link::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Address of a node on the broadcast channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Channel closed")]
    Closed,

    #[error("Link {0} closed by peer")]
    LinkClosed(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),
}

pub type TransportResult<T> = Result<T, TransportError>;
