//! Routing table entries for registered private links

use std::time::Duration;

use meshbank_transport::LinkSender;
use meshbank_types::{LinkId, LinkRole};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// A registered private link. Dropping the route closes the link.
pub struct Route {
    pub role: LinkRole,
    pub label: Option<String>,
    pub registered_at: Instant,
    pub last_seen: Instant,
    pub sender: LinkSender,
    pub(crate) _close: oneshot::Sender<()>,
}

impl Route {
    pub(crate) fn new(
        role: LinkRole,
        label: Option<String>,
        sender: LinkSender,
        close: oneshot::Sender<()>,
    ) -> Self {
        let now = Instant::now();
        Self {
            role,
            label,
            registered_at: now,
            last_seen: now,
            sender,
            _close: close,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen.elapsed()
    }

    pub fn info(&self, link: &LinkId) -> RouteInfo {
        RouteInfo {
            link: link.clone(),
            role: self.role,
            label: self.label.clone(),
            idle_ms: self.idle_for().as_millis() as u64,
        }
    }
}

/// Snapshot of one route for status output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteInfo {
    pub link: LinkId,
    pub role: LinkRole,
    pub label: Option<String>,
    pub idle_ms: u64,
}
