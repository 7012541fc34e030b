//! Relay counters

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic counters updated from every relay task
#[derive(Debug, Default)]
pub struct RelayStats {
    pub forwarded: AtomicU64,
    pub replied: AtomicU64,
    /// Synthetic failures sent to clients (discovery, validation)
    pub failed: AtomicU64,
    /// Synthetic timeouts sent to clients
    pub timed_out: AtomicU64,
    /// Link frames that did not parse, and replies nobody waited for
    pub dropped: AtomicU64,
    pub registrations: AtomicU64,
    pub evictions: AtomicU64,
}

impl RelayStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, routes_by_role: BTreeMap<String, usize>, pending: usize) -> StatsSnapshot {
        StatsSnapshot {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            replied: self.replied.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            registrations: self.registrations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            pending,
            routes_by_role,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub forwarded: u64,
    pub replied: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub dropped: u64,
    pub registrations: u64,
    pub evictions: u64,
    pub pending: usize,
    /// Registered routes per declared role
    pub routes_by_role: BTreeMap<String, usize>,
}
