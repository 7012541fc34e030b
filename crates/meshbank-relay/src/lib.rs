//! MeshBank Relay
//!
//! Bridges many private client links onto the shared broadcast channel:
//!
//! ```text
//! client ──link──▶ Relay ──sealed frame──▶ ledger / loan service
//! client ◀─link─── Relay ◀─sealed frame─── ledger / loan service
//! ```
//!
//! The relay never interprets business payloads. It keeps a route per
//! registered link, a per-service upstream found by signed discovery pings,
//! and a table of pending requests keyed by correlation id so every reply
//! goes back to the link that asked.

pub mod config;
pub mod relay;
pub mod route;
pub mod stats;

pub use config::RelayConfig;
pub use relay::Relay;
pub use route::{Route, RouteInfo};
pub use stats::{RelayStats, StatsSnapshot};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Relay is already running")]
    AlreadyRunning,

    #[error("Relay has stopped")]
    Stopped,
}

pub type RelayResult<T> = Result<T, RelayError>;
