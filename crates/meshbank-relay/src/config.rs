//! Relay configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Wait for a service reply before answering the client with a timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Wait for a pong during inline discovery
    #[serde(with = "humantime_serde")]
    pub discovery_timeout: Duration,
    /// How long a discovered upstream is used without a fresh pong
    #[serde(with = "humantime_serde")]
    pub upstream_ttl: Duration,
    /// Period of the background discovery pings
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,
    /// Routes silent for longer than this are evicted
    #[serde(with = "humantime_serde")]
    pub route_idle_timeout: Duration,
    /// How often pending requests and idle routes are checked
    #[serde(with = "humantime_serde")]
    pub maintenance_interval: Duration,
    /// Buffered messages per private link direction
    pub link_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            discovery_timeout: Duration::from_secs(2),
            upstream_ttl: Duration::from_secs(60),
            ping_interval: Duration::from_secs(30),
            route_idle_timeout: Duration::from_secs(5 * 60),
            maintenance_interval: Duration::from_secs(1),
            link_capacity: 64,
        }
    }
}
