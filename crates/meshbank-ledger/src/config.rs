//! Ledger configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ledger service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Sessions idle longer than this are dropped
    #[serde(with = "humantime_serde")]
    pub session_idle_timeout: Duration,
    /// How often the node sweeps idle sessions
    #[serde(with = "humantime_serde")]
    pub session_sweep_interval: Duration,
    /// Random bytes per session token
    pub token_length: usize,
    /// Whether `admin_set_balance` may set a negative balance
    pub allow_negative_admin_balance: bool,
    /// Shortest accepted password
    pub min_password_length: usize,
    /// Idempotency records kept for inter-service balance operations
    pub max_applied_ops: usize,
    /// Password hashing parameters
    pub password: PasswordConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            session_idle_timeout: Duration::from_secs(10 * 60),
            session_sweep_interval: Duration::from_secs(60),
            token_length: 32,
            allow_negative_admin_balance: false,
            min_password_length: 4,
            max_applied_ops: 10_000,
            password: PasswordConfig::default(),
        }
    }
}

/// Argon2id parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordConfig {
    /// Memory cost in KiB
    pub memory_cost: u32,
    /// Iterations
    pub time_cost: u32,
    /// Lanes
    pub parallelism: u32,
    /// Output length in bytes
    pub hash_length: u32,
    /// Optional server-side pepper
    pub pepper: Option<String>,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_cost: 19_456, // 19 MiB
            time_cost: 2,
            parallelism: 1,
            hash_length: 32,
            pepper: None,
        }
    }
}

impl PasswordConfig {
    /// Cheap parameters for demos and tests
    pub fn light() -> Self {
        Self {
            memory_cost: 1024,
            time_cost: 1,
            ..Self::default()
        }
    }
}
