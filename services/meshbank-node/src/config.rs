//! Node Configuration
//!
//! Sources, lowest priority first: built-in defaults, the file given with
//! `--config`, `config/default`, `config/local`, then `MESHBANK__*`
//! environment variables (`MESHBANK__LENDING__DAYS_UNTIL_LOCK=3`). CLI flags
//! are applied on top by `main`.

use std::path::PathBuf;
use std::time::Duration;

use meshbank_ledger::LedgerConfig;
use meshbank_lending::LendingConfig;
use meshbank_relay::RelayConfig;
use meshbank_rpc::RpcClientConfig;
use serde::{Deserialize, Serialize};

/// Placeholder secrets refused outside development mode
pub const DEFAULT_NETWORK_SECRET: &str = "change-me-network";
pub const DEFAULT_SERVICE_SECRET: &str = "change-me-service";
pub const DEFAULT_STORAGE_SECRET: &str = "change-me-storage";
pub const DEFAULT_ADMIN_PASSWORD: &str = "change-me-admin";

/// Node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node: NodeSettings,
    pub secrets: SecretSettings,
    pub admin: AdminSettings,
    pub ledger: LedgerConfig,
    pub lending: LendingConfig,
    pub relay: RelayConfig,
    /// Loan service to ledger calls
    pub rpc: RpcClientConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    /// Prefix for the node ids on the broadcast channel
    pub name: String,
    /// Where persisted datasets and the audit log live
    pub data_dir: PathBuf,
    /// Encrypt persisted datasets with the storage secret
    pub encrypt_storage: bool,
    /// Keep everything in memory (nothing written to `data_dir`)
    pub in_memory: bool,
    /// Frames buffered per subscriber on the broadcast channel
    pub broadcast_capacity: usize,
    /// Grace period for tasks after shutdown is signalled
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            name: "meshbank".to_string(),
            data_dir: PathBuf::from("data"),
            encrypt_storage: true,
            in_memory: false,
            broadcast_capacity: 4096,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Shared secrets the symmetric keys are derived from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretSettings {
    /// Relay to service traffic
    pub network_secret: String,
    /// Loan service to ledger traffic
    pub service_secret: String,
    /// Persisted datasets
    pub storage_secret: String,
}

impl Default for SecretSettings {
    fn default() -> Self {
        Self {
            network_secret: DEFAULT_NETWORK_SECRET.to_string(),
            service_secret: DEFAULT_SERVICE_SECRET.to_string(),
            storage_secret: DEFAULT_STORAGE_SECRET.to_string(),
        }
    }
}

/// Admin account created when the ledger starts empty
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminSettings {
    pub username: String,
    pub password: String,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: DEFAULT_ADMIN_PASSWORD.to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

impl NodeConfig {
    /// Load configuration from environment and optional config file
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("MESHBANK")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: NodeConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Configuration for local experiments: in-memory, verbose, fast sweeps
    pub fn development() -> Self {
        let mut config = Self::default();
        config.node.in_memory = true;
        config.logging.level = "debug".to_string();
        config.ledger.password = meshbank_ledger::PasswordConfig::light();
        config
    }

    /// Reject placeholder secrets unless running in development mode
    pub fn validate(&self, dev_mode: bool) -> anyhow::Result<()> {
        if self.secrets.network_secret == self.secrets.service_secret {
            anyhow::bail!("network_secret and service_secret must differ");
        }
        if dev_mode {
            return Ok(());
        }
        let placeholders = [
            (&self.secrets.network_secret, DEFAULT_NETWORK_SECRET, "network_secret"),
            (&self.secrets.service_secret, DEFAULT_SERVICE_SECRET, "service_secret"),
            (&self.admin.password, DEFAULT_ADMIN_PASSWORD, "admin.password"),
        ];
        for (value, placeholder, name) in placeholders {
            if value == placeholder {
                anyhow::bail!("{name} must be changed. Set MESHBANK__SECRETS__... or pass --dev-mode.");
            }
        }
        if self.node.encrypt_storage
            && !self.node.in_memory
            && self.secrets.storage_secret == DEFAULT_STORAGE_SECRET
        {
            anyhow::bail!("storage_secret must be changed when storage encryption is on");
        }
        if self.lending.days_until_default <= self.lending.days_until_lock {
            tracing::warn!(
                lock = self.lending.days_until_lock,
                default = self.lending.days_until_default,
                "Loans default before the lock threshold is reached"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_secrets_rejected() {
        let config = NodeConfig::default();
        assert!(config.validate(false).is_err());
        assert!(config.validate(true).is_ok());
    }

    #[test]
    fn test_shared_secret_rejected_even_in_dev_mode() {
        let mut config = NodeConfig::development();
        config.secrets.service_secret = config.secrets.network_secret.clone();
        assert!(config.validate(true).is_err());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(
            &path,
            "[lending]\ndays_until_lock = 3\n\n[relay]\nrequest_timeout = \"2s\"\n",
        )
        .unwrap();

        let config = NodeConfig::load(path.to_str()).unwrap();
        assert_eq!(config.lending.days_until_lock, 3);
        assert_eq!(config.lending.days_until_default, 30);
        assert_eq!(config.relay.request_timeout, Duration::from_secs(2));
        assert_eq!(config.node.name, "meshbank");
    }
}
