//! MeshBank Node
//!
//! Runs the ledger, the loan service, the delinquency monitor and a relay on
//! one in-process network.
//!
//! # Usage
//!
//! ```bash
//! # Start a node with throwaway secrets and in-memory state
//! meshbank-node --dev-mode run --in-memory
//!
//! # Start with a config file
//! meshbank-node --config /etc/meshbank/node.toml run
//!
//! # Override a setting from the environment
//! MESHBANK__LENDING__DAYS_UNTIL_LOCK=3 meshbank-node --dev-mode run
//!
//! # Walk through transfer, loan, payment and lockout
//! meshbank-node demo
//! ```

mod cluster;
mod config;
mod demo;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::signal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cluster::Cluster;
use crate::config::NodeConfig;

// =============================================================================
// CLI Arguments
// =============================================================================

/// MeshBank node - ledger, lending and relay in one process
#[derive(Parser, Debug)]
#[command(name = "meshbank-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML, JSON, or YAML)
    #[arg(short, long, global = true, env = "MESHBANK_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "MESHBANK_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long, global = true, env = "MESHBANK_LOG_FORMAT")]
    log_format: Option<String>,

    /// Enable development mode (placeholder secrets accepted)
    #[arg(long, global = true, env = "MESHBANK_DEV_MODE")]
    dev_mode: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the node until Ctrl-C
    Run {
        /// Directory for persisted state
        #[arg(long, env = "MESHBANK_DATA_DIR")]
        data_dir: Option<PathBuf>,

        /// Keep all state in memory
        #[arg(long)]
        in_memory: bool,

        /// Name of the bootstrap admin account
        #[arg(long, env = "MESHBANK_ADMIN_USER")]
        admin_user: Option<String>,

        /// Password of the bootstrap admin account
        #[arg(long, env = "MESHBANK_ADMIN_PASSWORD", hide_env_values = true)]
        admin_password: Option<String>,
    },
    /// Run the transfer, loan, payment and lockout scenarios and exit
    Demo,
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut node_config = match args.command {
        Command::Demo => demo::demo_config(),
        Command::Run { .. } => NodeConfig::load(args.config.as_deref())?,
    };

    // Override with CLI arguments
    if let Some(level) = args.log_level {
        node_config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        node_config.logging.format = format;
    }

    match args.command {
        Command::Demo => {
            if node_config.logging.level == "debug" {
                node_config.logging.level = "warn".to_string();
            }
            init_logging(&node_config.logging)?;
            println!("MeshBank demo");
            let outcome = demo::run(&node_config).await?;
            println!("\nAll scenarios passed: {}", outcome.all_passed());
            Ok(())
        }
        Command::Run {
            data_dir,
            in_memory,
            admin_user,
            admin_password,
        } => {
            if let Some(dir) = data_dir {
                node_config.node.data_dir = dir;
            }
            if in_memory {
                node_config.node.in_memory = true;
            }
            if let Some(user) = admin_user {
                node_config.admin.username = user;
            }
            if let Some(password) = admin_password {
                node_config.admin.password = password;
            }
            if args.dev_mode {
                node_config.ledger.password = meshbank_ledger::PasswordConfig::light();
            }

            init_logging(&node_config.logging)?;
            node_config.validate(args.dev_mode)?;

            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                dev_mode = args.dev_mode,
                data_dir = %node_config.node.data_dir.display(),
                "Starting MeshBank node"
            );

            let cluster = Cluster::start(&node_config).await?;
            shutdown_signal().await;
            cluster.stop().await;
            Ok(())
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Initialize logging/tracing
fn init_logging(config: &config::LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => {
            subscriber
                .with(fmt::layer().json().with_target(true))
                .try_init()?;
        }
        _ => {
            subscriber
                .with(fmt::layer().compact().with_target(false))
                .try_init()?;
        }
    }

    Ok(())
}

/// Wait for Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let args = Args::parse_from(["meshbank-node", "--dev-mode", "run", "--in-memory", "--admin-user", "root"]);
        assert!(args.dev_mode);
        match args.command {
            Command::Run {
                in_memory,
                admin_user,
                ..
            } => {
                assert!(in_memory);
                assert_eq!(admin_user.as_deref(), Some("root"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_demo_subcommand() {
        let args = Args::parse_from(["meshbank-node", "demo", "--log-level", "error"]);
        assert!(matches!(args.command, Command::Demo));
        assert_eq!(args.log_level.as_deref(), Some("error"));
    }

    #[test]
    fn test_development_config() {
        let config = NodeConfig::development();
        assert!(config.node.in_memory);
        assert_eq!(config.logging.level, "debug");
    }
}
