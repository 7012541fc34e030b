//! Wiring for a single-process MeshBank network
//!
//! Everything shares one in-memory broadcast channel. The ledger answers
//! under both the network and the service key; the loan service reaches the
//! ledger through an RPC client holding the service key only.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use meshbank_crypto::{KeyPair, SymmetricKey};
use meshbank_ledger::{LedgerHandler, LedgerService};
use meshbank_lending::{DelinquencyMonitor, LedgerClient, LoanHandler, LoanService};
use meshbank_relay::Relay;
use meshbank_rpc::{KeyRing, RpcClient, ServiceHost};
use meshbank_store::{AuditLog, BlobStore, FileAuditLog, FileStore, MemoryAuditLog, MemoryStore};
use meshbank_transport::{Broadcast, MemoryBroadcast, NodeId};
use meshbank_types::ServiceKind;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::NodeConfig;

/// A running node
pub struct Cluster {
    pub ledger: Arc<LedgerService>,
    pub loans: Arc<LoanService>,
    pub relay: Relay,
    shutdown: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    shutdown_timeout: Duration,
}

impl Cluster {
    /// Start ledger, loan service, monitor, session sweeper and relay
    pub async fn start(config: &NodeConfig) -> anyhow::Result<Self> {
        let name = &config.node.name;
        let net: Arc<dyn Broadcast> = Arc::new(MemoryBroadcast::new(config.node.broadcast_capacity));
        let (shutdown, rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let (ledger_store, loan_store, audit) = stores(config);

        let ledger = Arc::new(
            LedgerService::new(config.ledger.clone(), ledger_store, audit)
                .context("failed to load ledger state")?,
        );
        bootstrap_admin(&ledger, config).await?;

        tasks.push((
            "ledger-host",
            ServiceHost::new(
                NodeId::new(format!("{name}-ledger")),
                ServiceKind::Ledger,
                KeyRing::from_secrets(&config.secrets.network_secret, Some(&config.secrets.service_secret)),
                Arc::clone(&net),
                Arc::new(LedgerHandler::new(Arc::clone(&ledger))),
            )
            .spawn(rx.clone()),
        ));
        tasks.push((
            "session-sweeper",
            spawn_session_sweeper(Arc::clone(&ledger), config.ledger.session_sweep_interval, rx.clone()),
        ));

        let loan_node = NodeId::new(format!("{name}-loan"));
        let to_ledger = RpcClient::spawn(
            loan_node.clone(),
            ServiceKind::Ledger,
            SymmetricKey::from_passphrase(&config.secrets.service_secret, "service"),
            KeyPair::generate(),
            Arc::clone(&net),
            config.rpc.clone(),
            rx.clone(),
        );
        let loans = Arc::new(
            LoanService::new(
                config.lending.clone(),
                Arc::new(LedgerClient::new(Arc::new(to_ledger))),
                loan_store,
            )
            .context("failed to load loan state")?,
        );
        tasks.push((
            "loan-host",
            ServiceHost::new(
                loan_node,
                ServiceKind::Loan,
                KeyRing::from_secrets(&config.secrets.network_secret, None),
                Arc::clone(&net),
                Arc::new(LoanHandler::new(Arc::clone(&loans))),
            )
            .spawn(rx.clone()),
        ));
        tasks.push((
            "delinquency-monitor",
            DelinquencyMonitor::new(Arc::clone(&loans), config.lending.sweep_interval).spawn(rx.clone()),
        ));

        let relay = Relay::new(
            NodeId::new(format!("{name}-relay")),
            SymmetricKey::from_passphrase(&config.secrets.network_secret, "network"),
            KeyPair::generate(),
            Arc::clone(&net),
            config.relay.clone(),
        );
        tasks.push(("relay", relay.spawn(rx)?));

        tracing::info!(
            node = %name,
            accounts = ledger.account_count().await,
            in_memory = config.node.in_memory,
            "MeshBank node started"
        );

        Ok(Self {
            ledger,
            loans,
            relay,
            shutdown,
            tasks,
            shutdown_timeout: config.node.shutdown_timeout,
        })
    }

    /// Signal every task and wait for them to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for (name, handle) in self.tasks {
            match tokio::time::timeout(self.shutdown_timeout, handle).await {
                Ok(Ok(())) => tracing::debug!(task = name, "Task stopped"),
                Ok(Err(e)) => tracing::warn!(task = name, error = %e, "Task ended abnormally"),
                Err(_) => tracing::warn!(task = name, "Task did not stop in time"),
            }
        }
        tracing::info!("MeshBank node stopped");
    }
}

fn stores(config: &NodeConfig) -> (Arc<dyn BlobStore>, Arc<dyn BlobStore>, Arc<dyn AuditLog>) {
    if config.node.in_memory {
        return (
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryAuditLog::new()),
        );
    }

    let dir = &config.node.data_dir;
    let audit: Arc<dyn AuditLog> = Arc::new(FileAuditLog::new(dir.join("audit.log")));
    if config.node.encrypt_storage {
        let key = || SymmetricKey::from_passphrase(&config.secrets.storage_secret, "storage");
        (
            Arc::new(FileStore::encrypted(dir.join("ledger"), key())),
            Arc::new(FileStore::encrypted(dir.join("lending"), key())),
            audit,
        )
    } else {
        (
            Arc::new(FileStore::new(dir.join("ledger"))),
            Arc::new(FileStore::new(dir.join("lending"))),
            audit,
        )
    }
}

async fn bootstrap_admin(ledger: &LedgerService, config: &NodeConfig) -> anyhow::Result<()> {
    if ledger.account_count().await > 0 {
        return Ok(());
    }
    let admin = &config.admin;
    ledger
        .create_account(&admin.username, &admin.password, Decimal::ZERO, true)
        .await
        .context("failed to create the bootstrap admin account")?;
    tracing::info!(account = %admin.username, "Ledger was empty, created admin account");
    Ok(())
}

fn spawn_session_sweeper(
    ledger: Arc<LedgerService>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let dropped = ledger.sweep_sessions(chrono::Utc::now()).await;
                    if dropped > 0 {
                        tracing::info!(dropped, "Idle sessions dropped");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_empty_ledger_gets_an_admin() {
        let config = NodeConfig::development();
        let cluster = Cluster::start(&config).await.unwrap();
        assert_eq!(cluster.ledger.account_count().await, 1);
        let grant = cluster.ledger.login("admin", &config.admin.password, None).await.unwrap();
        assert!(grant.is_admin);
        cluster.stop().await;
    }

    #[tokio::test]
    async fn test_restart_keeps_file_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = NodeConfig::development();
        config.node.in_memory = false;
        config.node.data_dir = dir.path().to_path_buf();

        let cluster = Cluster::start(&config).await.unwrap();
        cluster.ledger.create_account("carol", "carolpw", dec!(75), false).await.unwrap();
        cluster.stop().await;

        let cluster = Cluster::start(&config).await.unwrap();
        assert_eq!(cluster.ledger.account_count().await, 2);
        assert_eq!(cluster.ledger.get_balance("carol").await.unwrap(), dec!(75));
        cluster.stop().await;
        assert!(dir.path().join("ledger").is_dir());
    }
}
