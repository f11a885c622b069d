// src/relay.rs
//! Wiring and lifecycle: one registry, one ledger, one dispatcher and one
//! poll task, plus the persistence gateway they share.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::RelayConfig;
use crate::dedup::SeenSet;
use crate::dispatcher::Dispatcher;
use crate::persistence::{DrainReport, PersistenceGateway};
use crate::poller::SourcePoller;
use crate::registry::SubscriptionRegistry;
use crate::source::ContentSource;

pub struct Relay;

impl Relay {
    /// Build every component from `cfg` and spawn the poll task.
    pub fn start(
        cfg: &RelayConfig,
        source: Arc<dyn ContentSource>,
        persistence: Arc<PersistenceGateway>,
    ) -> RelayHandle {
        let registry = Arc::new(SubscriptionRegistry::new(
            cfg.delivery.queue_capacity,
            cfg.delivery.drop_policy,
        ));
        let ledger = Arc::new(SeenSet::new());
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            source.clone(),
            persistence.clone(),
        ));
        let poller = SourcePoller::new(source, ledger.clone(), dispatcher, cfg.poller.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poll_task = tokio::spawn(poller.run(shutdown_rx));

        tracing::info!(
            target: "relay",
            queue_capacity = cfg.delivery.queue_capacity,
            drop_policy = %cfg.delivery.drop_policy,
            persistence = persistence.is_enabled(),
            "relay started"
        );

        RelayHandle {
            registry,
            ledger,
            persistence,
            shutdown_tx,
            poll_task,
            drain_timeout: Duration::from_secs(cfg.persistence.drain_timeout_secs),
        }
    }
}

pub struct RelayHandle {
    registry: Arc<SubscriptionRegistry>,
    ledger: Arc<SeenSet>,
    persistence: Arc<PersistenceGateway>,
    shutdown_tx: watch::Sender<bool>,
    poll_task: JoinHandle<()>,
    drain_timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub closed_subscriptions: usize,
    pub persistence: DrainReport,
}

impl RelayHandle {
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn ledger(&self) -> &Arc<SeenSet> {
        &self.ledger
    }

    /// Stop polling, close every delivery queue, then drain persistence.
    pub async fn shutdown(self) -> ShutdownReport {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.poll_task.await {
            tracing::warn!(target: "relay", error = %e, "poll task ended abnormally");
        }
        let closed_subscriptions = self.registry.close_all();
        let persistence = self.persistence.drain(self.drain_timeout).await;
        tracing::info!(
            target: "relay",
            closed_subscriptions,
            persisted = persistence.completed,
            aborted = persistence.aborted,
            "relay stopped"
        );
        ShutdownReport {
            closed_subscriptions,
            persistence,
        }
    }
}
