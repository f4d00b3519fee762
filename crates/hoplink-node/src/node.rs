//! The routing node orchestrator.
//!
//! Ties together the forward store, the channel node's REST engine, the
//! forwarding engine and the HTTP API. The listener and the collateral
//! collector run as background tasks.

use anyhow::{Context, Result};
use hoplink_core::RouterIdentity;
use hoplink_router::metrics::spawn_channel_collector;
use hoplink_router::{ChannelEngine, ForwardStore, Forwarder, Listener, RouterMetrics, ValidationGate};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::RouterConfig;
use crate::rest::RestChannelEngine;
use crate::state::NodeState;
use crate::storage::RocksForwardStore;

/// The full routing node.
pub struct RouterNode {
    config: RouterConfig,
    identity: RouterIdentity,
    engine: Arc<RestChannelEngine>,
    metrics: Arc<RouterMetrics>,
    /// Set once `start` has opened the store.
    store: Option<Arc<RocksForwardStore>>,
    api_task: Option<JoinHandle<()>>,
    listener_task: Option<JoinHandle<()>>,
    collector_task: Option<JoinHandle<()>>,
}

impl RouterNode {
    /// Create a node from a validated config. Nothing is opened or spawned
    /// until [`start`](Self::start).
    pub fn new(config: RouterConfig) -> Result<Self> {
        let identity = RouterIdentity {
            public_identifier: config.identity.public_identifier.clone(),
            signer_address: config.identity.signer_address.clone(),
        };
        let engine = Arc::new(RestChannelEngine::new(
            &config.engine.node_url,
            &identity.public_identifier,
            config.request_timeout(),
            config.engine.event_capacity,
        )?);
        let metrics = Arc::new(RouterMetrics::new());

        tracing::info!(
            public_identifier = %identity.public_identifier,
            signer_address = %identity.signer_address,
            "routing node created"
        );

        Ok(Self {
            config,
            identity,
            engine,
            metrics,
            store: None,
            api_task: None,
            listener_task: None,
            collector_task: None,
        })
    }

    /// Open storage, start the listener and HTTP API, and subscribe to the
    /// channel node's events.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!("starting routing node");
        for (chain_id, provider) in &self.config.chains.providers {
            let has_contracts = self.config.chains.contract_addresses.contains_key(chain_id);
            tracing::info!(chain_id = %chain_id, %provider, has_contracts, "chain configured");
        }

        let data_dir = &self.config.storage.data_dir;
        let store = Arc::new(
            RocksForwardStore::open(data_dir)
                .with_context(|| format!("opening forward store at {}", data_dir.display()))?,
        );
        tracing::info!(path = %data_dir.display(), "storage initialized");

        let gate = Arc::new(ValidationGate::new(self.identity.clone())?);
        let forwarder = Arc::new(Forwarder::new(
            gate,
            self.engine.clone(),
            store.clone(),
            self.config.forwarding.clone(),
        ));

        // Subscribe before any webhook can arrive.
        let listener = Arc::new(Listener::new(forwarder.clone(), self.metrics.clone()));
        self.listener_task = Some(listener.spawn(self.engine.subscribe()));

        if self.config.metrics.enabled {
            self.collector_task = Some(spawn_channel_collector(
                self.metrics.clone(),
                self.engine.clone(),
                self.identity.public_identifier.clone(),
                self.config.collect_interval(),
            ));
        }

        let api_addr = self.config.api_socket_addr()?;
        let api_state = Arc::new(NodeState::new(
            self.identity.clone(),
            store.clone(),
            self.metrics.clone(),
            self.engine.clone(),
        ));
        self.api_task = Some(tokio::spawn(async move {
            if let Err(e) = crate::api::start_api_server(api_addr, api_state).await {
                tracing::error!(error = %e, "HTTP API server error");
            }
        }));

        self.engine
            .register_webhooks(&self.config.api.public_url)
            .await
            .context("registering webhooks with the channel node")?;

        // Records left pending by a previous run stay pending if the engine
        // cannot be asked about them; redelivery reconciles them later.
        match forwarder.recover_pending().await {
            Ok(recovered) => tracing::info!(recovered, "pending forward recovery complete"),
            Err(e) => tracing::warn!(error = %e, "pending forward recovery failed"),
        }
        let forwards = store.list().await?.len();
        tracing::info!(forwards, "routing node started");

        self.store = Some(store);
        Ok(())
    }

    /// Run until the API server or the event listener stops.
    pub async fn run(&mut self) -> Result<()> {
        let api_task = self
            .api_task
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("node not started"))?;
        let listener_task = self
            .listener_task
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("node not started"))?;

        tracing::info!("routing node running");
        tokio::select! {
            result = api_task => {
                result.context("HTTP API task panicked")?;
                tracing::warn!("HTTP API server exited");
            }
            result = listener_task => {
                result.context("event listener task panicked")?;
                tracing::warn!("event listener exited");
            }
        }
        Ok(())
    }

    /// Stop background tasks and release storage.
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("shutting down routing node");
        for task in [
            self.collector_task.take(),
            self.listener_task.take(),
            self.api_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
        if let Some(store) = self.store.take() {
            let forwards = store.list().await?.len();
            tracing::info!(forwards, "forward store closed");
        }
        Ok(())
    }
}
