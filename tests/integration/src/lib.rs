//! Shared harness for the end-to-end forwarding scenarios.
//!
//! Builds a three-party line, alice → router → carol, on an in-memory
//! channel engine and wires a listener to it the way the node does.

use hoplink_core::{ForwardingConfig, RouterIdentity, RoutingId, Transfer, TransferId};
use hoplink_router::adapters::memory::InMemoryChannelEngine;
use hoplink_router::{
    ChannelEngine, ForwardRecord, ForwardStatus, ForwardStore, Forwarder, Listener,
    MemoryForwardStore, RouterMetrics, ValidationGate,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const ASSET: &str = "0x0000000000000000000000000000000000000000";
pub const ROUTER_ID: &str = "router";
pub const ROUTER_SIGNER: &str = "0xrouter";
pub const ALICE_SIGNER: &str = "0xalice";
pub const HASHLOCK: &str = "0xhashlock";

/// A 32-byte hex routing id derived from `n`.
pub fn routing_id(n: u64) -> RoutingId {
    RoutingId(format!("0x{n:064x}"))
}

pub fn router_identity() -> RouterIdentity {
    RouterIdentity {
        public_identifier: ROUTER_ID.into(),
        signer_address: ROUTER_SIGNER.into(),
    }
}

/// Forwarding config with no sleep between collateral attempts.
pub fn fast_config() -> ForwardingConfig {
    ForwardingConfig {
        collateral_retry_ms: 0,
        ..Default::default()
    }
}

pub struct Line {
    pub engine: Arc<InMemoryChannelEngine>,
    pub store: Arc<dyn ForwardStore>,
    pub metrics: Arc<RouterMetrics>,
    pub forwarder: Arc<Forwarder>,
    pub listener: Arc<Listener>,
    pub inbound: String,
    pub outbound: String,
}

impl Line {
    /// Alice funds her side of the inbound channel with `alice_balance`;
    /// the router holds `router_collateral` towards carol.
    pub fn new(alice_balance: u128, router_collateral: u128) -> Self {
        let engine = Arc::new(InMemoryChannelEngine::new(router_identity()));
        let inbound = engine.open_channel("alice", ALICE_SIGNER, ASSET, 0, alice_balance);
        let outbound = engine.open_channel("carol", "0xcarol", ASSET, router_collateral, 0);
        Self::with_parts(
            engine,
            Arc::new(MemoryForwardStore::new()),
            inbound.channel_address,
            outbound.channel_address,
        )
    }

    /// A fresh router process over an existing engine and store.
    pub fn with_parts(
        engine: Arc<InMemoryChannelEngine>,
        store: Arc<dyn ForwardStore>,
        inbound: String,
        outbound: String,
    ) -> Self {
        let metrics = Arc::new(RouterMetrics::new());
        let gate = Arc::new(ValidationGate::new(router_identity()).expect("schema compiles"));
        let forwarder = Arc::new(Forwarder::new(
            gate,
            engine.clone(),
            store.clone(),
            fast_config(),
        ));
        let listener = Arc::new(Listener::new(forwarder.clone(), metrics.clone()));
        Self {
            engine,
            store,
            metrics,
            forwarder,
            listener,
            inbound,
            outbound,
        }
    }

    /// Start the listener on the engine's event stream.
    pub fn spawn_listener(&self) -> JoinHandle<()> {
        self.listener.clone().spawn(self.engine.subscribe())
    }

    /// An inbound transfer from alice, addressed onward to carol.
    pub fn transfer(&self, transfer_id: &str, routing: &RoutingId, amount: u128) -> Transfer {
        Transfer {
            transfer_id: TransferId::from(transfer_id),
            channel_address: self.inbound.clone(),
            chain_id: 1337,
            initiator: ALICE_SIGNER.into(),
            responder: ROUTER_SIGNER.into(),
            asset_id: ASSET.into(),
            amount,
            timeout: 86_400,
            transfer_definition: HASHLOCK.into(),
            transfer_state: json!({ "lockHash": "0xfeed", "expiry": "0" }),
            meta: json!({
                "routingId": routing.as_str(),
                "requireOnline": true,
                "path": [{ "recipient": "carol" }],
            }),
            resolver: None,
        }
    }

    pub fn router_balance(&self, channel_address: &str) -> u128 {
        self.engine
            .channel(channel_address)
            .map(|c| c.balance_of(ASSET, 0))
            .unwrap_or_default()
    }

    /// Poll the store until the record reaches `status`.
    pub async fn wait_for(&self, routing: &RoutingId, status: ForwardStatus) -> ForwardRecord {
        for _ in 0..300 {
            if let Ok(Some(record)) = self.store.get(routing).await {
                if record.status == status {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("forward {routing} never reached {status}");
    }
}
