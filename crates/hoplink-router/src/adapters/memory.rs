use async_trait::async_trait;
use hoplink_core::config::DEFAULT_CHANNEL_TIMEOUT;
use dashmap::DashMap;
use hoplink_core::{
    Address, Balance, Channel, CreateTransferParams, DepositReconciledPayload, EngineEvent,
    RouterIdentity, RoutingId, Transfer, TransferEventPayload, TransferId, TransferResolver,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::error::EngineError;
use crate::traits::ChannelEngine;

/// Chain id of channels opened with [`InMemoryChannelEngine::open_channel`].
pub const DEFAULT_CHAIN_ID: u64 = 1337;

const EVENT_CAPACITY: usize = 1024;

/// An effect requested from the engine, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    CreateTransfer(CreateTransferParams),
    ResolveTransfer {
        channel_address: Address,
        transfer_id: TransferId,
        resolver: TransferResolver,
    },
    RequestCollateral {
        channel_address: Address,
        asset_id: Address,
        amount: u128,
    },
}

/// In-process channel engine.
///
/// Keeps a ledger of bilateral channels in which the router is always alice,
/// emits the same events a live channel node would, and records every
/// effect it is asked for. Collateral requests and effect failures are
/// switchable so callers can drive the unhappy paths.
pub struct InMemoryChannelEngine {
    identity: RouterIdentity,
    channels: DashMap<Address, Channel>,
    transfers: DashMap<TransferId, Transfer>,
    events: broadcast::Sender<EngineEvent>,
    collateral_enabled: AtomicBool,
    fail_creates: AtomicBool,
    fail_resolves: AtomicBool,
    next_channel: AtomicU64,
    calls: Mutex<Vec<EngineCall>>,
}

impl InMemoryChannelEngine {
    pub fn new(identity: RouterIdentity) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            identity,
            channels: DashMap::new(),
            transfers: DashMap::new(),
            events,
            collateral_enabled: AtomicBool::new(true),
            fail_creates: AtomicBool::new(false),
            fail_resolves: AtomicBool::new(false),
            next_channel: AtomicU64::new(1),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn identity(&self) -> &RouterIdentity {
        &self.identity
    }

    /// Open a channel with `counterparty` on [`DEFAULT_CHAIN_ID`].
    pub fn open_channel(
        &self,
        counterparty: &str,
        counterparty_signer: &str,
        asset_id: &str,
        router_balance: u128,
        counterparty_balance: u128,
    ) -> Channel {
        self.open_channel_on(
            counterparty,
            counterparty_signer,
            DEFAULT_CHAIN_ID,
            asset_id,
            router_balance,
            counterparty_balance,
        )
    }

    pub fn open_channel_on(
        &self,
        counterparty: &str,
        counterparty_signer: &str,
        chain_id: u64,
        asset_id: &str,
        router_balance: u128,
        counterparty_balance: u128,
    ) -> Channel {
        let n = self.next_channel.fetch_add(1, Ordering::SeqCst);
        let channel = Channel {
            channel_address: format!("0x{n:040x}"),
            chain_id,
            alice: self.identity.signer_address.clone(),
            bob: counterparty_signer.to_string(),
            alice_identifier: self.identity.public_identifier.clone(),
            bob_identifier: counterparty.to_string(),
            asset_ids: vec![asset_id.to_string()],
            balances: vec![Balance {
                to: [
                    self.identity.signer_address.clone(),
                    counterparty_signer.to_string(),
                ],
                amount: [router_balance, counterparty_balance],
            }],
            timeout: DEFAULT_CHANNEL_TIMEOUT,
        };
        self.channels
            .insert(channel.channel_address.clone(), channel.clone());
        tracing::debug!(channel_address = %channel.channel_address, counterparty, "channel opened");
        channel
    }

    /// A transfer created by the counterparty on one of the router's
    /// channels. Locks the initiator's balance and emits the created event.
    pub fn inject_transfer(&self, transfer: Transfer) -> Result<Transfer, EngineError> {
        {
            let mut channel = self
                .channels
                .get_mut(&transfer.channel_address)
                .ok_or_else(|| EngineError::ChannelNotFound(transfer.channel_address.clone()))?;
            let index = signer_index(&channel, &transfer.initiator)?;
            debit(&mut channel, &transfer.asset_id, index, transfer.amount)?;
        }
        self.transfers
            .insert(transfer.transfer_id.clone(), transfer.clone());
        self.emit(EngineEvent::ConditionalTransferCreated(TransferEventPayload {
            channel_address: transfer.channel_address.clone(),
            transfer: transfer.clone(),
        }));
        Ok(transfer)
    }

    /// The counterparty resolves a transfer the router created, as the
    /// payee of an outbound hop would. Emits the resolved event.
    pub fn resolve_as_counterparty(
        &self,
        transfer_id: &TransferId,
        resolver: TransferResolver,
    ) -> Result<Transfer, EngineError> {
        self.settle(transfer_id, None, resolver)
    }

    pub fn transfer(&self, transfer_id: &TransferId) -> Option<Transfer> {
        self.transfers.get(transfer_id).map(|t| t.value().clone())
    }

    pub fn channel(&self, channel_address: &str) -> Option<Channel> {
        self.channels.get(channel_address).map(|c| c.value().clone())
    }

    /// Whether collateral requests top the channel up.
    pub fn set_collateral_enabled(&self, enabled: bool) {
        self.collateral_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_resolves(&self, fail: bool) {
        self.fail_resolves.store(fail, Ordering::SeqCst);
    }

    /// Effects requested so far.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn create_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, EngineCall::CreateTransfer(_)))
            .count()
    }

    fn record(&self, call: EngineCall) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call);
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn settle(
        &self,
        transfer_id: &TransferId,
        channel_address: Option<&str>,
        resolver: TransferResolver,
    ) -> Result<Transfer, EngineError> {
        let transfer = {
            let mut entry = self
                .transfers
                .get_mut(transfer_id)
                .ok_or_else(|| EngineError::TransferNotFound(transfer_id.clone()))?;
            let transfer = entry.value_mut();
            if channel_address.is_some_and(|c| c != transfer.channel_address) {
                return Err(EngineError::TransferNotFound(transfer_id.clone()));
            }
            if transfer.is_resolved() {
                return Err(EngineError::Rejected(format!(
                    "transfer {transfer_id} already resolved"
                )));
            }
            transfer.resolver = Some(resolver);
            transfer.clone()
        };

        if let Some(mut channel) = self.channels.get_mut(&transfer.channel_address) {
            let index = signer_index(&channel, &transfer.responder)?;
            credit(&mut channel, &transfer.asset_id, index, transfer.amount);
        }

        self.emit(EngineEvent::ConditionalTransferResolved(TransferEventPayload {
            channel_address: transfer.channel_address.clone(),
            transfer: transfer.clone(),
        }));
        Ok(transfer)
    }
}

fn signer_index(channel: &Channel, signer: &str) -> Result<usize, EngineError> {
    if channel.alice == signer {
        Ok(0)
    } else if channel.bob == signer {
        Ok(1)
    } else {
        Err(EngineError::Rejected(format!(
            "{signer} is not a participant of {}",
            channel.channel_address
        )))
    }
}

fn asset_position(channel: &mut Channel, asset_id: &str) -> usize {
    match channel.asset_ids.iter().position(|a| a == asset_id) {
        Some(pos) => pos,
        None => {
            channel.asset_ids.push(asset_id.to_string());
            channel.balances.push(Balance {
                to: [channel.alice.clone(), channel.bob.clone()],
                amount: [0, 0],
            });
            channel.asset_ids.len() - 1
        }
    }
}

fn debit(channel: &mut Channel, asset_id: &str, index: usize, amount: u128) -> Result<(), EngineError> {
    let pos = asset_position(channel, asset_id);
    let remaining = channel.balances[pos].amount[index]
        .checked_sub(amount)
        .ok_or_else(|| {
            EngineError::Rejected(format!(
                "insufficient balance in {} for {asset_id}",
                channel.channel_address
            ))
        })?;
    channel.balances[pos].amount[index] = remaining;
    Ok(())
}

fn credit(channel: &mut Channel, asset_id: &str, index: usize, amount: u128) {
    let pos = asset_position(channel, asset_id);
    let balance = &mut channel.balances[pos].amount[index];
    *balance = balance.saturating_add(amount);
}

#[async_trait]
impl ChannelEngine for InMemoryChannelEngine {
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    async fn get_state_channel(
        &self,
        channel_address: &str,
    ) -> Result<Option<Channel>, EngineError> {
        Ok(self.channel(channel_address))
    }

    async fn get_state_channels(&self) -> Result<Vec<Address>, EngineError> {
        let mut addresses: Vec<Address> = self.channels.iter().map(|c| c.key().clone()).collect();
        addresses.sort();
        Ok(addresses)
    }

    async fn get_channel_by_counterparty(
        &self,
        counterparty: &str,
        chain_id: u64,
    ) -> Result<Option<Channel>, EngineError> {
        let own = self.identity.public_identifier.as_str();
        Ok(self
            .channels
            .iter()
            .find(|c| {
                c.chain_id == chain_id && c.counterparty_identifier(own) == Some(counterparty)
            })
            .map(|c| c.value().clone()))
    }

    async fn get_transfer_by_routing_id(
        &self,
        channel_address: &str,
        routing_id: &RoutingId,
    ) -> Result<Option<Transfer>, EngineError> {
        Ok(self
            .transfers
            .iter()
            .find(|t| {
                t.channel_address == channel_address && t.routing_id() == Some(routing_id.as_str())
            })
            .map(|t| t.value().clone()))
    }

    async fn create_transfer(&self, params: CreateTransferParams) -> Result<Transfer, EngineError> {
        self.record(EngineCall::CreateTransfer(params.clone()));
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(EngineError::Rejected("create transfer rejected".into()));
        }

        let (chain_id, responder) = {
            let mut channel = self
                .channels
                .get_mut(&params.channel_address)
                .ok_or_else(|| EngineError::ChannelNotFound(params.channel_address.clone()))?;
            let index = signer_index(&channel, &self.identity.signer_address)?;
            debit(&mut channel, &params.asset_id, index, params.amount)?;
            let responder = if index == 0 {
                channel.bob.clone()
            } else {
                channel.alice.clone()
            };
            (channel.chain_id, responder)
        };

        let transfer = Transfer {
            transfer_id: TransferId::generate(),
            channel_address: params.channel_address,
            chain_id,
            initiator: self.identity.signer_address.clone(),
            responder,
            asset_id: params.asset_id,
            amount: params.amount,
            timeout: params.timeout,
            transfer_definition: params.transfer_definition,
            transfer_state: params.transfer_state,
            meta: params.meta,
            resolver: None,
        };
        self.transfers
            .insert(transfer.transfer_id.clone(), transfer.clone());
        tracing::debug!(transfer_id = %transfer.transfer_id, channel_address = %transfer.channel_address, "transfer created");

        self.emit(EngineEvent::ConditionalTransferCreated(TransferEventPayload {
            channel_address: transfer.channel_address.clone(),
            transfer: transfer.clone(),
        }));
        Ok(transfer)
    }

    async fn resolve_transfer(
        &self,
        channel_address: &str,
        transfer_id: &TransferId,
        resolver: TransferResolver,
    ) -> Result<Transfer, EngineError> {
        self.record(EngineCall::ResolveTransfer {
            channel_address: channel_address.to_string(),
            transfer_id: transfer_id.clone(),
            resolver: resolver.clone(),
        });
        if self.fail_resolves.load(Ordering::SeqCst) {
            return Err(EngineError::Rejected("resolve transfer rejected".into()));
        }
        self.settle(transfer_id, Some(channel_address), resolver)
    }

    async fn request_collateral(
        &self,
        channel_address: &str,
        asset_id: &str,
        amount: u128,
    ) -> Result<(), EngineError> {
        self.record(EngineCall::RequestCollateral {
            channel_address: channel_address.to_string(),
            asset_id: asset_id.to_string(),
            amount,
        });
        if !self.collateral_enabled.load(Ordering::SeqCst) {
            return Ok(());
        }

        let event = {
            let mut channel = self
                .channels
                .get_mut(channel_address)
                .ok_or_else(|| EngineError::ChannelNotFound(channel_address.to_string()))?;
            let index = signer_index(&channel, &self.identity.signer_address)?;
            let pos = asset_position(&mut channel, asset_id);
            let balance = &mut channel.balances[pos];
            if balance.amount[index] < amount {
                balance.amount[index] = amount;
            }
            DepositReconciledPayload {
                channel_address: channel_address.to_string(),
                asset_id: asset_id.to_string(),
                channel_balance: balance.clone(),
            }
        };
        self.emit(EngineEvent::DepositReconciled(event));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> InMemoryChannelEngine {
        InMemoryChannelEngine::new(RouterIdentity {
            public_identifier: "router".into(),
            signer_address: "0xrouter".into(),
        })
    }

    fn params(channel_address: &str, amount: u128) -> CreateTransferParams {
        CreateTransferParams {
            channel_address: channel_address.to_string(),
            asset_id: "0xeth".into(),
            amount,
            timeout: 82_080,
            transfer_definition: "0xhashlock".into(),
            transfer_state: json!({}),
            meta: json!({ "routingId": "0xr1", "path": [] }),
        }
    }

    #[tokio::test]
    async fn test_create_locks_router_balance_and_emits() {
        let engine = engine();
        let mut rx = engine.subscribe();
        let channel = engine.open_channel("carol", "0xcarol", "0xeth", 500, 0);

        let transfer = engine
            .create_transfer(params(&channel.channel_address, 100))
            .await
            .unwrap();
        assert_eq!(transfer.initiator, "0xrouter");
        assert_eq!(transfer.responder, "0xcarol");
        assert_eq!(
            engine.channel(&channel.channel_address).unwrap().balance_of("0xeth", 0),
            400
        );

        match rx.recv().await.unwrap() {
            EngineEvent::ConditionalTransferCreated(p) => {
                assert_eq!(p.transfer.transfer_id, transfer.transfer_id)
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_rejects_overdraft() {
        let engine = engine();
        let channel = engine.open_channel("carol", "0xcarol", "0xeth", 50, 0);
        let err = engine
            .create_transfer(params(&channel.channel_address, 100))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_counterparty_resolution_credits_responder() {
        let engine = engine();
        let channel = engine.open_channel("carol", "0xcarol", "0xeth", 500, 0);
        let transfer = engine
            .create_transfer(params(&channel.channel_address, 100))
            .await
            .unwrap();

        let resolved = engine
            .resolve_as_counterparty(&transfer.transfer_id, TransferResolver(json!({ "preImage": "0x01" })))
            .unwrap();
        assert!(resolved.is_resolved());
        assert_eq!(
            engine.channel(&channel.channel_address).unwrap().balance_of("0xeth", 1),
            100
        );

        let again = engine.resolve_as_counterparty(&transfer.transfer_id, TransferResolver(json!({})));
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_lookup_by_counterparty_and_routing_id() {
        let engine = engine();
        let carol = engine.open_channel("carol", "0xcarol", "0xeth", 500, 0);
        engine.open_channel_on("carol", "0xcarol", 10, "0xeth", 500, 0);

        let found = engine
            .get_channel_by_counterparty("carol", DEFAULT_CHAIN_ID)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.channel_address, carol.channel_address);
        assert!(engine
            .get_channel_by_counterparty("dave", DEFAULT_CHAIN_ID)
            .await
            .unwrap()
            .is_none());

        engine
            .create_transfer(params(&carol.channel_address, 1))
            .await
            .unwrap();
        let hit = engine
            .get_transfer_by_routing_id(&carol.channel_address, &RoutingId::from("0xr1"))
            .await
            .unwrap();
        assert!(hit.is_some());
        assert_eq!(engine.get_state_channels().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_collateral_switch() {
        let engine = engine();
        let channel = engine.open_channel("carol", "0xcarol", "0xeth", 10, 0);

        engine.set_collateral_enabled(false);
        engine
            .request_collateral(&channel.channel_address, "0xeth", 100)
            .await
            .unwrap();
        assert_eq!(
            engine.channel(&channel.channel_address).unwrap().balance_of("0xeth", 0),
            10
        );

        engine.set_collateral_enabled(true);
        engine
            .request_collateral(&channel.channel_address, "0xeth", 100)
            .await
            .unwrap();
        assert_eq!(
            engine.channel(&channel.channel_address).unwrap().balance_of("0xeth", 0),
            100
        );
        assert_eq!(engine.calls().len(), 2);
    }
}
