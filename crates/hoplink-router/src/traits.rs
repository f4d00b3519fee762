use async_trait::async_trait;
use hoplink_core::{
    Address, Channel, CreateTransferParams, EngineEvent, RoutingId, Transfer, TransferId,
    TransferResolver,
};
use tokio::sync::broadcast;

use crate::error::EngineError;

/// State-channel engine interface.
///
/// The engine owns channel state, signs updates, and emits events. The router
/// only reads channel snapshots and requests effects through this trait; it
/// never mutates balances itself.
#[async_trait]
pub trait ChannelEngine: Send + Sync {
    /// Subscribe to the engine's event stream.
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;

    /// Fetch one channel's current state.
    async fn get_state_channel(
        &self,
        channel_address: &str,
    ) -> Result<Option<Channel>, EngineError>;

    /// Addresses of every channel the router participates in.
    async fn get_state_channels(&self) -> Result<Vec<Address>, EngineError>;

    /// The router's channel with `counterparty` on `chain_id`, if any.
    async fn get_channel_by_counterparty(
        &self,
        counterparty: &str,
        chain_id: u64,
    ) -> Result<Option<Channel>, EngineError>;

    /// A transfer on `channel_address` carrying `routing_id`, if any.
    async fn get_transfer_by_routing_id(
        &self,
        channel_address: &str,
        routing_id: &RoutingId,
    ) -> Result<Option<Transfer>, EngineError>;

    /// Create a conditional transfer.
    async fn create_transfer(&self, params: CreateTransferParams) -> Result<Transfer, EngineError>;

    /// Resolve a conditional transfer with the given resolver.
    async fn resolve_transfer(
        &self,
        channel_address: &str,
        transfer_id: &TransferId,
        resolver: TransferResolver,
    ) -> Result<Transfer, EngineError>;

    /// Ask for the router's side of a channel to be topped up to `amount`.
    /// The deposit lands asynchronously; callers re-read the channel.
    async fn request_collateral(
        &self,
        channel_address: &str,
        asset_id: &str,
        amount: u128,
    ) -> Result<(), EngineError>;
}
