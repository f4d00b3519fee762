//! Collateral sufficiency checks for outbound channels.

use hoplink_core::{Address, Channel, ForwardingConfig};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CollateralError;
use crate::traits::ChannelEngine;

/// The router's spendable balance of one asset in one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollateralSnapshot {
    pub channel_address: Address,
    pub asset_id: Address,
    pub available: u128,
}

/// The router's side of `channel` for `asset_id`.
///
/// The router is alice when its identifier matches `alice_identifier`,
/// otherwise bob.
pub fn available_balance(channel: &Channel, public_identifier: &str, asset_id: &str) -> u128 {
    let index = if channel.alice_identifier == public_identifier {
        0
    } else {
        1
    };
    channel.balance_of(asset_id, index)
}

/// Snapshots for every asset of a channel.
pub fn channel_snapshots(channel: &Channel, public_identifier: &str) -> Vec<CollateralSnapshot> {
    channel
        .asset_ids
        .iter()
        .map(|asset_id| CollateralSnapshot {
            channel_address: channel.channel_address.clone(),
            asset_id: asset_id.clone(),
            available: available_balance(channel, public_identifier, asset_id),
        })
        .collect()
}

/// Guarantees the router holds enough balance in an outbound channel before
/// a forward reaches the engine.
pub struct CollateralManager {
    engine: Arc<dyn ChannelEngine>,
    public_identifier: String,
    attempts: u32,
    retry_interval: Duration,
}

impl CollateralManager {
    pub fn new(
        engine: Arc<dyn ChannelEngine>,
        public_identifier: impl Into<String>,
        config: &ForwardingConfig,
    ) -> Self {
        Self {
            engine,
            public_identifier: public_identifier.into(),
            attempts: config.collateral_attempts,
            retry_interval: config.collateral_retry_interval(),
        }
    }

    /// Current snapshot of one channel/asset pair.
    pub async fn snapshot(
        &self,
        channel_address: &str,
        asset_id: &str,
    ) -> Result<CollateralSnapshot, CollateralError> {
        let channel = self
            .engine
            .get_state_channel(channel_address)
            .await?
            .ok_or_else(|| CollateralError::ChannelNotFound(channel_address.to_string()))?;
        Ok(CollateralSnapshot {
            channel_address: channel_address.to_string(),
            asset_id: asset_id.to_string(),
            available: available_balance(&channel, &self.public_identifier, asset_id),
        })
    }

    /// Succeeds once the router's side of the channel holds at least
    /// `amount` of `asset_id`.
    ///
    /// When short, requests collateral from the engine and re-checks, up to
    /// the configured number of attempts.
    pub async fn ensure_collateral(
        &self,
        channel_address: &str,
        asset_id: &str,
        amount: u128,
    ) -> Result<CollateralSnapshot, CollateralError> {
        let mut snapshot = self.snapshot(channel_address, asset_id).await?;
        if snapshot.available >= amount {
            return Ok(snapshot);
        }

        for attempt in 1..=self.attempts {
            tracing::info!(
                channel_address,
                asset_id,
                required = %amount,
                available = %snapshot.available,
                attempt,
                "requesting collateral"
            );

            if let Err(e) = self
                .engine
                .request_collateral(channel_address, asset_id, amount)
                .await
            {
                tracing::warn!(channel_address, asset_id, attempt, error = %e, "collateral request failed");
            }

            if !self.retry_interval.is_zero() {
                tokio::time::sleep(self.retry_interval).await;
            }

            snapshot = self.snapshot(channel_address, asset_id).await?;
            if snapshot.available >= amount {
                tracing::info!(channel_address, asset_id, attempt, "channel collateralized");
                return Ok(snapshot);
            }
        }

        Err(CollateralError::Insufficient {
            channel_address: channel_address.to_string(),
            asset_id: asset_id.to_string(),
            required: amount,
            available: snapshot.available,
        })
    }
}
