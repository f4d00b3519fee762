//! Forwarding engine: mirrors conditional transfer creation and resolution
//! across one hop.

use hoplink_core::{
    Address, CreateTransferParams, ForwardingConfig, RoutingId, TransferEventPayload, TransferId,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::collateral::CollateralManager;
use crate::error::{ForwardError, Ineligible};
use crate::gate::ValidationGate;
use crate::locks::RoutingLocks;
use crate::store::{ForwardPatch, ForwardRecord, ForwardStatus, ForwardStore};
use crate::traits::ChannelEngine;

/// Attempts at recording an outbound transfer the engine already created.
const FORWARDED_UPDATE_ATTEMPTS: u32 = 3;
const FORWARDED_UPDATE_BACKOFF: Duration = Duration::from_millis(50);

/// Outcome of a successful forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForwardReceipt {
    pub routing_id: RoutingId,
    pub inbound_transfer_id: TransferId,
    pub inbound_channel_address: Address,
    pub outbound_transfer_id: Option<TransferId>,
    pub outbound_channel_address: Address,
    pub status: ForwardStatus,
}

impl From<&ForwardRecord> for ForwardReceipt {
    fn from(record: &ForwardRecord) -> Self {
        Self {
            routing_id: record.routing_id.clone(),
            inbound_transfer_id: record.inbound_transfer_id.clone(),
            inbound_channel_address: record.inbound_channel_address.clone(),
            outbound_transfer_id: record.outbound_transfer_id.clone(),
            outbound_channel_address: record.outbound_channel_address.clone(),
            status: record.status,
        }
    }
}

/// Relays transfers from an inbound channel to the next hop and resolutions
/// back again.
///
/// Every call runs under the routing id's lock, so creation and resolution of
/// the same payment never interleave. All outcomes are returned as `Result`;
/// logging of failures is left to the caller.
pub struct Forwarder {
    gate: Arc<ValidationGate>,
    collateral: CollateralManager,
    engine: Arc<dyn ChannelEngine>,
    store: Arc<dyn ForwardStore>,
    config: ForwardingConfig,
    locks: RoutingLocks,
}

impl Forwarder {
    pub fn new(
        gate: Arc<ValidationGate>,
        engine: Arc<dyn ChannelEngine>,
        store: Arc<dyn ForwardStore>,
        config: ForwardingConfig,
    ) -> Self {
        let collateral = CollateralManager::new(
            engine.clone(),
            gate.identity().public_identifier.clone(),
            &config,
        );
        Self {
            gate,
            collateral,
            engine,
            store,
            config,
            locks: RoutingLocks::new(),
        }
    }

    pub fn gate(&self) -> &ValidationGate {
        &self.gate
    }

    pub fn store(&self) -> &Arc<dyn ForwardStore> {
        &self.store
    }

    /// Mirror a "transfer created" event onto the next hop.
    pub async fn forward_transfer_creation(
        &self,
        payload: &TransferEventPayload,
    ) -> Result<ForwardReceipt, ForwardError> {
        let meta = self
            .gate
            .check_creation(payload)
            .map_err(ForwardError::NotForwardable)?;
        let transfer = &payload.transfer;
        let routing_id = meta.routing_id.clone();

        let _guard = self.locks.acquire(&routing_id).await;

        let existing = self.store.get(&routing_id).await?;
        if let Some(record) = &existing {
            match record.status {
                ForwardStatus::Forwarded | ForwardStatus::Resolved => {
                    tracing::info!(
                        routing_id = %routing_id,
                        status = %record.status,
                        "transfer already forwarded"
                    );
                    return Ok(ForwardReceipt::from(record));
                }
                ForwardStatus::Pending => {
                    if let Some(record) = self.reconcile_pending(record).await? {
                        return Ok(ForwardReceipt::from(&record));
                    }
                }
                ForwardStatus::Failed if !record.is_retryable() => {
                    return Err(ForwardError::PreviouslyFailed {
                        routing_id,
                        reason: record
                            .failure
                            .as_ref()
                            .map(|f| f.reason.clone())
                            .unwrap_or_default(),
                    });
                }
                ForwardStatus::Failed => {
                    tracing::info!(routing_id = %routing_id, "retrying forward");
                }
            }
        }

        let hop = meta
            .next_hop()
            .ok_or(ForwardError::NotForwardable(Ineligible::NoPath))?;
        let recipient = hop
            .recipient
            .clone()
            .ok_or(ForwardError::NotForwardable(Ineligible::NoPath))?;
        let chain_id = hop.recipient_chain_id.unwrap_or(transfer.chain_id);
        let asset_id = hop
            .recipient_asset_id
            .clone()
            .unwrap_or_else(|| transfer.asset_id.clone());

        let channel = match self
            .engine
            .get_channel_by_counterparty(&recipient, chain_id)
            .await?
        {
            Some(channel) => channel,
            None => {
                let err = ForwardError::NoRoute {
                    recipient,
                    chain_id,
                };
                if existing.is_some() {
                    return Err(self.fail(&routing_id, err).await);
                }
                return Err(err);
            }
        };

        let outcome = self
            .store
            .create_if_absent(ForwardRecord::pending(
                routing_id.clone(),
                transfer.transfer_id.clone(),
                payload.channel_address.clone(),
                channel.channel_address.clone(),
                asset_id.clone(),
                transfer.amount,
            ))
            .await?;
        if !outcome.created {
            self.store.update(&routing_id, ForwardPatch::pending()).await?;
        }

        let Some(timeout) = self.config.outbound_timeout(transfer.timeout) else {
            let err = ForwardError::TimeoutExhausted {
                inbound: transfer.timeout,
                decrement: self.config.transfer_decrement_secs,
                floor: self.config.min_transfer_timeout_secs,
            };
            return Err(self.fail(&routing_id, err).await);
        };

        if let Err(e) = self
            .collateral
            .ensure_collateral(&channel.channel_address, &asset_id, transfer.amount)
            .await
        {
            return Err(self.fail(&routing_id, e.into()).await);
        }

        let params = CreateTransferParams {
            channel_address: channel.channel_address.clone(),
            asset_id,
            amount: transfer.amount,
            timeout,
            transfer_definition: transfer.transfer_definition.clone(),
            transfer_state: transfer.transfer_state.clone(),
            meta: meta.advance().to_value(),
        };

        match self.engine.create_transfer(params).await {
            Ok(outbound) => {
                let record = self
                    .record_forwarded(&routing_id, &outbound.transfer_id)
                    .await?;
                tracing::info!(
                    routing_id = %routing_id,
                    inbound_transfer_id = %transfer.transfer_id,
                    outbound_transfer_id = %outbound.transfer_id,
                    outbound_channel = %channel.channel_address,
                    timeout,
                    "transfer forwarded"
                );
                Ok(ForwardReceipt::from(&record))
            }
            Err(e) => Err(self.fail(&routing_id, ForwardError::EngineEffect(e)).await),
        }
    }

    /// Mirror a "transfer resolved" event from the outbound hop back onto
    /// the inbound transfer.
    pub async fn forward_transfer_resolution(
        &self,
        payload: &TransferEventPayload,
    ) -> Result<ForwardReceipt, ForwardError> {
        let (meta, resolver) = self
            .gate
            .check_resolution(payload)
            .map_err(ForwardError::NotForwardable)?;
        let transfer = &payload.transfer;
        let routing_id = meta.routing_id;

        let _guard = self.locks.acquire(&routing_id).await;

        let mut record = self.store.get(&routing_id).await?;
        // The outbound transfer exists but its id was never recorded.
        if let Some(pending) = record.clone().filter(|r| {
            r.status == ForwardStatus::Pending
                && r.outbound_channel_address == transfer.channel_address
        }) {
            if let Some(reconciled) = self.reconcile_pending(&pending).await? {
                record = Some(reconciled);
            }
        }

        let record = match record {
            Some(record)
                if record.outbound_transfer_id.as_ref() == Some(&transfer.transfer_id) =>
            {
                record
            }
            _ => {
                return Err(ForwardError::UnknownForward {
                    routing_id,
                    transfer_id: transfer.transfer_id.clone(),
                })
            }
        };

        if record.status == ForwardStatus::Resolved {
            tracing::info!(routing_id = %routing_id, "transfer already resolved");
            return Ok(ForwardReceipt::from(&record));
        }

        self.engine
            .resolve_transfer(
                &record.inbound_channel_address,
                &record.inbound_transfer_id,
                resolver,
            )
            .await?;

        let record = self.store.update(&routing_id, ForwardPatch::resolved()).await?;
        tracing::info!(
            routing_id = %routing_id,
            inbound_transfer_id = %record.inbound_transfer_id,
            inbound_channel = %record.inbound_channel_address,
            "transfer resolved"
        );
        Ok(ForwardReceipt::from(&record))
    }

    /// Reconcile every `pending` record left behind by an interrupted run.
    ///
    /// Returns the number of records that turned out to be forwarded.
    pub async fn recover_pending(&self) -> Result<usize, ForwardError> {
        let mut recovered = 0;
        for record in self.store.list().await? {
            if record.status != ForwardStatus::Pending {
                continue;
            }
            let _guard = self.locks.acquire(&record.routing_id).await;
            // Re-read under the lock; a live event may have moved it on.
            let Some(record) = self.store.get(&record.routing_id).await? else {
                continue;
            };
            if record.status != ForwardStatus::Pending {
                continue;
            }
            if self.reconcile_pending(&record).await?.is_some() {
                recovered += 1;
            } else {
                self.store
                    .update(
                        &record.routing_id,
                        ForwardPatch::failed("interrupted before outbound creation", true),
                    )
                    .await?;
            }
        }
        if recovered > 0 {
            tracing::info!(recovered, "recovered pending forwards");
        }
        Ok(recovered)
    }

    /// Record the outbound transfer id, retrying briefly. The outbound
    /// transfer already exists, so a record left `pending` here is picked up
    /// again by reconciliation.
    async fn record_forwarded(
        &self,
        routing_id: &RoutingId,
        outbound_transfer_id: &TransferId,
    ) -> Result<ForwardRecord, ForwardError> {
        let mut attempt = 1;
        loop {
            match self
                .store
                .update(routing_id, ForwardPatch::forwarded(outbound_transfer_id.clone()))
                .await
            {
                Ok(record) => return Ok(record),
                Err(e) if attempt < FORWARDED_UPDATE_ATTEMPTS => {
                    tracing::warn!(
                        routing_id = %routing_id,
                        outbound_transfer_id = %outbound_transfer_id,
                        attempt,
                        error = %e,
                        "failed to record forwarded transfer, retrying"
                    );
                    tokio::time::sleep(FORWARDED_UPDATE_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        routing_id = %routing_id,
                        outbound_transfer_id = %outbound_transfer_id,
                        error = %e,
                        "outbound transfer created but not recorded; left pending"
                    );
                    return Err(e.into());
                }
            }
        }
    }

    /// A pending record whose outbound transfer already exists on the
    /// engine is promoted to `forwarded`.
    async fn reconcile_pending(
        &self,
        record: &ForwardRecord,
    ) -> Result<Option<ForwardRecord>, ForwardError> {
        let outbound = self
            .engine
            .get_transfer_by_routing_id(&record.outbound_channel_address, &record.routing_id)
            .await?;
        let Some(outbound) = outbound else {
            return Ok(None);
        };
        let record = self
            .store
            .update(&record.routing_id, ForwardPatch::forwarded(outbound.transfer_id.clone()))
            .await?;
        tracing::info!(
            routing_id = %record.routing_id,
            outbound_transfer_id = %outbound.transfer_id,
            "pending forward reconciled with engine"
        );
        Ok(Some(record))
    }

    /// Mark the record failed and hand the error back.
    async fn fail(&self, routing_id: &RoutingId, err: ForwardError) -> ForwardError {
        let patch = ForwardPatch::failed(err.to_string(), err.is_retryable());
        if let Err(e) = self.store.update(routing_id, patch).await {
            tracing::warn!(routing_id = %routing_id, error = %e, "failed to record forward failure");
        }
        err
    }
}
