//! Event listener: drives the forwarder from the channel engine's event
//! stream.

use hoplink_core::{DepositReconciledPayload, EngineEvent, TransferEventPayload};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::ForwardError;
use crate::forwarder::{ForwardReceipt, Forwarder};
use crate::metrics::RouterMetrics;

/// Subscribes to engine events, pre-filters them through the validation gate
/// and hands accepted ones to the forwarder, one task per event.
///
/// Failures are logged and counted here and go no further; a broken forward
/// never stops the subscription.
pub struct Listener {
    forwarder: Arc<Forwarder>,
    metrics: Arc<RouterMetrics>,
}

impl Listener {
    pub fn new(forwarder: Arc<Forwarder>, metrics: Arc<RouterMetrics>) -> Self {
        Self { forwarder, metrics }
    }

    /// Cheap pre-filter applied before any task is spawned.
    pub fn accepts(&self, event: &EngineEvent) -> bool {
        let gate = self.forwarder.gate();
        let (accepted, payload) = match event {
            EngineEvent::ConditionalTransferCreated(p) => (gate.is_forwardable_creation(p), p),
            EngineEvent::ConditionalTransferResolved(p) => (gate.is_forwardable_resolution(p), p),
            EngineEvent::DepositReconciled(_) => return true,
        };
        if !accepted {
            self.metrics
                .record_skipped(payload.transfer.transfer_id.as_str());
        }
        accepted
    }

    /// Handle one event end to end. `None` when the event was filtered out
    /// or has no forwarding action.
    pub async fn handle_event(
        &self,
        event: EngineEvent,
    ) -> Option<Result<ForwardReceipt, ForwardError>> {
        if !self.accepts(&event) {
            return None;
        }
        self.dispatch(event).await
    }

    /// Route an already accepted event.
    async fn dispatch(
        &self,
        event: EngineEvent,
    ) -> Option<Result<ForwardReceipt, ForwardError>> {
        match event {
            EngineEvent::ConditionalTransferCreated(payload) => Some(
                self.observe(
                    "creation",
                    &payload,
                    self.forwarder.forward_transfer_creation(&payload),
                )
                .await,
            ),
            EngineEvent::ConditionalTransferResolved(payload) => Some(
                self.observe(
                    "resolution",
                    &payload,
                    self.forwarder.forward_transfer_resolution(&payload),
                )
                .await,
            ),
            EngineEvent::DepositReconciled(payload) => {
                self.on_deposit_reconciled(&payload);
                None
            }
        }
    }

    /// Reserved hook for collateral-triggered rebalancing. Currently inert.
    fn on_deposit_reconciled(&self, payload: &DepositReconciledPayload) {
        tracing::debug!(
            channel_address = %payload.channel_address,
            asset_id = %payload.asset_id,
            "deposit reconciled"
        );
    }

    async fn observe(
        &self,
        direction: &'static str,
        payload: &TransferEventPayload,
        forward: impl Future<Output = Result<ForwardReceipt, ForwardError>>,
    ) -> Result<ForwardReceipt, ForwardError> {
        let transfer_id = payload.transfer.transfer_id.as_str();
        self.metrics.record_attempt(transfer_id);
        let started = Instant::now();

        let result = forward.await;
        self.metrics.record_latency(started.elapsed());

        match &result {
            Ok(receipt) => {
                self.metrics.record_success(transfer_id);
                tracing::info!(
                    direction,
                    transfer_id,
                    routing_id = %receipt.routing_id,
                    status = %receipt.status,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "forward completed"
                );
            }
            Err(e) => {
                self.metrics.record_failure(transfer_id);
                tracing::error!(
                    direction,
                    transfer_id,
                    channel_address = %payload.channel_address,
                    routing_id = payload.transfer.routing_id().unwrap_or_default(),
                    kind = e.kind(),
                    retryable = e.is_retryable(),
                    error = %e,
                    "forward failed"
                );
            }
        }
        result
    }

    /// Run the receive loop until the engine's sender is dropped.
    pub fn spawn(self: Arc<Self>, mut rx: broadcast::Receiver<EngineEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("event listener started");
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if !self.accepts(&event) {
                            continue;
                        }
                        let listener = self.clone();
                        tokio::spawn(async move {
                            listener.dispatch(event).await;
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Publishers refuse events once the queue is full, so
                        // this only happens with an engine that does not.
                        tracing::error!(missed = n, "event receiver lagged, events lost");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("engine event channel closed");
                        break;
                    }
                }
            }
        })
    }
}
