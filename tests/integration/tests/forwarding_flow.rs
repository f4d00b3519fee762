//! Integration test: end-to-end forwarding across the router.
//!
//! Drives the listener and forwarder from in-memory engine events, the way a
//! live channel node would deliver them.

use std::sync::Arc;

use hoplink_core::{EngineEvent, TransferEventPayload, TransferId, TransferResolver};
use hoplink_integration_tests::{routing_id, Line, ASSET, ROUTER_SIGNER};
use hoplink_router::adapters::memory::EngineCall;
use hoplink_router::metrics::{FORWARD_ATTEMPTS, FORWARD_FAILED, FORWARD_SUCCESS};
use hoplink_router::{
    ChannelEngine, ForwardError, ForwardRecord, ForwardStatus, ForwardStore, MemoryForwardStore,
};
use serde_json::json;

fn created(line: &Line, transfer: hoplink_core::Transfer) -> EngineEvent {
    EngineEvent::ConditionalTransferCreated(TransferEventPayload {
        channel_address: line.inbound.clone(),
        transfer,
    })
}

// =========================================================================
// Scenario A: forward with sufficient collateral
// =========================================================================

#[tokio::test]
async fn test_forward_with_sufficient_collateral() {
    let line = Line::new(1_000, 1_000);
    let routing = routing_id(1);
    let inbound = line.transfer("0xt1", &routing, 100);

    let receipt = line
        .listener
        .handle_event(created(&line, inbound.clone()))
        .await
        .expect("event accepted")
        .expect("forward succeeds");

    assert_eq!(receipt.status, ForwardStatus::Forwarded);
    assert_eq!(receipt.inbound_transfer_id, TransferId::from("0xt1"));
    assert_eq!(receipt.outbound_channel_address, line.outbound);

    let creates: Vec<_> = line
        .engine
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            EngineCall::CreateTransfer(params) => Some(params),
            _ => None,
        })
        .collect();
    assert_eq!(creates.len(), 1);
    let params = &creates[0];
    assert_eq!(params.channel_address, line.outbound);
    assert_eq!(params.amount, 100);
    assert_eq!(params.asset_id, ASSET);
    assert_eq!(params.timeout, 86_400 - 4_320);
    assert_eq!(params.transfer_definition, inbound.transfer_definition);
    assert_eq!(params.transfer_state, inbound.transfer_state);
    assert_eq!(params.meta["routingId"], routing.as_str());
    assert_eq!(params.meta["path"], json!([]));
    assert_eq!(params.meta["requireOnline"], true);

    // Router's collateral towards carol is now locked in the outbound hop.
    assert_eq!(line.router_balance(&line.outbound), 900);

    let record = line.store.get(&routing).await.unwrap().unwrap();
    assert_eq!(record.status, ForwardStatus::Forwarded);
    assert_eq!(record.outbound_transfer_id, receipt.outbound_transfer_id);

    assert_eq!(line.metrics.counter_for(FORWARD_ATTEMPTS, "0xt1"), 1);
    assert_eq!(line.metrics.counter_for(FORWARD_SUCCESS, "0xt1"), 1);
}

// =========================================================================
// Scenario B: insufficient collateral
// =========================================================================

#[tokio::test]
async fn test_insufficient_collateral_blocks_forward() {
    let line = Line::new(1_000, 50);
    line.engine.set_collateral_enabled(false);
    let routing = routing_id(2);

    let err = line
        .listener
        .handle_event(created(&line, line.transfer("0xt2", &routing, 100)))
        .await
        .expect("event accepted")
        .unwrap_err();

    match &err {
        ForwardError::InsufficientCollateral {
            required,
            available,
            ..
        } => {
            assert_eq!(*required, 100);
            assert_eq!(*available, 50);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(line.engine.create_count(), 0);
    assert!(line
        .engine
        .calls()
        .iter()
        .all(|c| matches!(c, EngineCall::RequestCollateral { .. })));

    let record = line.store.get(&routing).await.unwrap().unwrap();
    assert_eq!(record.status, ForwardStatus::Failed);
    assert!(record.is_retryable());
    assert_eq!(line.metrics.counter_for(FORWARD_FAILED, "0xt2"), 1);
}

#[tokio::test]
async fn test_redelivery_after_collateral_arrives() {
    let line = Line::new(1_000, 50);
    line.engine.set_collateral_enabled(false);
    let routing = routing_id(3);
    let transfer = line.transfer("0xt3", &routing, 100);

    let first = line
        .listener
        .handle_event(created(&line, transfer.clone()))
        .await
        .unwrap();
    assert!(first.is_err());

    line.engine.set_collateral_enabled(true);
    let receipt = line
        .listener
        .handle_event(created(&line, transfer))
        .await
        .unwrap()
        .expect("retry succeeds");
    assert_eq!(receipt.status, ForwardStatus::Forwarded);
    assert_eq!(line.engine.create_count(), 1);

    let record = line.store.get(&routing).await.unwrap().unwrap();
    assert!(record.failure.is_none());
}

// =========================================================================
// Scenario C: resolver pass-through
// =========================================================================

#[tokio::test]
async fn test_outbound_resolution_unlocks_inbound() {
    let line = Line::new(1_000, 1_000);
    let listener_task = line.spawn_listener();
    let routing = routing_id(4);

    line.engine
        .inject_transfer(line.transfer("0xt4", &routing, 100))
        .unwrap();
    let record = line.wait_for(&routing, ForwardStatus::Forwarded).await;
    let outbound_id = record.outbound_transfer_id.clone().unwrap();

    let resolver = TransferResolver(json!({ "preImage": "0x5a5a" }));
    line.engine
        .resolve_as_counterparty(&outbound_id, resolver.clone())
        .unwrap();
    line.wait_for(&routing, ForwardStatus::Resolved).await;

    let inbound = line.engine.transfer(&TransferId::from("0xt4")).unwrap();
    assert_eq!(inbound.resolver, Some(resolver.clone()));
    // The router is paid on the inbound channel.
    assert_eq!(line.router_balance(&line.inbound), 100);

    let resolves: Vec<_> = line
        .engine
        .calls()
        .into_iter()
        .filter(|c| matches!(c, EngineCall::ResolveTransfer { .. }))
        .collect();
    assert_eq!(
        resolves,
        vec![EngineCall::ResolveTransfer {
            channel_address: line.inbound.clone(),
            transfer_id: TransferId::from("0xt4"),
            resolver: resolver.clone(),
        }]
    );

    // Redelivery of the outbound resolution is answered from the record.
    let outbound = line.engine.transfer(&outbound_id).unwrap();
    let payload = TransferEventPayload {
        channel_address: line.outbound.clone(),
        transfer: outbound,
    };
    let receipt = line
        .forwarder
        .forward_transfer_resolution(&payload)
        .await
        .unwrap();
    assert_eq!(receipt.status, ForwardStatus::Resolved);
    assert_eq!(receipt.outbound_transfer_id, Some(outbound_id));
    assert_eq!(
        line.engine
            .calls()
            .iter()
            .filter(|c| matches!(c, EngineCall::ResolveTransfer { .. }))
            .count(),
        1
    );

    listener_task.abort();
}

// =========================================================================
// Scenario D: self-initiated transfers are ignored
// =========================================================================

#[tokio::test]
async fn test_self_initiated_event_is_filtered() {
    let line = Line::new(1_000, 1_000);
    let mut transfer = line.transfer("0xt5", &routing_id(5), 100);
    transfer.initiator = ROUTER_SIGNER.into();
    transfer.responder = "0xalice".into();
    let event = created(&line, transfer);

    assert!(!line.listener.accepts(&event));
    assert!(line.listener.handle_event(event).await.is_none());
    assert!(line.engine.calls().is_empty());
    assert!(line.store.list().await.unwrap().is_empty());
    assert_eq!(line.metrics.counter_for(FORWARD_ATTEMPTS, "0xt5"), 0);
}

// =========================================================================
// Idempotency and ordering
// =========================================================================

#[tokio::test]
async fn test_duplicate_creation_forwards_once() {
    let line = Line::new(1_000, 1_000);
    let routing = routing_id(6);
    let transfer = line.transfer("0xt6", &routing, 100);

    let first = line
        .listener
        .handle_event(created(&line, transfer.clone()))
        .await
        .unwrap()
        .unwrap();
    let second = line
        .listener
        .handle_event(created(&line, transfer))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(line.engine.create_count(), 1);
}

#[tokio::test]
async fn test_concurrent_duplicates_forward_once() {
    let line = Line::new(1_000, 1_000);
    let routing = routing_id(7);
    let payload = TransferEventPayload {
        channel_address: line.inbound.clone(),
        transfer: line.transfer("0xt7", &routing, 100),
    };

    let mut handles = Vec::new();
    for _ in 0..8 {
        let forwarder = line.forwarder.clone();
        let payload = payload.clone();
        handles.push(tokio::spawn(async move {
            forwarder.forward_transfer_creation(&payload).await
        }));
    }
    let mut outbound_ids = Vec::new();
    for handle in handles {
        let receipt = handle.await.unwrap().unwrap();
        outbound_ids.push(receipt.outbound_transfer_id);
    }

    assert_eq!(line.engine.create_count(), 1);
    outbound_ids.dedup();
    assert_eq!(outbound_ids.len(), 1);
}

#[tokio::test]
async fn test_resolution_without_forward_is_unknown() {
    let line = Line::new(1_000, 1_000);
    let routing = routing_id(8);
    let mut transfer = line.transfer("0xout8", &routing, 100);
    transfer.channel_address = line.outbound.clone();
    transfer.initiator = ROUTER_SIGNER.into();
    transfer.responder = "0xcarol".into();
    transfer.resolver = Some(TransferResolver(json!({ "preImage": "0x01" })));

    let err = line
        .forwarder
        .forward_transfer_resolution(&TransferEventPayload {
            channel_address: line.outbound.clone(),
            transfer,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ForwardError::UnknownForward { .. }));
    assert!(line.engine.calls().is_empty());
}

#[tokio::test]
async fn test_exhausted_timeout_is_terminal() {
    let line = Line::new(1_000, 1_000);
    let routing = routing_id(9);
    let mut transfer = line.transfer("0xt9", &routing, 100);
    transfer.timeout = 43_200 + 4_320 - 1;

    let err = line
        .listener
        .handle_event(created(&line, transfer.clone()))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, ForwardError::TimeoutExhausted { .. }));
    assert_eq!(line.engine.create_count(), 0);

    let record = line.store.get(&routing).await.unwrap().unwrap();
    assert_eq!(record.status, ForwardStatus::Failed);
    assert!(!record.is_retryable());

    let again = line
        .listener
        .handle_event(created(&line, transfer))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(again, ForwardError::PreviouslyFailed { .. }));
}

// =========================================================================
// Concurrency across routing ids
// =========================================================================

#[tokio::test]
async fn test_many_payments_forward_independently() {
    let line = Line::new(10_000, 10_000);
    let listener_task = line.spawn_listener();

    let count = 20u64;
    for n in 0..count {
        line.engine
            .inject_transfer(line.transfer(&format!("0xc{n}"), &routing_id(100 + n), 10))
            .unwrap();
    }
    for n in 0..count {
        line.wait_for(&routing_id(100 + n), ForwardStatus::Forwarded)
            .await;
    }

    assert_eq!(line.engine.create_count(), count as usize);
    assert_eq!(line.router_balance(&line.outbound), 10_000 - 10 * count as u128);
    listener_task.abort();
}

// =========================================================================
// Crash recovery
// =========================================================================

#[tokio::test]
async fn test_restart_reconciles_pending_records() {
    let first = Line::new(1_000, 1_000);
    let store: Arc<dyn ForwardStore> = Arc::new(MemoryForwardStore::new());

    // Outbound transfer created, process died before recording it.
    let created_routing = routing_id(20);
    let inbound = first.transfer("0xt20", &created_routing, 100);
    let outbound = first
        .engine
        .create_transfer(hoplink_core::CreateTransferParams {
            channel_address: first.outbound.clone(),
            asset_id: ASSET.into(),
            amount: 100,
            timeout: 82_080,
            transfer_definition: inbound.transfer_definition.clone(),
            transfer_state: inbound.transfer_state.clone(),
            meta: json!({ "routingId": created_routing.as_str(), "path": [] }),
        })
        .await
        .unwrap();
    store
        .create_if_absent(ForwardRecord::pending(
            created_routing.clone(),
            inbound.transfer_id.clone(),
            first.inbound.clone(),
            first.outbound.clone(),
            ASSET.into(),
            100,
        ))
        .await
        .unwrap();

    // Process died before the outbound create.
    let lost_routing = routing_id(21);
    let lost = first.transfer("0xt21", &lost_routing, 100);
    store
        .create_if_absent(ForwardRecord::pending(
            lost_routing.clone(),
            lost.transfer_id.clone(),
            first.inbound.clone(),
            first.outbound.clone(),
            ASSET.into(),
            100,
        ))
        .await
        .unwrap();

    let restarted = Line::with_parts(
        first.engine.clone(),
        store,
        first.inbound.clone(),
        first.outbound.clone(),
    );
    let recovered = restarted.forwarder.recover_pending().await.unwrap();
    assert_eq!(recovered, 1);

    let record = restarted.store.get(&created_routing).await.unwrap().unwrap();
    assert_eq!(record.status, ForwardStatus::Forwarded);
    assert_eq!(record.outbound_transfer_id, Some(outbound.transfer_id));

    let record = restarted.store.get(&lost_routing).await.unwrap().unwrap();
    assert_eq!(record.status, ForwardStatus::Failed);
    assert!(record.is_retryable());

    // Redelivery of the lost payment forwards it exactly once.
    let creates_before = restarted.engine.create_count();
    let receipt = restarted
        .listener
        .handle_event(created(&restarted, lost))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(receipt.status, ForwardStatus::Forwarded);
    assert_eq!(restarted.engine.create_count(), creates_before + 1);
}
