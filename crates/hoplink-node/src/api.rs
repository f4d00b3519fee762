//! HTTP API server for the routing node.
//!
//! Provides node status, forward record lookup, Prometheus metrics and the
//! webhook endpoint the channel node posts its events to.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use hoplink_core::{EngineEvent, EngineEventKind, RoutingId};
use hoplink_router::{ForwardRecord, ForwardStatus};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::state::NodeState;

// --- Response types ---

#[derive(Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub public_identifier: String,
    pub signer_address: String,
    pub uptime_secs: u64,
    pub forwards: BTreeMap<String, usize>,
}

#[derive(Serialize)]
pub struct EventAccepted {
    pub event: String,
    pub delivered: usize,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

// --- Handlers ---

async fn handle_status(
    State(state): State<Arc<NodeState>>,
) -> Result<Json<StatusResponse>, ApiError> {
    let records = state
        .store
        .list()
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let mut forwards: BTreeMap<String, usize> = [
        ForwardStatus::Pending,
        ForwardStatus::Forwarded,
        ForwardStatus::Resolved,
        ForwardStatus::Failed,
    ]
    .iter()
    .map(|s| (s.to_string(), 0))
    .collect();
    for record in &records {
        *forwards.entry(record.status.to_string()).or_default() += 1;
    }

    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        public_identifier: state.identity.public_identifier.clone(),
        signer_address: state.identity.signer_address.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        forwards,
    }))
}

async fn handle_forward(
    State(state): State<Arc<NodeState>>,
    Path(routing_id): Path<String>,
) -> Result<Json<ForwardRecord>, ApiError> {
    let routing_id = RoutingId(routing_id);
    match state.store.get(&routing_id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("no forward for routing id {routing_id}"),
        )),
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

async fn handle_metrics(State(state): State<Arc<NodeState>>) -> String {
    state.metrics.render()
}

async fn handle_event(
    State(state): State<Arc<NodeState>>,
    Path(event): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<EventAccepted>), ApiError> {
    let kind = EngineEventKind::parse(&event)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("unknown event '{event}'")))?;
    let event = EngineEvent::from_wire(kind, payload).map_err(|e| {
        tracing::warn!(event = %kind, error = %e, "rejected malformed webhook payload");
        api_error(StatusCode::BAD_REQUEST, format!("invalid {kind} payload: {e}"))
    })?;

    // Refusing lets the channel node redeliver; an accepted event must reach
    // the listener.
    let delivered = state.engine.publish(event).await.map_err(|e| {
        tracing::warn!(event = %kind, error = %e, "webhook event refused");
        api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
    })?;
    tracing::debug!(event = %kind, delivered, "webhook event received");
    Ok((
        StatusCode::ACCEPTED,
        Json(EventAccepted {
            event: kind.to_string(),
            delivered,
        }),
    ))
}

// --- Server ---

pub fn build_router(state: Arc<NodeState>) -> Router {
    Router::new()
        .route("/api/v1/status", get(handle_status))
        .route("/api/v1/forwards/{routing_id}", get(handle_forward))
        .route("/api/v1/events/{event}", post(handle_event))
        .route("/metrics", get(handle_metrics))
        .with_state(state)
}

pub async fn start_api_server(
    listen_addr: SocketAddr,
    state: Arc<NodeState>,
) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(%listen_addr, "HTTP API server started");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::RestChannelEngine;
    use hoplink_core::{RouterIdentity, TransferId};
    use hoplink_router::{ChannelEngine, ForwardPatch, ForwardStore, MemoryForwardStore, RouterMetrics};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        base: String,
        store: Arc<MemoryForwardStore>,
        metrics: Arc<RouterMetrics>,
        engine: Arc<RestChannelEngine>,
        client: reqwest::Client,
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryForwardStore::new());
        let metrics = Arc::new(RouterMetrics::new());
        let engine = Arc::new(
            RestChannelEngine::new("http://127.0.0.1:1", "router", Duration::from_secs(1), 16)
                .unwrap(),
        );
        let state = Arc::new(NodeState::new(
            RouterIdentity {
                public_identifier: "router".into(),
                signer_address: "0xrouter".into(),
            },
            store.clone(),
            metrics.clone(),
            engine.clone(),
        ));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = build_router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Harness {
            base: format!("http://{addr}"),
            store,
            metrics,
            engine,
            client: reqwest::Client::new(),
        }
    }

    fn record(routing_id: &str) -> ForwardRecord {
        ForwardRecord::pending(
            RoutingId::from(routing_id),
            TransferId::from("0xin"),
            "0xinbound".into(),
            "0xoutbound".into(),
            "0xeth".into(),
            100,
        )
    }

    #[tokio::test]
    async fn test_status_counts_forwards() {
        let h = harness().await;
        h.store.create_if_absent(record("0xr1")).await.unwrap();
        h.store.create_if_absent(record("0xr2")).await.unwrap();
        h.store
            .update(&RoutingId::from("0xr2"), ForwardPatch::forwarded(TransferId::from("0xout")))
            .await
            .unwrap();

        let body: serde_json::Value = h
            .client
            .get(format!("{}/api/v1/status", h.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["public_identifier"], "router");
        assert_eq!(body["forwards"]["pending"], 1);
        assert_eq!(body["forwards"]["forwarded"], 1);
        assert_eq!(body["forwards"]["failed"], 0);
    }

    #[tokio::test]
    async fn test_forward_lookup() {
        let h = harness().await;
        h.store.create_if_absent(record("0xr1")).await.unwrap();

        let found = h
            .client
            .get(format!("{}/api/v1/forwards/0xr1", h.base))
            .send()
            .await
            .unwrap();
        assert!(found.status().is_success());
        let body: serde_json::Value = found.json().await.unwrap();
        assert_eq!(body["status"], "pending");
        assert_eq!(body["amount"], "100");

        let missing = h
            .client
            .get(format!("{}/api/v1/forwards/0xnope", h.base))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_exposition() {
        let h = harness().await;
        h.metrics.record_attempt("0xt1");
        let text = h
            .client
            .get(format!("{}/metrics", h.base))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(text.contains("forward_attempts_total"));
        assert!(text.contains("0xt1"));
    }

    #[tokio::test]
    async fn test_webhook_republishes_event() {
        let h = harness().await;
        let mut rx = h.engine.subscribe();

        let response = h
            .client
            .post(format!("{}/api/v1/events/deposit_reconciled", h.base))
            .json(&json!({
                "channelAddress": "0xchannel",
                "assetId": "0xeth",
                "channelBalance": { "to": ["0xrouter", "0xcarol"], "amount": ["10", "0"] }
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), EngineEventKind::DepositReconciled);
    }

    #[tokio::test]
    async fn test_webhook_unavailable_without_listener() {
        let h = harness().await;

        let response = h
            .client
            .post(format!("{}/api/v1/events/deposit_reconciled", h.base))
            .json(&json!({
                "channelAddress": "0xchannel",
                "assetId": "0xeth",
                "channelBalance": { "to": ["0xrouter", "0xcarol"], "amount": ["10", "0"] }
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("no event listener"));
    }

    #[tokio::test]
    async fn test_webhook_rejects_bad_input() {
        let h = harness().await;

        let unknown = h
            .client
            .post(format!("{}/api/v1/events/is_alive", h.base))
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(unknown.status(), reqwest::StatusCode::NOT_FOUND);

        let malformed = h
            .client
            .post(format!("{}/api/v1/events/conditional_transfer_created", h.base))
            .json(&json!({ "channelAddress": "0xchannel" }))
            .send()
            .await
            .unwrap();
        assert_eq!(malformed.status(), reqwest::StatusCode::BAD_REQUEST);
    }
}
