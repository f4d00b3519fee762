//! Channel engine backed by a channel node's REST server.

use async_trait::async_trait;
use hoplink_core::{
    Address, Channel, CreateTransferParams, EngineEvent, EngineEventKind, RoutingId, Transfer,
    TransferId, TransferResolver,
};
use hoplink_router::{ChannelEngine, EngineError};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

/// Speaks JSON to the channel node. Events are not polled: the node posts
/// them to the router's webhook endpoint, which hands them to [`publish`].
///
/// [`publish`]: RestChannelEngine::publish
pub struct RestChannelEngine {
    client: reqwest::Client,
    base_url: String,
    public_identifier: String,
    events: broadcast::Sender<EngineEvent>,
    event_capacity: usize,
    /// Serializes the capacity check with the send.
    publish_lock: Mutex<()>,
}

/// Why a webhook event could not be handed to the listener. The webhook
/// answers with an error so the channel node delivers the event again.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("no event listener is subscribed")]
    NoListener,

    #[error("event queue full ({queued} of {capacity} undelivered)")]
    QueueFull { queued: usize, capacity: usize },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTransferRequest<'a> {
    public_identifier: &'a str,
    #[serde(flatten)]
    params: &'a CreateTransferParams,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolveTransferRequest<'a> {
    public_identifier: &'a str,
    channel_address: &'a str,
    transfer_id: &'a TransferId,
    transfer_resolver: &'a TransferResolver,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestCollateralRequest<'a> {
    public_identifier: &'a str,
    channel_address: &'a str,
    asset_id: &'a str,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct NodeErrorBody {
    #[serde(default)]
    message: String,
}

impl RestChannelEngine {
    pub fn new(
        base_url: &str,
        public_identifier: &str,
        timeout: Duration,
        event_capacity: usize,
    ) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        let (events, _) = broadcast::channel(event_capacity);
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            public_identifier: public_identifier.to_string(),
            events,
            event_capacity,
            publish_lock: Mutex::new(()),
        })
    }

    /// Re-broadcast an event delivered by webhook. Returns the number of
    /// listeners that received it.
    ///
    /// An event is only accepted when a listener will see it: with nobody
    /// subscribed, or with a full queue that would make the slowest listener
    /// skip events, it is refused instead.
    pub async fn publish(&self, event: EngineEvent) -> Result<usize, PublishError> {
        let _guard = self.publish_lock.lock().await;
        if self.events.receiver_count() == 0 {
            return Err(PublishError::NoListener);
        }
        let queued = self.events.len();
        if queued >= self.event_capacity {
            return Err(PublishError::QueueFull {
                queued,
                capacity: self.event_capacity,
            });
        }
        self.events.send(event).map_err(|_| PublishError::NoListener)
    }

    /// Ask the channel node to post every event kind to `callback_base`.
    pub async fn register_webhooks(&self, callback_base: &str) -> Result<(), EngineError> {
        let callback_base = callback_base.trim_end_matches('/');
        let events: BTreeMap<&str, String> = EngineEventKind::ALL
            .iter()
            .map(|kind| {
                (
                    kind.as_str(),
                    format!("{callback_base}/api/v1/events/{}", kind.as_str().to_lowercase()),
                )
            })
            .collect();
        let body = json!({
            "publicIdentifier": self.public_identifier,
            "events": events,
        });
        let _: serde_json::Value = self.post("/event/subscribe", &body).await?;
        tracing::info!(callback_base, "registered engine webhooks");
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, EngineError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(response).await.map(Some)
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, EngineError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, EngineError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| EngineError::InvalidResponse(e.to_string()));
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<NodeErrorBody>(&text)
        .map(|b| b.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or(text);
    if status.is_server_error() {
        Err(EngineError::Transport(format!("{status}: {message}")))
    } else {
        Err(EngineError::Rejected(format!("{status}: {message}")))
    }
}

#[async_trait]
impl ChannelEngine for RestChannelEngine {
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    async fn get_state_channel(
        &self,
        channel_address: &str,
    ) -> Result<Option<Channel>, EngineError> {
        self.get(&format!(
            "/{}/channels/{channel_address}",
            self.public_identifier
        ))
        .await
    }

    async fn get_state_channels(&self) -> Result<Vec<Address>, EngineError> {
        Ok(self
            .get(&format!("/{}/channels", self.public_identifier))
            .await?
            .unwrap_or_default())
    }

    async fn get_channel_by_counterparty(
        &self,
        counterparty: &str,
        chain_id: u64,
    ) -> Result<Option<Channel>, EngineError> {
        self.get(&format!(
            "/{}/channels/counterparty/{counterparty}/chain-id/{chain_id}",
            self.public_identifier
        ))
        .await
    }

    async fn get_transfer_by_routing_id(
        &self,
        channel_address: &str,
        routing_id: &RoutingId,
    ) -> Result<Option<Transfer>, EngineError> {
        self.get(&format!(
            "/{}/channels/{channel_address}/transfers/routing-id/{routing_id}",
            self.public_identifier
        ))
        .await
    }

    async fn create_transfer(&self, params: CreateTransferParams) -> Result<Transfer, EngineError> {
        let body = CreateTransferRequest {
            public_identifier: &self.public_identifier,
            params: &params,
        };
        self.post("/transfers/create", &body).await
    }

    async fn resolve_transfer(
        &self,
        channel_address: &str,
        transfer_id: &TransferId,
        resolver: TransferResolver,
    ) -> Result<Transfer, EngineError> {
        let body = ResolveTransferRequest {
            public_identifier: &self.public_identifier,
            channel_address,
            transfer_id,
            transfer_resolver: &resolver,
        };
        self.post("/transfers/resolve", &body).await
    }

    async fn request_collateral(
        &self,
        channel_address: &str,
        asset_id: &str,
        amount: u128,
    ) -> Result<(), EngineError> {
        let body = RequestCollateralRequest {
            public_identifier: &self.public_identifier,
            channel_address,
            asset_id,
            amount: amount.to_string(),
        };
        let _: serde_json::Value = self.post("/request-collateral", &body).await?;
        Ok(())
    }
}
