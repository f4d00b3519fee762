//! Forward records: the router's durable account of every hop it relays.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hoplink_core::{Address, RoutingId, TransferId};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Lifecycle of a forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardStatus {
    /// Accepted, outbound transfer not yet confirmed.
    Pending,
    /// Outbound mirror created.
    Forwarded,
    /// Inbound transfer resolved with the outbound resolver.
    Resolved,
    /// Gave up; see the record's failure.
    Failed,
}

impl std::fmt::Display for ForwardStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Forwarded => write!(f, "forwarded"),
            Self::Resolved => write!(f, "resolved"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Why a forward failed and whether redelivery may still succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardFailure {
    pub reason: String,
    pub retryable: bool,
}

/// Ties an inbound transfer to its outbound mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardRecord {
    pub routing_id: RoutingId,
    pub inbound_transfer_id: TransferId,
    pub inbound_channel_address: Address,
    pub outbound_transfer_id: Option<TransferId>,
    pub outbound_channel_address: Address,
    pub asset_id: Address,
    #[serde(with = "hoplink_core::types::u128_string")]
    pub amount: u128,
    pub status: ForwardStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ForwardFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ForwardRecord {
    /// A fresh record in `Pending`.
    pub fn pending(
        routing_id: RoutingId,
        inbound_transfer_id: TransferId,
        inbound_channel_address: Address,
        outbound_channel_address: Address,
        asset_id: Address,
        amount: u128,
    ) -> Self {
        let now = Utc::now();
        Self {
            routing_id,
            inbound_transfer_id,
            inbound_channel_address,
            outbound_transfer_id: None,
            outbound_channel_address,
            asset_id,
            amount,
            status: ForwardStatus::Pending,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a patch in place and bump `updated_at`.
    pub fn apply(&mut self, patch: &ForwardPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(id) = &patch.outbound_transfer_id {
            self.outbound_transfer_id = Some(id.clone());
        }
        if let Some(failure) = &patch.failure {
            self.failure = failure.clone();
        }
        self.updated_at = Utc::now();
    }

    /// Failed, but a redelivery may still go through.
    pub fn is_retryable(&self) -> bool {
        self.status == ForwardStatus::Failed
            && self.failure.as_ref().map(|f| f.retryable).unwrap_or(false)
    }
}

/// Partial update of a forward record. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardPatch {
    pub status: Option<ForwardStatus>,
    pub outbound_transfer_id: Option<TransferId>,
    /// `Some(None)` clears a previous failure.
    pub failure: Option<Option<ForwardFailure>>,
}

impl ForwardPatch {
    pub fn forwarded(outbound_transfer_id: TransferId) -> Self {
        Self {
            status: Some(ForwardStatus::Forwarded),
            outbound_transfer_id: Some(outbound_transfer_id),
            failure: Some(None),
        }
    }

    pub fn resolved() -> Self {
        Self {
            status: Some(ForwardStatus::Resolved),
            ..Default::default()
        }
    }

    pub fn failed(reason: impl Into<String>, retryable: bool) -> Self {
        Self {
            status: Some(ForwardStatus::Failed),
            outbound_transfer_id: None,
            failure: Some(Some(ForwardFailure {
                reason: reason.into(),
                retryable,
            })),
        }
    }

    /// Back to `Pending` for a retry, clearing the previous failure.
    pub fn pending() -> Self {
        Self {
            status: Some(ForwardStatus::Pending),
            outbound_transfer_id: None,
            failure: Some(None),
        }
    }
}

/// Result of `create_if_absent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOutcome {
    /// False when a record already existed; `record` is then the existing one.
    pub created: bool,
    pub record: ForwardRecord,
}

/// Durable forward record store keyed by routing id.
///
/// `create_if_absent` must be atomic: of two concurrent calls for the same
/// routing id exactly one observes `created == true`.
#[async_trait]
pub trait ForwardStore: Send + Sync {
    async fn get(&self, routing_id: &RoutingId) -> Result<Option<ForwardRecord>, StoreError>;

    async fn create_if_absent(&self, record: ForwardRecord) -> Result<CreateOutcome, StoreError>;

    /// Patch an existing record and return its new state.
    async fn update(
        &self,
        routing_id: &RoutingId,
        patch: ForwardPatch,
    ) -> Result<ForwardRecord, StoreError>;

    async fn list(&self) -> Result<Vec<ForwardRecord>, StoreError>;
}

/// In-process store. Records live as long as the process.
#[derive(Debug, Default)]
pub struct MemoryForwardStore {
    records: DashMap<RoutingId, ForwardRecord>,
}

impl MemoryForwardStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl ForwardStore for MemoryForwardStore {
    async fn get(&self, routing_id: &RoutingId) -> Result<Option<ForwardRecord>, StoreError> {
        Ok(self.records.get(routing_id).map(|r| r.value().clone()))
    }

    async fn create_if_absent(&self, record: ForwardRecord) -> Result<CreateOutcome, StoreError> {
        match self.records.entry(record.routing_id.clone()) {
            Entry::Occupied(existing) => Ok(CreateOutcome {
                created: false,
                record: existing.get().clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                tracing::debug!(routing_id = %record.routing_id, "forward record created");
                Ok(CreateOutcome {
                    created: true,
                    record,
                })
            }
        }
    }

    async fn update(
        &self,
        routing_id: &RoutingId,
        patch: ForwardPatch,
    ) -> Result<ForwardRecord, StoreError> {
        let mut entry = self
            .records
            .get_mut(routing_id)
            .ok_or_else(|| StoreError::NotFound(routing_id.clone()))?;
        let record = entry.value_mut();
        record.apply(&patch);
        tracing::debug!(routing_id = %routing_id, status = %record.status, "forward record updated");
        Ok(record.clone())
    }

    async fn list(&self) -> Result<Vec<ForwardRecord>, StoreError> {
        let mut records: Vec<ForwardRecord> =
            self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }
}
