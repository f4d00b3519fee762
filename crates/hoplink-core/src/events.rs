//! Events emitted by the channel engine that the router reacts to.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Address, Balance, Transfer};

/// The upstream event classes the router subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineEventKind {
    ConditionalTransferCreated,
    ConditionalTransferResolved,
    DepositReconciled,
}

impl EngineEventKind {
    pub const ALL: [EngineEventKind; 3] = [
        Self::ConditionalTransferCreated,
        Self::ConditionalTransferResolved,
        Self::DepositReconciled,
    ];

    /// Wire name used by the channel engine.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConditionalTransferCreated => "CONDITIONAL_TRANSFER_CREATED",
            Self::ConditionalTransferResolved => "CONDITIONAL_TRANSFER_RESOLVED",
            Self::DepositReconciled => "DEPOSIT_RECONCILED",
        }
    }

    /// Parse a wire name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for EngineEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of transfer created/resolved events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferEventPayload {
    pub channel_address: Address,
    pub transfer: Transfer,
}

/// Payload of a reconciled on-chain deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositReconciledPayload {
    pub channel_address: Address,
    pub asset_id: Address,
    pub channel_balance: Balance,
}

/// An event delivered by the channel engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    ConditionalTransferCreated(TransferEventPayload),
    ConditionalTransferResolved(TransferEventPayload),
    DepositReconciled(DepositReconciledPayload),
}

impl EngineEvent {
    pub fn kind(&self) -> EngineEventKind {
        match self {
            Self::ConditionalTransferCreated(_) => EngineEventKind::ConditionalTransferCreated,
            Self::ConditionalTransferResolved(_) => EngineEventKind::ConditionalTransferResolved,
            Self::DepositReconciled(_) => EngineEventKind::DepositReconciled,
        }
    }

    /// Build an event from its wire name and JSON payload.
    pub fn from_wire(
        kind: EngineEventKind,
        payload: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            EngineEventKind::ConditionalTransferCreated => {
                Self::ConditionalTransferCreated(serde_json::from_value(payload)?)
            }
            EngineEventKind::ConditionalTransferResolved => {
                Self::ConditionalTransferResolved(serde_json::from_value(payload)?)
            }
            EngineEventKind::DepositReconciled => {
                Self::DepositReconciled(serde_json::from_value(payload)?)
            }
        })
    }
}
