use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::CoreError;

/// On-chain style address (channel, signer, or asset).
pub type Address = String;

/// Serde helpers encoding `u128` amounts as decimal strings, the way the
/// channel engine puts them on the wire.
pub mod u128_string {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &u128, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u128, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<u128>().map_err(D::Error::custom)
    }

    /// Same encoding for a per-participant `[alice, bob]` pair.
    pub mod pair {
        use serde::{de::Error, Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(value: &[u128; 2], serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            use serde::ser::SerializeSeq;
            let mut seq = serializer.serialize_seq(Some(2))?;
            seq.serialize_element(&value[0].to_string())?;
            seq.serialize_element(&value[1].to_string())?;
            seq.end()
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<[u128; 2], D::Error>
        where
            D: Deserializer<'de>,
        {
            let [a, b] = <[String; 2]>::deserialize(deserializer)?;
            Ok([
                a.parse().map_err(D::Error::custom)?,
                b.parse().map_err(D::Error::custom)?,
            ])
        }
    }
}

/// Identifier of a single conditional transfer on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(pub String);

impl TransferId {
    /// Generate a fresh, time-ordered transfer id.
    pub fn generate() -> Self {
        Self(format!("0x{}", uuid::Uuid::now_v7().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransferId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Logical payment identifier, shared by every per-hop transfer of one payment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingId(pub String);

impl RoutingId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoutingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoutingId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Opaque unlocking payload of a conditional transfer.
///
/// The router never interprets it; it is relayed byte-for-byte from the
/// outbound hop to the inbound hop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferResolver(pub Value);

/// The router's own identity inside the channel network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterIdentity {
    /// Public identifier other participants use to address the router.
    pub public_identifier: String,
    /// Address the router signs channel updates with.
    pub signer_address: Address,
}

/// One remaining hop of a payment path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathHop {
    /// Public identifier of the hop's recipient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    /// Chain the recipient expects to be paid on, if different from the inbound hop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_chain_id: Option<u64>,
    /// Asset the recipient expects, if different from the inbound hop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_asset_id: Option<Address>,
    /// Hop fields this router does not interpret, carried to the next hop.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PathHop {
    pub fn to(recipient: impl Into<String>) -> Self {
        Self {
            recipient: Some(recipient.into()),
            recipient_chain_id: None,
            recipient_asset_id: None,
            extra: Map::new(),
        }
    }
}

/// Routing metadata attached to a forwardable transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterMeta {
    pub routing_id: RoutingId,
    pub path: Vec<PathHop>,
    /// Any other meta fields, carried to the next hop untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RouterMeta {
    /// Parse routing metadata out of a transfer's raw meta.
    pub fn from_value(meta: &Value) -> Result<Self, CoreError> {
        serde_json::from_value(meta.clone()).map_err(|e| CoreError::InvalidMeta(e.to_string()))
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// The hop this router must forward to.
    pub fn next_hop(&self) -> Option<&PathHop> {
        self.path.first()
    }

    /// Meta for the outbound transfer: the consumed hop is stripped, the
    /// routing id and every other field carried unchanged.
    pub fn advance(&self) -> Self {
        Self {
            routing_id: self.routing_id.clone(),
            path: self.path.iter().skip(1).cloned().collect(),
            extra: self.extra.clone(),
        }
    }
}

/// A conditional payment instance on one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub transfer_id: TransferId,
    pub channel_address: Address,
    pub chain_id: u64,
    pub initiator: Address,
    pub responder: Address,
    pub asset_id: Address,
    #[serde(with = "u128_string")]
    pub amount: u128,
    /// Relative timeout in seconds.
    #[serde(rename = "transferTimeout")]
    pub timeout: u64,
    /// Condition logic the engine evaluates the resolver against.
    pub transfer_definition: Address,
    /// Initial condition state (e.g. a lock hash), opaque to the router.
    pub transfer_state: Value,
    #[serde(default)]
    pub meta: Value,
    #[serde(default, rename = "transferResolver", skip_serializing_if = "Option::is_none")]
    pub resolver: Option<TransferResolver>,
}

impl Transfer {
    /// Routing metadata of this transfer, if it carries any.
    pub fn routing_meta(&self) -> Result<RouterMeta, CoreError> {
        RouterMeta::from_value(&self.meta)
    }

    /// Best-effort routing id lookup for log context.
    pub fn routing_id(&self) -> Option<&str> {
        self.meta.get("routingId").and_then(Value::as_str)
    }

    pub fn is_resolved(&self) -> bool {
        self.resolver.is_some()
    }
}

/// Per-asset balance split between the two channel participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Recipient addresses, `[alice, bob]`.
    pub to: [Address; 2],
    /// Amounts owned, `[alice, bob]`.
    #[serde(with = "u128_string::pair")]
    pub amount: [u128; 2],
}

/// A bilateral channel between the router and one counterparty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub channel_address: Address,
    pub chain_id: u64,
    pub alice: Address,
    pub bob: Address,
    pub alice_identifier: String,
    pub bob_identifier: String,
    pub asset_ids: Vec<Address>,
    /// Indexed like `asset_ids`.
    pub balances: Vec<Balance>,
    /// Channel dispute timeout in seconds.
    pub timeout: u64,
}

impl Channel {
    /// Participant index (0 = alice, 1 = bob) of the given public identifier.
    pub fn participant_index(&self, identifier: &str) -> Option<usize> {
        if self.alice_identifier == identifier {
            Some(0)
        } else if self.bob_identifier == identifier {
            Some(1)
        } else {
            None
        }
    }

    /// The other participant's public identifier.
    pub fn counterparty_identifier(&self, own_identifier: &str) -> Option<&str> {
        match self.participant_index(own_identifier)? {
            0 => Some(&self.bob_identifier),
            _ => Some(&self.alice_identifier),
        }
    }

    /// Balance held by the participant at `index` for `asset_id`.
    pub fn balance_of(&self, asset_id: &str, index: usize) -> u128 {
        self.asset_ids
            .iter()
            .position(|a| a == asset_id)
            .and_then(|pos| self.balances.get(pos))
            .and_then(|b| b.amount.get(index).copied())
            .unwrap_or(0)
    }
}

/// Parameters of the engine's create-transfer effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransferParams {
    pub channel_address: Address,
    pub asset_id: Address,
    #[serde(with = "u128_string")]
    pub amount: u128,
    pub timeout: u64,
    pub transfer_definition: Address,
    pub transfer_state: Value,
    pub meta: Value,
}
