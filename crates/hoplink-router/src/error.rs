use hoplink_core::{Address, RoutingId, TransferId};
use std::fmt;

/// Why an event is not eligible for forwarding.
///
/// This is a filtered no-op, not a failure: most engine events the router
/// sees are not its to forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ineligible {
    /// Meta does not satisfy the routing-meta schema.
    InvalidMeta(Vec<String>),
    /// The router initiated the transfer itself.
    SelfInitiated,
    /// No remaining hop, or the first hop has no recipient.
    NoPath,
    /// The router is the payment's final recipient.
    FinalRecipient,
    /// A resolution event without a resolver.
    NoResolver,
    /// The router is the responder, so there is nothing to reclaim.
    SelfResponder,
}

impl fmt::Display for Ineligible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMeta(errors) => write!(f, "invalid routing meta: {}", errors.join("; ")),
            Self::SelfInitiated => write!(f, "transfer initiated by this router"),
            Self::NoPath => write!(f, "no path to follow"),
            Self::FinalRecipient => write!(f, "router is the final recipient"),
            Self::NoResolver => write!(f, "no resolver in transfer"),
            Self::SelfResponder => write!(f, "router is the responder"),
        }
    }
}

/// Failures of the channel engine's effect API.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("channel not found: {0}")]
    ChannelNotFound(Address),

    #[error("transfer not found: {0}")]
    TransferNotFound(TransferId),

    #[error("effect rejected: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid engine response: {0}")]
    InvalidResponse(String),
}

/// Failures of the forward record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("forward record not found: {0}")]
    NotFound(RoutingId),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("record encoding error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Failures of the collateral manager.
#[derive(Debug, thiserror::Error)]
pub enum CollateralError {
    #[error("insufficient collateral in {channel_address} for {asset_id}: required {required}, available {available}")]
    Insufficient {
        channel_address: Address,
        asset_id: Address,
        required: u128,
        available: u128,
    },

    #[error("channel not found: {0}")]
    ChannelNotFound(Address),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Forwarding engine errors.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("event not forwardable: {0}")]
    NotForwardable(Ineligible),

    #[error("no channel to next hop {recipient} on chain {chain_id}")]
    NoRoute { recipient: String, chain_id: u64 },

    #[error("timeout exhausted: {inbound}s minus {decrement}s is below the {floor}s floor")]
    TimeoutExhausted {
        inbound: u64,
        decrement: u64,
        floor: u64,
    },

    #[error("insufficient collateral in {channel_address} for {asset_id}: required {required}, available {available}")]
    InsufficientCollateral {
        channel_address: Address,
        asset_id: Address,
        required: u128,
        available: u128,
    },

    #[error("no forward recorded for routing id {routing_id} (transfer {transfer_id})")]
    UnknownForward {
        routing_id: RoutingId,
        transfer_id: TransferId,
    },

    #[error("forward {routing_id} already failed: {reason}")]
    PreviouslyFailed { routing_id: RoutingId, reason: String },

    #[error("channel engine effect failed: {0}")]
    EngineEffect(#[from] EngineError),

    #[error("forward store error: {0}")]
    Store(#[from] StoreError),
}

impl ForwardError {
    /// Whether a later redelivery of the same event may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InsufficientCollateral { .. } | Self::Store(_))
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotForwardable(_) => "not_forwardable",
            Self::NoRoute { .. } => "no_route",
            Self::TimeoutExhausted { .. } => "timeout_exhausted",
            Self::InsufficientCollateral { .. } => "insufficient_collateral",
            Self::UnknownForward { .. } => "unknown_forward",
            Self::PreviouslyFailed { .. } => "previously_failed",
            Self::EngineEffect(_) => "engine_effect",
            Self::Store(_) => "store",
        }
    }
}

impl From<CollateralError> for ForwardError {
    fn from(err: CollateralError) -> Self {
        match err {
            CollateralError::Insufficient {
                channel_address,
                asset_id,
                required,
                available,
            } => Self::InsufficientCollateral {
                channel_address,
                asset_id,
                required,
                available,
            },
            CollateralError::ChannelNotFound(address) => {
                Self::EngineEffect(EngineError::ChannelNotFound(address))
            }
            CollateralError::Engine(e) => Self::EngineEffect(e),
        }
    }
}
