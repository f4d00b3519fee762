//! Hoplink core types.
//!
//! Shared vocabulary of the routing node: transfers and channels as the
//! channel engine reports them, the routing metadata carried by forwardable
//! transfers, engine events, and the timeout policy applied at every hop.

pub mod config;
pub mod error;
pub mod events;
pub mod schema;
pub mod types;

pub use config::ForwardingConfig;
pub use error::CoreError;
pub use events::{DepositReconciledPayload, EngineEvent, EngineEventKind, TransferEventPayload};
pub use schema::{MetaValidation, RouterMetaValidator};
pub use types::{
    Address, Balance, Channel, CreateTransferParams, PathHop, RouterIdentity, RouterMeta,
    RoutingId, Transfer, TransferId, TransferResolver,
};
