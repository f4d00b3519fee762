//! Hoplink Forwarding Engine
//!
//! Relays conditional transfers across a hop: the validation gate filters
//! engine events, the collateral manager guarantees the outbound channel can
//! carry the payment, the forwarder mirrors creation and resolution, and the
//! listener drives it all from the channel engine's event stream.

pub mod adapters;
pub mod collateral;
pub mod error;
pub mod forwarder;
pub mod gate;
pub mod listener;
pub mod locks;
pub mod metrics;
pub mod store;
pub mod traits;

pub use collateral::{CollateralManager, CollateralSnapshot};
pub use error::{CollateralError, EngineError, ForwardError, Ineligible, StoreError};
pub use forwarder::{ForwardReceipt, Forwarder};
pub use gate::ValidationGate;
pub use listener::Listener;
pub use metrics::RouterMetrics;
pub use store::{
    CreateOutcome, ForwardFailure, ForwardPatch, ForwardRecord, ForwardStatus, ForwardStore,
    MemoryForwardStore,
};
pub use traits::ChannelEngine;
