//! Shared node state for the HTTP handlers.

use hoplink_core::RouterIdentity;
use hoplink_router::{ForwardStore, RouterMetrics};
use std::sync::Arc;
use std::time::Instant;

use crate::rest::RestChannelEngine;

/// Shared state for the running node, accessible from HTTP handlers.
pub struct NodeState {
    /// The router's own identity.
    pub identity: RouterIdentity,
    /// When the node started.
    pub start_time: Instant,
    /// Forward records, read by the status endpoints.
    pub store: Arc<dyn ForwardStore>,
    pub metrics: Arc<RouterMetrics>,
    /// Re-broadcasts webhook deliveries to the listener.
    pub engine: Arc<RestChannelEngine>,
}

impl NodeState {
    pub fn new(
        identity: RouterIdentity,
        store: Arc<dyn ForwardStore>,
        metrics: Arc<RouterMetrics>,
        engine: Arc<RestChannelEngine>,
    ) -> Self {
        Self {
            identity,
            start_time: Instant::now(),
            store,
            metrics,
            engine,
        }
    }
}
