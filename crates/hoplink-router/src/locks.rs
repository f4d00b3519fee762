use dashmap::DashMap;
use hoplink_core::RoutingId;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-routing-id exclusive sections.
///
/// Creation and resolution of one payment serialize on its routing id;
/// different payments never contend. Entries are dropped once the last
/// holder or waiter releases them.
#[derive(Debug, Clone, Default)]
pub struct RoutingLocks {
    inner: Arc<DashMap<RoutingId, Arc<Mutex<()>>>>,
}

impl RoutingLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `routing_id`.
    pub async fn acquire(&self, routing_id: &RoutingId) -> RoutingGuard {
        let mutex = self
            .inner
            .entry(routing_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        RoutingGuard {
            guard: Some(guard),
            routing_id: routing_id.clone(),
            locks: self.inner.clone(),
        }
    }

    /// Number of routing ids currently held or awaited.
    pub fn active(&self) -> usize {
        self.inner.len()
    }
}

/// Held exclusive section for one routing id.
pub struct RoutingGuard {
    guard: Option<OwnedMutexGuard<()>>,
    routing_id: RoutingId,
    locks: Arc<DashMap<RoutingId, Arc<Mutex<()>>>>,
}

impl RoutingGuard {
    pub fn routing_id(&self) -> &RoutingId {
        &self.routing_id
    }
}

impl Drop for RoutingGuard {
    fn drop(&mut self) {
        // Release first so the map holds the only remaining reference when idle.
        self.guard.take();
        self.locks
            .remove_if(&self.routing_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
