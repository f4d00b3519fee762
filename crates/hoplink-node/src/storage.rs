//! RocksDB-backed forward record store.

use async_trait::async_trait;
use hoplink_core::RoutingId;
use hoplink_router::{
    CreateOutcome, ForwardPatch, ForwardRecord, ForwardStore, StoreError,
};
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, DB};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Forward records keyed by routing id, JSON-encoded.
const CF_FORWARDS: &str = "forwards";

/// Durable forward store.
///
/// Reads go straight to RocksDB. Writes serialise on a mutex so the
/// read-then-write of `create_if_absent` and `update` is atomic.
pub struct RocksForwardStore {
    db: DB,
    write_lock: Mutex<()>,
}

impl RocksForwardStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors = vec![ColumnFamilyDescriptor::new(CF_FORWARDS, Options::default())];
        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)?;

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.write_lock
            .lock()
            .map_err(|_| StoreError::Backend("forward store write lock poisoned".into()))
    }

    fn read(&self, routing_id: &RoutingId) -> Result<Option<ForwardRecord>, StoreError> {
        let cf = self
            .db
            .cf_handle(CF_FORWARDS)
            .ok_or_else(|| StoreError::Backend(format!("column family '{CF_FORWARDS}' not found")))?;
        let value = self
            .db
            .get_cf(&cf, routing_id.as_str().as_bytes())
            .map_err(backend)?;
        value
            .map(|bytes| serde_json::from_slice(&bytes).map_err(StoreError::from))
            .transpose()
    }

    fn write(&self, record: &ForwardRecord) -> Result<(), StoreError> {
        let cf = self
            .db
            .cf_handle(CF_FORWARDS)
            .ok_or_else(|| StoreError::Backend(format!("column family '{CF_FORWARDS}' not found")))?;
        let bytes = serde_json::to_vec(record)?;
        self.db
            .put_cf(&cf, record.routing_id.as_str().as_bytes(), bytes)
            .map_err(backend)
    }
}

fn backend(e: rocksdb::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl ForwardStore for RocksForwardStore {
    async fn get(&self, routing_id: &RoutingId) -> Result<Option<ForwardRecord>, StoreError> {
        self.read(routing_id)
    }

    async fn create_if_absent(&self, record: ForwardRecord) -> Result<CreateOutcome, StoreError> {
        let _guard = self.lock()?;
        if let Some(existing) = self.read(&record.routing_id)? {
            return Ok(CreateOutcome {
                created: false,
                record: existing,
            });
        }
        self.write(&record)?;
        tracing::debug!(routing_id = %record.routing_id, "forward record persisted");
        Ok(CreateOutcome {
            created: true,
            record,
        })
    }

    async fn update(
        &self,
        routing_id: &RoutingId,
        patch: ForwardPatch,
    ) -> Result<ForwardRecord, StoreError> {
        let _guard = self.lock()?;
        let mut record = self
            .read(routing_id)?
            .ok_or_else(|| StoreError::NotFound(routing_id.clone()))?;
        record.apply(&patch);
        self.write(&record)?;
        Ok(record)
    }

    async fn list(&self) -> Result<Vec<ForwardRecord>, StoreError> {
        let cf = self
            .db
            .cf_handle(CF_FORWARDS)
            .ok_or_else(|| StoreError::Backend(format!("column family '{CF_FORWARDS}' not found")))?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item.map_err(backend)?;
            records.push(serde_json::from_slice::<ForwardRecord>(&value)?);
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }
}
