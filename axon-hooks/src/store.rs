//! Run record storage.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use axon_types::{RunId, RunRecord, StoreError};

/// Persistence contract for run records. Upserts must be idempotent:
/// activity retries may deliver the same projection twice and the store
/// must converge.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Load a record by run ID.
    async fn load(&self, run_id: &RunId) -> Result<Option<RunRecord>, StoreError>;

    /// Create or replace a record.
    async fn upsert(&self, record: RunRecord) -> Result<(), StoreError>;

    /// All records, in unspecified order.
    async fn list(&self) -> Result<Vec<RunRecord>, StoreError>;
}

/// In-memory run store backed by a `HashMap` behind a `RwLock`.
///
/// Suitable for testing and single-process use where persistence across
/// restarts is not required.
#[derive(Default)]
pub struct MemoryRunStore {
    records: RwLock<HashMap<RunId, RunRecord>>,
}

impl MemoryRunStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn load(&self, run_id: &RunId) -> Result<Option<RunRecord>, StoreError> {
        Ok(self.records.read().await.get(run_id).cloned())
    }

    async fn upsert(&self, record: RunRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(record.run_id.clone(), record);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RunRecord>, StoreError> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}
