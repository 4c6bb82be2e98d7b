//! Durable zone records.
//!
//! The reconciler only needs to list, delete and insert.  Stores that can
//! apply a whole batch atomically override [`ZoneStore::apply`]; the
//! default applies operations one by one.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::{NewZoneRecord, ZoneId, ZoneRecord};

pub mod json_file;
pub mod memory;

pub use json_file::JsonFileZoneStore;
pub use memory::MemoryZoneStore;

/// Why a record is being deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteReason {
    Duplicate,
    Orphaned,
}

/// One mutation in a repair batch.
#[derive(Debug, Clone, PartialEq)]
pub enum RepairOp {
    Delete {
        id: ZoneId,
        name: String,
        reason: DeleteReason,
    },
    Insert(NewZoneRecord),
}

#[async_trait]
pub trait ZoneStore: Send + Sync {
    async fn list_zone_records(&self, server_id: &str) -> Result<Vec<ZoneRecord>, StoreError>;

    async fn delete_zone_record(&self, id: ZoneId) -> Result<(), StoreError>;

    async fn insert_zone_record(&self, record: NewZoneRecord) -> Result<ZoneId, StoreError>;

    /// Apply `ops` in order, one result per op.
    async fn apply(&self, ops: &[RepairOp]) -> Vec<Result<(), StoreError>> {
        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            let result = match op {
                RepairOp::Delete { id, .. } => self.delete_zone_record(*id).await,
                RepairOp::Insert(record) => self.insert_zone_record(record.clone()).await.map(|_| ()),
            };
            results.push(result);
        }
        results
    }
}

/// Record table shared by the in-process stores.  Ids only ever grow, so
/// a higher id always means a later insert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct ZoneTable {
    next_id: ZoneId,
    records: BTreeMap<ZoneId, ZoneRecord>,
}

impl ZoneTable {
    pub(crate) fn list(&self, server_id: &str) -> Vec<ZoneRecord> {
        self.records
            .values()
            .filter(|r| r.server_id == server_id)
            .cloned()
            .collect()
    }

    pub(crate) fn delete(&mut self, id: ZoneId) -> Result<(), StoreError> {
        self.records
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    pub(crate) fn insert(&mut self, record: NewZoneRecord) -> ZoneId {
        let id = self.next_id.max(self.max_id()) + 1;
        self.next_id = id;
        self.records.insert(id, record.with_id(id));
        id
    }

    pub(crate) fn apply(&mut self, ops: &[RepairOp]) -> Vec<Result<(), StoreError>> {
        ops.iter()
            .map(|op| match op {
                RepairOp::Delete { id, .. } => self.delete(*id),
                RepairOp::Insert(record) => {
                    self.insert(record.clone());
                    Ok(())
                }
            })
            .collect()
    }

    fn max_id(&self) -> ZoneId {
        self.records.keys().next_back().copied().unwrap_or(0)
    }
}
