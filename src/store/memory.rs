use async_trait::async_trait;
use parking_lot::Mutex;

use super::{RepairOp, ZoneStore, ZoneTable};
use crate::error::StoreError;
use crate::types::{NewZoneRecord, ZoneId, ZoneRecord};

/// Zone store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryZoneStore {
    table: Mutex<ZoneTable>,
}

impl MemoryZoneStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ZoneStore for MemoryZoneStore {
    async fn list_zone_records(&self, server_id: &str) -> Result<Vec<ZoneRecord>, StoreError> {
        Ok(self.table.lock().list(server_id))
    }

    async fn delete_zone_record(&self, id: ZoneId) -> Result<(), StoreError> {
        self.table.lock().delete(id)
    }

    async fn insert_zone_record(&self, record: NewZoneRecord) -> Result<ZoneId, StoreError> {
        Ok(self.table.lock().insert(record))
    }

    /// The whole batch runs under one lock, so readers never see half of it.
    async fn apply(&self, ops: &[RepairOp]) -> Vec<Result<(), StoreError>> {
        self.table.lock().apply(ops)
    }
}
