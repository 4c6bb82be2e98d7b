//! Zone store kept in a single JSON file.
//!
//! Every change is written to a sibling temp file and renamed over the
//! original, so the file on disk is always either the old or the new table.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{info, warn};
use tokio::fs;
use tokio::sync::Mutex;

use super::{RepairOp, ZoneStore, ZoneTable};
use crate::error::StoreError;
use crate::types::{NewZoneRecord, ZoneId, ZoneRecord};

pub struct JsonFileZoneStore {
    path: PathBuf,
    table: Mutex<ZoneTable>,
}

impl JsonFileZoneStore {
    /// Load `path`, starting empty if it does not exist yet.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let table = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<ZoneTable>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Zone store {} not found, starting empty", path.display());
                ZoneTable::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, table: &ZoneTable) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(table)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ZoneStore for JsonFileZoneStore {
    async fn list_zone_records(&self, server_id: &str) -> Result<Vec<ZoneRecord>, StoreError> {
        Ok(self.table.lock().await.list(server_id))
    }

    async fn delete_zone_record(&self, id: ZoneId) -> Result<(), StoreError> {
        let mut table = self.table.lock().await;
        let mut staged = table.clone();
        staged.delete(id)?;
        self.persist(&staged).await?;
        *table = staged;
        Ok(())
    }

    async fn insert_zone_record(&self, record: NewZoneRecord) -> Result<ZoneId, StoreError> {
        let mut table = self.table.lock().await;
        let mut staged = table.clone();
        let id = staged.insert(record);
        self.persist(&staged).await?;
        *table = staged;
        Ok(id)
    }

    /// Stages the batch on a copy and commits it with a single write.  If
    /// the write fails nothing is applied and every op reports the failure.
    async fn apply(&self, ops: &[RepairOp]) -> Vec<Result<(), StoreError>> {
        let mut table = self.table.lock().await;
        let mut staged = table.clone();
        let results = staged.apply(ops);

        if !results.iter().any(|r| r.is_ok()) {
            return results;
        }
        match self.persist(&staged).await {
            Ok(()) => {
                *table = staged;
                results
            }
            Err(e) => {
                warn!("Failed to commit zone batch to {}: {}", self.path.display(), e);
                ops.iter().map(|_| Err(e.clone())).collect()
            }
        }
    }
}
