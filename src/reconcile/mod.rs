//! Keeps a server's stored zone records in line with the zones actually
//! live on that server.
//!
//! A run fetches the live zone list, then repairs the store in three
//! steps: drop duplicate names (the highest id survives), drop records
//! the server no longer has, and add records for zones the store is
//! missing.  Runs hold no state between calls, so they can be triggered on
//! demand or on a timer, and a second run with no remote change is a no-op.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, StoreError};
use crate::gateway::Gateway;
use crate::store::{DeleteReason, RepairOp, ZoneStore};
use crate::types::{NewZoneRecord, RemoteZoneSnapshot, ServerIdentity, TeamColors, ZoneRecord};

pub mod zone_name;

pub use zone_name::{owner_from_zone_name, parse_zone_names};

const UNKNOWN_OWNER: &str = "unknown";

/// Field values for backfilled records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneDefaults {
    pub size: f64,
    pub expire_seconds: u64,
    pub max_team_size: u32,
    pub team_colors: TeamColors,
}

impl Default for ZoneDefaults {
    fn default() -> Self {
        Self {
            size: 75.0,
            expire_seconds: 126_000,
            max_team_size: 8,
            team_colors: TeamColors::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// Console command that lists the live zones.
    pub list_command: String,
    /// Names starting with this are zones we manage.
    pub zone_prefix: String,
    pub timeout: Duration,
    /// Abort instead of pruning everything when the server lists no zones.
    pub refuse_empty_snapshot: bool,
    pub defaults: ZoneDefaults,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            list_command: "zones.list".into(),
            zone_prefix: "ZORP_".into(),
            timeout: Duration::from_secs(10),
            refuse_empty_snapshot: false,
            defaults: ZoneDefaults::default(),
        }
    }
}

/// The mutations one run would make.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepairPlan {
    pub duplicates: Vec<ZoneRecord>,
    pub orphans: Vec<ZoneRecord>,
    pub missing: Vec<NewZoneRecord>,
}

impl RepairPlan {
    pub fn is_empty(&self) -> bool {
        self.duplicates.is_empty() && self.orphans.is_empty() && self.missing.is_empty()
    }

    pub fn into_ops(self) -> Vec<RepairOp> {
        let deletes = |records: Vec<ZoneRecord>, reason: DeleteReason| {
            records.into_iter().map(move |r| RepairOp::Delete {
                id: r.id,
                name: r.name,
                reason,
            })
        };
        deletes(self.duplicates, DeleteReason::Duplicate)
            .chain(deletes(self.orphans, DeleteReason::Orphaned))
            .chain(self.missing.into_iter().map(RepairOp::Insert))
            .collect()
    }
}

/// Work out the repairs for `local` given the live `snapshot`.
pub fn plan(
    server_id: &str,
    snapshot: &RemoteZoneSnapshot,
    local: Vec<ZoneRecord>,
    settings: &ReconcileSettings,
    now: DateTime<Utc>,
) -> RepairPlan {
    let mut local = local;
    // Per name, highest id first: that copy survives.
    local.sort_by(|a, b| a.name.cmp(&b.name).then(b.id.cmp(&a.id)));

    let mut survivors: BTreeMap<String, ZoneRecord> = BTreeMap::new();
    let mut duplicates = Vec::new();
    for record in local {
        if survivors.contains_key(&record.name) {
            duplicates.push(record);
        } else {
            survivors.insert(record.name.clone(), record);
        }
    }

    let (kept, orphans): (Vec<ZoneRecord>, Vec<ZoneRecord>) = survivors
        .into_values()
        .partition(|r| snapshot.contains(&r.name));

    let kept_names: HashSet<&str> = kept.iter().map(|r| r.name.as_str()).collect();
    let missing = snapshot
        .names()
        .iter()
        .filter(|name| !kept_names.contains(name.as_str()))
        .map(|name| backfill(server_id, name, settings, now))
        .collect();

    RepairPlan {
        duplicates,
        orphans,
        missing,
    }
}

fn backfill(
    server_id: &str,
    name: &str,
    settings: &ReconcileSettings,
    now: DateTime<Utc>,
) -> NewZoneRecord {
    let defaults = &settings.defaults;
    NewZoneRecord {
        name: name.to_string(),
        owner: owner_from_zone_name(name, &settings.zone_prefix)
            .unwrap_or_else(|| UNKNOWN_OWNER.to_string()),
        server_id: server_id.to_string(),
        created_at: now,
        expire_seconds: defaults.expire_seconds,
        size: defaults.size,
        team_colors: defaults.team_colors.clone(),
        max_team_size: defaults.max_team_size,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairCount {
    pub attempted: usize,
    pub succeeded: usize,
}

impl RepairCount {
    fn tally(&mut self, ok: bool) {
        self.attempted += 1;
        if ok {
            self.succeeded += 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepairFailure {
    pub op: RepairOp,
    pub error: StoreError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub server_id: String,
    /// Zones the server listed.
    pub remote_zones: usize,
    pub duplicates_removed: RepairCount,
    pub orphaned_removed: RepairCount,
    pub missing_added: RepairCount,
    pub failures: Vec<RepairFailure>,
}

impl ReconcileReport {
    fn new(server_id: &str, remote_zones: usize) -> Self {
        Self {
            server_id: server_id.to_string(),
            remote_zones,
            ..Default::default()
        }
    }

    /// `(duplicates removed, orphans removed, missing added)` that took effect.
    pub fn succeeded_counts(&self) -> (usize, usize, usize) {
        (
            self.duplicates_removed.succeeded,
            self.orphaned_removed.succeeded,
            self.missing_added.succeeded,
        )
    }

    pub fn is_noop(&self) -> bool {
        self.duplicates_removed.attempted == 0
            && self.orphaned_removed.attempted == 0
            && self.missing_added.attempted == 0
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, op: RepairOp, result: Result<(), StoreError>) {
        let ok = result.is_ok();
        match &op {
            RepairOp::Delete { id, name, reason } => {
                let (count, what) = match reason {
                    DeleteReason::Duplicate => (&mut self.duplicates_removed, "duplicate"),
                    DeleteReason::Orphaned => (&mut self.orphaned_removed, "orphaned"),
                };
                count.tally(ok);
                if ok {
                    info!("[{}] removed {} zone {} (id {})", self.server_id, what, name, id);
                }
            }
            RepairOp::Insert(record) => {
                self.missing_added.tally(ok);
                if ok {
                    info!(
                        "[{}] added missing zone {} (owner {})",
                        self.server_id, record.name, record.owner
                    );
                }
            }
        }
        if let Err(error) = result {
            warn!("[{}] repair {:?} failed: {}", self.server_id, op, error);
            self.failures.push(RepairFailure { op, error });
        }
    }
}

pub struct ReconciliationEngine {
    gateway: Arc<Gateway>,
    store: Arc<dyn ZoneStore>,
    settings: ReconcileSettings,
}

impl ReconciliationEngine {
    pub fn new(gateway: Arc<Gateway>, store: Arc<dyn ZoneStore>, settings: ReconcileSettings) -> Self {
        Self {
            gateway,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    /// Ask the server which zones are live.  No reply is an error, never an
    /// empty list.
    pub async fn fetch_snapshot(
        &self,
        identity: &ServerIdentity,
    ) -> Result<RemoteZoneSnapshot, ReconcileError> {
        let reply = self
            .gateway
            .send_command(identity, &self.settings.list_command, self.settings.timeout)
            .await
            .map_err(|source| ReconcileError::Fetch {
                server: identity.to_string(),
                source,
            })?;
        Ok(parse_zone_names(&reply, &self.settings.zone_prefix))
    }

    /// Reconcile the records stored under `server_id` against `identity`.
    pub async fn run(
        &self,
        server_id: &str,
        identity: &ServerIdentity,
    ) -> Result<ReconcileReport, ReconcileError> {
        let snapshot = self.fetch_snapshot(identity).await?;

        let local = self
            .store
            .list_zone_records(server_id)
            .await
            .map_err(|source| ReconcileError::ListRecords {
                server_id: server_id.to_string(),
                source,
            })?;

        if snapshot.is_empty() && !local.is_empty() && self.settings.refuse_empty_snapshot {
            return Err(ReconcileError::EmptySnapshot {
                server: identity.to_string(),
                local: local.len(),
            });
        }

        let mut report = ReconcileReport::new(server_id, snapshot.len());
        let plan = plan(server_id, &snapshot, local, &self.settings, Utc::now());
        if plan.is_empty() {
            info!("[{}] zones already in sync ({} live)", server_id, snapshot.len());
            return Ok(report);
        }

        let ops = plan.into_ops();
        let results = self.store.apply(&ops).await;
        for (op, result) in ops.into_iter().zip(results) {
            report.record(op, result);
        }

        let (dup, orphan, added) = report.succeeded_counts();
        info!(
            "[{}] reconciled: {} duplicate(s) removed, {} orphan(s) removed, {} missing added, {} failure(s)",
            server_id,
            dup,
            orphan,
            added,
            report.failures.len()
        );
        Ok(report)
    }
}
