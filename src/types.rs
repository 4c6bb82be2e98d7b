//! Data structures shared between the gateway and the zone reconciler.
//!
//! These types are serialised using [`serde`](https://serde.rs/) when the
//! zone store persists them.  `ServerIdentity` is the registry key for
//! live sessions; `ZoneRecord` is the durable row the reconciler keeps in
//! line with what the game server reports.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned identifier of a zone record.
pub type ZoneId = i64;

/// One remote game server endpoint.
///
/// Two identities with the same address but different credentials are
/// distinct registry keys, so a rotated password gets a fresh session.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ServerIdentity {
    pub host: String,
    pub port: u16,
    pub credential: String,
}

impl ServerIdentity {
    pub fn new(host: impl Into<String>, port: u16, credential: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            credential: credential.into(),
        }
    }
}

impl fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerIdentity")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("credential", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Colours a zone shows while its team is online / offline, as `r,g,b`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamColors {
    pub online: String,
    pub offline: String,
}

impl Default for TeamColors {
    fn default() -> Self {
        Self {
            online: "0,255,0".into(),
            offline: "255,0,0".into(),
        }
    }
}

/// A persisted zone.  `name` is unique per `server_id` once reconciled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneRecord {
    pub id: ZoneId,
    pub name: String,
    pub owner: String,
    pub server_id: String,
    pub created_at: DateTime<Utc>,
    pub expire_seconds: u64,
    pub size: f64,
    pub team_colors: TeamColors,
    pub max_team_size: u32,
}

/// A zone record that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewZoneRecord {
    pub name: String,
    pub owner: String,
    pub server_id: String,
    pub created_at: DateTime<Utc>,
    pub expire_seconds: u64,
    pub size: f64,
    pub team_colors: TeamColors,
    pub max_team_size: u32,
}

impl NewZoneRecord {
    pub fn with_id(self, id: ZoneId) -> ZoneRecord {
        ZoneRecord {
            id,
            name: self.name,
            owner: self.owner,
            server_id: self.server_id,
            created_at: self.created_at,
            expire_seconds: self.expire_seconds,
            size: self.size,
            team_colors: self.team_colors,
            max_team_size: self.max_team_size,
        }
    }
}

/// Zone names currently live on one server, in the order it listed them.
/// Never persisted; re-read on every reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteZoneSnapshot {
    names: Vec<String>,
}

impl RemoteZoneSnapshot {
    /// Builds a snapshot, dropping repeated names but keeping first-seen order.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for name in names {
            let name = name.into();
            if !out.contains(&name) {
                out.push(name);
            }
        }
        Self { names: out }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
