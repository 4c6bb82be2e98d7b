//! Error types returned by the gateway, the zone store and the reconciler.

use std::time::Duration;

use thiserror::Error;

use crate::types::ZoneId;

/// Coarse classification handed to whatever reports results to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The server could not be reached at all.
    Unreachable,
    /// One command got no reply in time; the session is still usable.
    CommandTimeout,
    /// The session broke while a command was in flight.
    Transport,
    /// The command could not be put on the wire.
    Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("connecting to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout { endpoint: String, timeout: Duration },
    #[error("connection to {endpoint} refused: {reason}")]
    ConnectRefused { endpoint: String, reason: String },
    #[error("command got no reply within {0:?}")]
    CommandTimeout(Duration),
    #[error("session closed while the command was pending")]
    SessionClosed,
    #[error("session is not connected")]
    NotConnected,
    #[error("failed to encode command: {0}")]
    Encode(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::ConnectTimeout { .. } | GatewayError::ConnectRefused { .. } => {
                ErrorKind::Unreachable
            }
            GatewayError::CommandTimeout(_) => ErrorKind::CommandTimeout,
            GatewayError::SessionClosed | GatewayError::NotConnected => ErrorKind::Transport,
            GatewayError::Encode(_) => ErrorKind::Protocol,
        }
    }

    /// True when the session that produced this error should be thrown away.
    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("zone record {0} does not exist")]
    NotFound(ZoneId),
    #[error("zone store I/O failed: {0}")]
    Io(String),
    #[error("zone store file is malformed: {0}")]
    Format(String),
    #[error("zone store backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Format(e.to_string())
    }
}

/// Reasons a reconciliation run aborted before touching the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("could not fetch zone list from {server}: {source}")]
    Fetch {
        server: String,
        #[source]
        source: GatewayError,
    },
    #[error("could not load local zone records for {server_id}: {source}")]
    ListRecords {
        server_id: String,
        #[source]
        source: StoreError,
    },
    #[error("{server} reported no zones while {local} are stored locally; refusing to prune")]
    EmptySnapshot { server: String, local: usize },
}
