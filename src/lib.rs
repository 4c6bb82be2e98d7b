//! RCON gateway and zone reconciliation for game servers.
//!
//! [`Gateway::send_command`] runs a console command on a remote server
//! over a persistent, authenticated session and returns the reply.
//! [`ReconciliationEngine::run`] uses the gateway to list a server's live
//! zones and repairs the local [`ZoneStore`] to match.

pub mod config;
pub mod correlator;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod reconcile;
pub mod registry;
pub mod session;
pub mod store;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use error::{ErrorKind, GatewayError, ReconcileError, StoreError};
pub use gateway::Gateway;
pub use protocol::Protocol;
pub use reconcile::{ReconcileReport, ReconcileSettings, ReconciliationEngine};
pub use registry::Registry;
pub use session::{Session, SessionState};
pub use store::{JsonFileZoneStore, MemoryZoneStore, ZoneStore};
pub use transport::{Connector, WebSocketConnector};
pub use types::{ServerIdentity, ZoneRecord};
