//! Live sessions keyed by server identity.
//!
//! The registry connects lazily, hands out the cached session while it is
//! open, and replaces it after it breaks.  Connects to the same identity
//! are serialised by a per-identity lock; different identities connect in
//! parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::error::GatewayError;
use crate::protocol::Protocol;
use crate::session::Session;
use crate::transport::Connector;
use crate::types::ServerIdentity;

pub struct Registry {
    connector: Arc<dyn Connector>,
    protocol: Protocol,
    connect_timeout: Duration,
    sessions: Mutex<HashMap<ServerIdentity, Arc<Session>>>,
    connect_locks: Mutex<HashMap<ServerIdentity, Arc<tokio::sync::Mutex<()>>>>,
}

impl Registry {
    pub fn new(connector: Arc<dyn Connector>, protocol: Protocol, connect_timeout: Duration) -> Self {
        Self {
            connector,
            protocol,
            connect_timeout,
            sessions: Mutex::new(HashMap::new()),
            connect_locks: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, identity: &ServerIdentity) -> Option<Arc<Session>> {
        let sessions = self.sessions.lock();
        let session = sessions.get(identity).filter(|s| s.is_open())?;
        // Touched under the map lock so the sweeper never sees it as idle.
        session.touch();
        Some(session.clone())
    }

    fn connect_lock(&self, identity: &ServerIdentity) -> Arc<tokio::sync::Mutex<()>> {
        self.connect_locks
            .lock()
            .entry(identity.clone())
            .or_default()
            .clone()
    }

    /// Drop the connect lock for `identity` unless a connect is using it.
    fn forget_connect_lock(&self, identity: &ServerIdentity) {
        let mut locks = self.connect_locks.lock();
        if locks
            .get(identity)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(identity);
        }
    }

    /// Open session for `identity`, connecting if there is none.
    ///
    /// A failed connect is returned as-is and leaves nothing cached.
    pub async fn get_session(&self, identity: &ServerIdentity) -> Result<Arc<Session>, GatewayError> {
        if let Some(session) = self.cached(identity) {
            return Ok(session);
        }

        let lock = self.connect_lock(identity);
        let _connecting = lock.lock().await;

        // Someone else may have connected while we waited.
        if let Some(session) = self.cached(identity) {
            return Ok(session);
        }

        let session = Session::open(
            self.connector.as_ref(),
            identity.clone(),
            self.protocol,
            self.connect_timeout,
        )
        .await?;

        let stale = self
            .sessions
            .lock()
            .insert(identity.clone(), session.clone());
        if let Some(stale) = stale {
            stale.close();
        }
        Ok(session)
    }

    /// Drop and close whatever session is cached for `identity`.
    pub fn invalidate(&self, identity: &ServerIdentity) {
        let removed = self.sessions.lock().remove(identity);
        self.forget_connect_lock(identity);
        if let Some(session) = removed {
            warn!("Invalidating RCON session to {}", identity);
            session.close();
        }
    }

    /// Like [`invalidate`](Self::invalidate), but only if `failed` is still
    /// the cached session, so a fresh replacement is left alone.
    pub fn invalidate_session(&self, identity: &ServerIdentity, failed: &Arc<Session>) {
        let removed = {
            let mut sessions = self.sessions.lock();
            match sessions.get(identity) {
                Some(current) if Arc::ptr_eq(current, failed) => sessions.remove(identity),
                _ => None,
            }
        };
        if removed.is_some() {
            self.forget_connect_lock(identity);
            warn!("Invalidating RCON session to {}", identity);
        }
        failed.close();
    }

    /// Close sessions idle for longer than `threshold` with nothing pending,
    /// plus any that already died.  Returns how many were removed.
    pub fn evict_idle(&self, threshold: Duration) -> usize {
        let evicted: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock();
            let expired: Vec<ServerIdentity> = sessions
                .iter()
                .filter(|(_, s)| {
                    !s.is_open() || (s.pending_len() == 0 && s.idle_for() > threshold)
                })
                .map(|(id, _)| id.clone())
                .collect();
            expired
                .iter()
                .filter_map(|id| sessions.remove(id))
                .collect()
        };

        for session in &evicted {
            debug!("Evicting idle RCON session to {}", session.identity());
            self.forget_connect_lock(session.identity());
            session.close();
        }
        evicted.len()
    }

    /// Run [`evict_idle`](Self::evict_idle) every `every`.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration, threshold: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            loop {
                ticker.tick().await;
                let n = self.evict_idle(threshold);
                if n > 0 {
                    debug!("Idle sweep evicted {} session(s)", n);
                }
            }
        })
    }

    pub fn close_all(&self) {
        let drained: Vec<Arc<Session>> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        self.connect_locks
            .lock()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
        if !drained.is_empty() {
            info!("Closing {} RCON session(s)", drained.len());
        }
        for session in drained {
            session.close();
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
