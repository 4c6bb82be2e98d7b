//! One live connection to one game server.
//!
//! A session moves `Idle -> Connecting -> Open -> Closing -> Closed` and
//! never comes back from `Closed`; reconnecting means building a new
//! session, which is the registry's job.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::{mpsc, MutexGuard as TurnGuard};
use tokio::task::JoinHandle;

use crate::correlator::PendingTable;
use crate::error::GatewayError;
use crate::protocol::Protocol;
use crate::transport::{Connector, Link};
use crate::types::ServerIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

pub struct Session {
    identity: ServerIdentity,
    protocol: Protocol,
    state: Mutex<SessionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    pending: PendingTable,
    /// Held for the whole command when the protocol cannot carry ids.
    turn: tokio::sync::Mutex<()>,
    last_activity: Mutex<Instant>,
}

impl Session {
    pub fn new(identity: ServerIdentity, protocol: Protocol) -> Self {
        Self {
            identity,
            protocol,
            state: Mutex::new(SessionState::Idle),
            outbound: Mutex::new(None),
            reader: Mutex::new(None),
            pending: PendingTable::new(!protocol.carries_ids()),
            turn: tokio::sync::Mutex::new(()),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    /// Connect to `identity` and start the read loop.
    pub async fn open(
        connector: &dyn Connector,
        identity: ServerIdentity,
        protocol: Protocol,
        connect_timeout: Duration,
    ) -> Result<Arc<Session>, GatewayError> {
        let session = Arc::new(Session::new(identity, protocol));
        *session.state.lock() = SessionState::Connecting;

        match connector
            .connect(&session.identity, protocol, connect_timeout)
            .await
        {
            Ok(link) => {
                session.attach(link);
                info!("Opened RCON session to {}", session.identity);
                Ok(session)
            }
            Err(e) => {
                session.close();
                Err(e)
            }
        }
    }

    fn attach(self: &Arc<Self>, link: Link) {
        let Link { outbound, inbound } = link;
        let mut state = self.state.lock();
        if *state != SessionState::Connecting {
            return;
        }
        *self.outbound.lock() = Some(outbound);
        *self.reader.lock() = Some(tokio::spawn(read_loop(Arc::downgrade(self), inbound)));
        *state = SessionState::Open;
        self.touch();
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    pub(crate) fn pending(&self) -> &PendingTable {
        &self.pending
    }

    /// Number of commands still waiting for a reply.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Time since the last message went out or came in.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub(crate) fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub(crate) async fn take_turn(&self) -> TurnGuard<'_, ()> {
        self.turn.lock().await
    }

    /// Queue one message for the server.
    pub fn send(&self, message: String) -> Result<(), GatewayError> {
        if !self.is_open() {
            return Err(GatewayError::NotConnected);
        }
        let outbound = self.outbound.lock();
        let tx = outbound.as_ref().ok_or(GatewayError::NotConnected)?;
        tx.send(message).map_err(|_| GatewayError::NotConnected)?;
        self.touch();
        Ok(())
    }

    /// Release the connection and fail every pending command.  Safe to call
    /// any number of times from any state.
    pub fn close(&self) {
        let was = {
            let mut state = self.state.lock();
            let was = *state;
            if was == SessionState::Closed || was == SessionState::Closing {
                return;
            }
            *state = SessionState::Closing;
            was
        };

        // Dropping the sender lets the pump close the socket.
        self.outbound.lock().take();
        let failed = self.pending.fail_all();
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        *self.state.lock() = SessionState::Closed;

        if was == SessionState::Open {
            info!(
                "Closed RCON session to {} ({} pending command(s) failed)",
                self.identity, failed
            );
        }
    }
}

async fn read_loop(session: Weak<Session>, mut inbound: mpsc::UnboundedReceiver<String>) {
    while let Some(raw) = inbound.recv().await {
        let Some(session) = session.upgrade() else {
            return;
        };
        session.touch();
        match session.protocol.decode(&raw) {
            Some(frame) => {
                let id = frame.id;
                if !session.pending.resolve(frame) {
                    debug!(
                        "Discarding unmatched message (id {:?}) from {}",
                        id, session.identity
                    );
                }
            }
            None => warn!("Discarding malformed message from {}", session.identity),
        }
    }

    if let Some(session) = session.upgrade() {
        if session.is_open() {
            warn!("{} dropped the RCON connection", session.identity);
        }
        session.close();
    }
}
