//! Request/response on top of a fire-and-forget session.
//!
//! Each command gets an identifier that is unique among the commands still
//! pending on its session.  The session's read loop hands every inbound
//! frame to [`PendingTable::resolve`], which wakes the matching caller and
//! drops anything nobody is waiting for.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::GatewayError;
use crate::protocol::{CorrelationId, Frame};
use crate::session::Session;

const FIRST_ID: CorrelationId = 1;

struct PendingCommand {
    issued_at: Instant,
    reply: oneshot::Sender<String>,
}

struct PendingInner {
    next_id: CorrelationId,
    entries: HashMap<CorrelationId, PendingCommand>,
    closed: bool,
}

impl PendingInner {
    /// Next id after the last one handed out, skipping ids still in flight.
    fn allocate(&mut self) -> CorrelationId {
        loop {
            let id = self.next_id;
            self.next_id = if id == CorrelationId::MAX {
                FIRST_ID
            } else {
                id + 1
            };
            if !self.entries.contains_key(&id) {
                return id;
            }
        }
    }
}

/// Commands awaiting a reply on one session.
pub struct PendingTable {
    inner: Mutex<PendingInner>,
    /// No ids on the wire: at most one entry, and any reply belongs to it.
    serialized: bool,
}

impl PendingTable {
    pub fn new(serialized: bool) -> Self {
        Self {
            inner: Mutex::new(PendingInner {
                next_id: FIRST_ID,
                entries: HashMap::new(),
                closed: false,
            }),
            serialized,
        }
    }

    pub fn register(&self) -> Result<(CorrelationId, oneshot::Receiver<String>), GatewayError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(GatewayError::SessionClosed);
        }
        let id = inner.allocate();
        let (tx, rx) = oneshot::channel();
        inner.entries.insert(
            id,
            PendingCommand {
                issued_at: Instant::now(),
                reply: tx,
            },
        );
        Ok((id, rx))
    }

    /// Deliver `frame` to its waiter.  Returns `false` if nobody wanted it.
    pub fn resolve(&self, frame: Frame) -> bool {
        let entry = {
            let mut inner = self.inner.lock();
            let key = if self.serialized {
                inner.entries.keys().next().copied()
            } else {
                frame.id
            };
            key.and_then(|id| inner.entries.remove(&id).map(|cmd| (id, cmd)))
        };

        match entry {
            Some((id, cmd)) => {
                debug!("Reply {} arrived after {:?}", id, cmd.issued_at.elapsed());
                // The waiter may have just given up; that is fine.
                cmd.reply.send(frame.payload).is_ok()
            }
            None => false,
        }
    }

    pub fn retire(&self, id: CorrelationId) {
        self.inner.lock().entries.remove(&id);
    }

    /// Refuse new registrations and wake every waiter with a closed channel.
    pub fn fail_all(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.closed = true;
        let n = inner.entries.len();
        inner.entries.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: CorrelationId) -> bool {
        self.inner.lock().entries.contains_key(&id)
    }

    #[cfg(test)]
    fn set_next_id(&self, id: CorrelationId) {
        self.inner.lock().next_id = id;
    }
}

/// Removes the entry on every exit path, including the caller dropping
/// the future mid-wait.
struct PendingGuard<'a> {
    table: &'a PendingTable,
    id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.retire(self.id);
    }
}

/// Send `command` on `session` and wait up to `timeout` for its reply.
///
/// A timeout only abandons this command; the session and any other
/// pending commands are untouched.  On sessions that run one command at a
/// time, waiting for the turn counts against the same `timeout`.
pub async fn execute(
    session: &Session,
    command: &str,
    timeout: Duration,
) -> Result<String, GatewayError> {
    let deadline = tokio::time::Instant::now() + timeout;

    let _turn = if session.protocol().carries_ids() {
        None
    } else {
        match tokio::time::timeout_at(deadline, session.take_turn()).await {
            Ok(turn) => Some(turn),
            Err(_) => {
                debug!(
                    "Command to {} timed out waiting for its turn after {:?}",
                    session.identity(),
                    timeout
                );
                return Err(GatewayError::CommandTimeout(timeout));
            }
        }
    };

    let table = session.pending();
    let (id, reply) = table.register()?;
    let _entry = PendingGuard { table, id };

    let wire = session.protocol().encode(id, command)?;
    session.send(wire)?;

    match tokio::time::timeout_at(deadline, reply).await {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(_)) => Err(GatewayError::SessionClosed),
        Err(_) => {
            debug!(
                "Command {} to {} timed out after {:?}",
                id,
                session.identity(),
                timeout
            );
            Err(GatewayError::CommandTimeout(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::protocol::Protocol;
    use crate::testing::LoopbackConnector;
    use crate::types::ServerIdentity;

    async fn open(connector: &LoopbackConnector, protocol: Protocol) -> Arc<Session> {
        Session::open(
            connector,
            ServerIdentity::new("loopback", 28016, "pw"),
            protocol,
            Duration::from_secs(1),
        )
        .await
        .unwrap()
    }

    #[test]
    fn allocation_wraps_and_skips_pending() {
        let table = PendingTable::new(false);
        table.set_next_id(CorrelationId::MAX);
        let (a, _ra) = table.register().unwrap();
        assert_eq!(a, CorrelationId::MAX);
        let (b, _rb) = table.register().unwrap();
        assert_eq!(b, 1);

        table.set_next_id(CorrelationId::MAX);
        let (c, _rc) = table.register().unwrap();
        // MAX and 1 are still pending.
        assert_eq!(c, 2);
    }

    #[test]
    fn unmatched_frames_are_dropped() {
        let table = PendingTable::new(false);
        let (id, _rx) = table.register().unwrap();
        assert!(!table.resolve(Frame {
            id: Some(id + 100),
            payload: "stray".into()
        }));
        assert!(!table.resolve(Frame {
            id: None,
            payload: "broadcast".into()
        }));
        assert!(table.contains(id));
    }

    #[test]
    fn closed_table_refuses_registration() {
        let table = PendingTable::new(false);
        let (_id, mut rx) = table.register().unwrap();
        assert_eq!(table.fail_all(), 1);
        assert!(rx.try_recv().is_err());
        assert_eq!(table.register().err(), Some(GatewayError::SessionClosed));
    }

    #[tokio::test]
    async fn concurrent_replies_reach_their_callers() {
        let connector = LoopbackConnector::new();
        let session = open(&connector, Protocol::WebRcon).await;

        // Later commands answer first, so replies arrive in reverse order.
        let mut handles = Vec::new();
        for i in 0..16u64 {
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                let cmd = format!("delay {} reply-{}", (16 - i) * 10, i);
                let out = execute(&session, &cmd, Duration::from_secs(5)).await;
                (i, out)
            }));
        }
        for handle in handles {
            let (i, out) = handle.await.unwrap();
            assert_eq!(out.unwrap(), format!("reply-{}", i));
        }
        assert!(session.pending().is_empty());
    }

    #[tokio::test]
    async fn timeout_leaves_session_usable() {
        let connector = LoopbackConnector::new();
        let session = open(&connector, Protocol::WebRcon).await;

        let slow = {
            let session = session.clone();
            tokio::spawn(async move {
                execute(&session, "delay 300 slow", Duration::from_secs(5)).await
            })
        };

        let err = execute(&session, "silent", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::CommandTimeout(Duration::from_millis(50)));

        let ok = execute(&session, "echo still here", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(ok, "still here");
        assert_eq!(slow.await.unwrap().unwrap(), "slow");
        assert!(session.is_open());
        assert_eq!(session.pending_len(), 0);
    }

    #[tokio::test]
    async fn close_wakes_pending_callers() {
        let connector = LoopbackConnector::new();
        let session = open(&connector, Protocol::WebRcon).await;

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { execute(&session, "silent", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.close();

        assert_eq!(waiter.await.unwrap(), Err(GatewayError::SessionClosed));
        assert_eq!(session.pending_len(), 0);
        assert_eq!(
            execute(&session, "echo x", Duration::from_secs(1)).await,
            Err(GatewayError::SessionClosed)
        );
    }

    #[tokio::test]
    async fn cancelled_caller_releases_entry() {
        let connector = LoopbackConnector::new();
        let session = open(&connector, Protocol::WebRcon).await;

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { execute(&session, "silent", Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.pending_len(), 1);

        waiter.abort();
        let _ = waiter.await;
        assert_eq!(session.pending_len(), 0);
        assert!(session.is_open());
    }

    #[tokio::test]
    async fn text_protocol_runs_one_at_a_time() {
        let connector = LoopbackConnector::new();
        let session = open(&connector, Protocol::Text).await;

        let mut handles = Vec::new();
        for i in 0..4u64 {
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                let cmd = format!("delay {} t{}", (4 - i) * 10, i);
                (i, execute(&session, &cmd, Duration::from_secs(5)).await)
            }));
        }
        for handle in handles {
            let (i, out) = handle.await.unwrap();
            assert_eq!(out.unwrap(), format!("t{}", i));
        }
    }

    #[tokio::test]
    async fn queued_text_command_keeps_its_own_deadline() {
        let connector = LoopbackConnector::new();
        let session = open(&connector, Protocol::Text).await;

        let first = {
            let session = session.clone();
            tokio::spawn(async move { execute(&session, "silent", Duration::from_millis(800)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = Instant::now();
        let err = execute(&session, "silent", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::CommandTimeout(Duration::from_millis(100)));
        assert!(started.elapsed() < Duration::from_millis(500));

        assert_eq!(
            first.await.unwrap(),
            Err(GatewayError::CommandTimeout(Duration::from_millis(800)))
        );
        assert_eq!(session.pending_len(), 0);
        assert!(session.is_open());
    }
}
