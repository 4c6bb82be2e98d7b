//! In-process stand-in for a game server, used by unit tests.
//!
//! Commands understood by the scripted server:
//!
//! * `echo <text>`: replies `<text>`
//! * `delay <ms> <text>`: replies `<text>` after `<ms>` milliseconds
//! * `silent`: never replies
//! * `hangup`: drops the connection
//! * the configured list command: replies with the current zone list
//! * anything else: replies `ok: <command>`
//!
//! Every reply is preceded by an unsolicited console broadcast so tests
//! also exercise the discard path.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::error::GatewayError;
use crate::protocol::{CorrelationId, Protocol, WebRconReply, WebRconRequest};
use crate::transport::{Connector, Link};
use crate::types::ServerIdentity;

pub const LIST_COMMAND: &str = "zones.list";

#[derive(Clone)]
pub struct LoopbackConnector {
    connects: Arc<AtomicUsize>,
    refuse: Arc<AtomicBool>,
    zones: Arc<Mutex<Vec<String>>>,
    list_fails: Arc<AtomicBool>,
    hangup: Arc<watch::Sender<u64>>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        let (hangup, _) = watch::channel(0);
        Self {
            connects: Arc::new(AtomicUsize::new(0)),
            refuse: Arc::new(AtomicBool::new(false)),
            zones: Arc::new(Mutex::new(Vec::new())),
            list_fails: Arc::new(AtomicBool::new(false)),
            hangup: Arc::new(hangup),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn set_zones(&self, zones: &[&str]) {
        *self.zones.lock() = zones.iter().map(|z| z.to_string()).collect();
    }

    /// Make the list command go unanswered.
    pub fn fail_listing(&self, fail: bool) {
        self.list_fails.store(fail, Ordering::SeqCst);
    }

    pub fn hang_up_all(&self) {
        self.hangup.send_modify(|gen| *gen += 1);
    }
}

fn reply(protocol: Protocol, id: CorrelationId, text: &str) -> String {
    match protocol {
        Protocol::WebRcon => serde_json::to_string(&WebRconReply {
            message: text.to_string(),
            identifier: id,
            kind: "Generic".into(),
            stacktrace: None,
        })
        .unwrap(),
        Protocol::Text => text.to_string(),
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(
        &self,
        identity: &ServerIdentity,
        protocol: Protocol,
        _timeout: Duration,
    ) -> Result<Link, GatewayError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(GatewayError::ConnectRefused {
                endpoint: identity.to_string(),
                reason: "loopback refused".into(),
            });
        }
        self.connects.fetch_add(1, Ordering::SeqCst);

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let zones = self.zones.clone();
        let list_fails = self.list_fails.clone();
        let mut hangup = self.hangup.subscribe();

        tokio::spawn(async move {
            loop {
                let raw = tokio::select! {
                    raw = outbound_rx.recv() => match raw {
                        Some(raw) => raw,
                        None => break,
                    },
                    _ = hangup.changed() => break,
                };
                let (id, command) = match protocol {
                    Protocol::WebRcon => match serde_json::from_str::<WebRconRequest>(&raw) {
                        Ok(req) => (req.identifier, req.message),
                        Err(_) => continue,
                    },
                    Protocol::Text => (0, raw),
                };

                if protocol.carries_ids() {
                    let _ = inbound_tx.send(reply(protocol, 0, "[console] tick"));
                }

                let mut words = command.splitn(3, ' ');
                match words.next().unwrap_or_default() {
                    "echo" => {
                        let rest = command.strip_prefix("echo ").unwrap_or_default();
                        let _ = inbound_tx.send(reply(protocol, id, rest));
                    }
                    "delay" => {
                        let ms: u64 = words.next().and_then(|w| w.parse().ok()).unwrap_or(0);
                        let text = words.next().unwrap_or_default().to_string();
                        let tx = inbound_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(Duration::from_millis(ms)).await;
                            let _ = tx.send(reply(protocol, id, &text));
                        });
                    }
                    "silent" => {}
                    "hangup" => break,
                    LIST_COMMAND => {
                        if list_fails.load(Ordering::SeqCst) {
                            continue;
                        }
                        let body = zones
                            .lock()
                            .iter()
                            .map(|z| format!("  \"{}\" (custom)", z))
                            .collect::<Vec<_>>()
                            .join("\n");
                        let text = format!("Custom zones:\n{}", body);
                        let _ = inbound_tx.send(reply(protocol, id, &text));
                    }
                    _ => {
                        let _ = inbound_tx.send(reply(protocol, id, &format!("ok: {}", command)));
                    }
                }
            }
        });

        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
