//! A minimal WebSocket RCON server for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

use rcon_gateway::ServerIdentity;

pub const PASSWORD: &str = "letmein";

pub struct FakeRconServer {
    pub port: u16,
    accepts: Arc<AtomicUsize>,
    zones: Arc<Mutex<Vec<String>>>,
}

impl FakeRconServer {
    /// Serves until the test runtime shuts down.
    ///
    /// `silent` never replies, `delay <ms> <text>` replies late, `quit`
    /// closes the socket, `zones.list` prints the zone list, and anything
    /// else is echoed back.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepts = Arc::new(AtomicUsize::new(0));
        let zones = Arc::new(Mutex::new(Vec::new()));

        let counter = accepts.clone();
        let zone_list = zones.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, zone_list.clone()));
            }
        });

        Self {
            port,
            accepts,
            zones,
        }
    }

    pub fn identity(&self) -> ServerIdentity {
        ServerIdentity::new("127.0.0.1", self.port, PASSWORD)
    }

    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    pub fn set_zones(&self, zones: &[&str]) {
        *self.zones.lock() = zones.iter().map(|z| z.to_string()).collect();
    }
}

fn check_password(req: &Request, resp: Response) -> Result<Response, ErrorResponse> {
    if req.uri().path() == format!("/{}", PASSWORD) {
        Ok(resp)
    } else {
        let mut denied = ErrorResponse::new(Some("bad password".into()));
        *denied.status_mut() = StatusCode::UNAUTHORIZED;
        Err(denied)
    }
}

fn reply(id: i64, text: &str) -> Message {
    Message::Text(
        json!({ "Message": text, "Identifier": id, "Type": "Generic", "Stacktrace": "" })
            .to_string(),
    )
}

async fn serve(stream: tokio::net::TcpStream, zones: Arc<Mutex<Vec<String>>>) {
    let ws = match tokio_tungstenite::accept_hdr_async(stream, check_password).await {
        Ok(ws) => ws,
        Err(_) => return,
    };
    let (mut sink, mut source) = ws.split();

    // Delayed replies come back through here so they can overtake others.
    let (late_tx, mut late_rx) = mpsc::unbounded_channel::<Message>();

    loop {
        tokio::select! {
            late = late_rx.recv() => {
                if let Some(msg) = late {
                    if sink.send(msg).await.is_err() {
                        return;
                    }
                }
            }
            incoming = source.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(_)) => continue,
                    _ => return,
                };
                let req: Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                let id = req["Identifier"].as_i64().unwrap_or(0);
                let command = req["Message"].as_str().unwrap_or_default().to_string();

                let mut words = command.splitn(3, ' ');
                let out = match words.next().unwrap_or_default() {
                    "silent" => None,
                    "quit" => {
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    }
                    "delay" => {
                        let ms: u64 = words.next().and_then(|w| w.parse().ok()).unwrap_or(0);
                        let text = words.next().unwrap_or_default().to_string();
                        let tx = late_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(Duration::from_millis(ms)).await;
                            let _ = tx.send(reply(id, &text));
                        });
                        None
                    }
                    "zones.list" => {
                        let listing = zones.lock().join(", ");
                        Some(reply(id, &format!("Custom zones: {}", listing)))
                    }
                    _ => Some(reply(id, &format!("echo: {}", command))),
                };
                if let Some(msg) = out {
                    if sink.send(msg).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
