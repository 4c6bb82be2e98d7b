//! WebSocket [`Connector`](super::Connector) for WebRcon and text consoles.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{Connector, Link};
use crate::error::GatewayError;
use crate::protocol::Protocol;
use crate::types::ServerIdentity;

/// Connects to the game server's WebSocket RCON listener.
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        identity: &ServerIdentity,
        protocol: Protocol,
        timeout: Duration,
    ) -> Result<Link, GatewayError> {
        let url = protocol.endpoint_url(identity);
        let endpoint = identity.to_string();

        let ws = match tokio::time::timeout(timeout, connect_async(url.as_str())).await {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                return Err(GatewayError::ConnectRefused {
                    endpoint,
                    reason: e.to_string(),
                })
            }
            Err(_) => return Err(GatewayError::ConnectTimeout { endpoint, timeout }),
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(ws, outbound_rx, inbound_tx, endpoint));

        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// Shuttles messages between the socket and the link channels until either
/// side goes away.
async fn pump(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<String>,
    endpoint: String,
) {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        warn!("Write to {} failed: {}", endpoint, e);
                        break;
                    }
                }
                None => {
                    // Session let go of the link.
                    let _ = sink.close().await;
                    break;
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if inbound.send(text).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => {
                        if inbound.send(text).is_err() {
                            break;
                        }
                    }
                    Err(_) => warn!("Dropping non-UTF-8 frame from {}", endpoint),
                },
                Some(Ok(Message::Close(_))) | None => {
                    debug!("{} closed the connection", endpoint);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Read from {} failed: {}", endpoint, e);
                    break;
                }
            },
        }
    }
}
