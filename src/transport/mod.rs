//! Raw message pipes to game servers.
//!
//! A [`Connector`] turns a [`ServerIdentity`] into a [`Link`]: a pair of
//! channels carrying whole text messages, fed by a pump task that owns
//! the actual socket.  Sessions only ever see the channels.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::GatewayError;
use crate::protocol::Protocol;
use crate::types::ServerIdentity;

pub mod websocket;
pub use websocket::WebSocketConnector;

/// An established connection.
///
/// Dropping `outbound` asks the pump to close the socket; the pump drops
/// its end of `inbound` once the socket is gone.
pub struct Link {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection, giving up after `timeout`.
    async fn connect(
        &self,
        identity: &ServerIdentity,
        protocol: Protocol,
        timeout: Duration,
    ) -> Result<Link, GatewayError>;
}
