//! The one call collaborators use to talk to a game server.

use std::sync::Arc;
use std::time::Duration;

use log::warn;

use crate::correlator;
use crate::error::GatewayError;
use crate::registry::Registry;
use crate::types::ServerIdentity;

pub struct Gateway {
    registry: Arc<Registry>,
    default_timeout: Duration,
}

impl Gateway {
    pub fn new(registry: Arc<Registry>, default_timeout: Duration) -> Self {
        Self {
            registry,
            default_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Run `command` on the server and return its reply text.
    ///
    /// Connect failures come back untouched.  A broken session is evicted
    /// so the next call reconnects; a command timeout keeps the session.
    pub async fn send_command(
        &self,
        identity: &ServerIdentity,
        command: &str,
        timeout: Duration,
    ) -> Result<String, GatewayError> {
        let session = self.registry.get_session(identity).await?;

        match correlator::execute(&session, command, timeout).await {
            Ok(reply) => Ok(reply),
            Err(e) if e.is_transport() => {
                warn!("Command to {} failed: {}", identity, e);
                self.registry.invalidate_session(identity, &session);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn send_command_default(
        &self,
        identity: &ServerIdentity,
        command: &str,
    ) -> Result<String, GatewayError> {
        self.send_command(identity, command, self.default_timeout)
            .await
    }
}
