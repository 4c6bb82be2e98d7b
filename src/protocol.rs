//! Wire framing for commands and replies.
//!
//! * **webrcon**: JSON envelopes carrying an `Identifier` the server echoes
//!   back, so many commands can share one session.
//! * **text**: raw command text out, raw reply text in.  Nothing ties a
//!   reply to its command, so sessions using it run one command at a time.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::types::ServerIdentity;

/// Identifier attached to an outbound command and echoed in its reply.
pub type CorrelationId = i32;

/// Name the server shows as the origin of our commands.
const CLIENT_NAME: &str = "WebRcon";

/// Bytes escaped when the credential becomes a single URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    WebRcon,
    Text,
}

/// One decoded inbound message.  `id` is `None` for server broadcasts and
/// for protocols that carry no identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: Option<CorrelationId>,
    pub payload: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WebRconRequest {
    #[serde(rename = "Identifier")]
    pub identifier: CorrelationId,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Name")]
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WebRconReply {
    #[serde(rename = "Message", default)]
    pub message: String,
    #[serde(rename = "Identifier")]
    pub identifier: CorrelationId,
    #[serde(rename = "Type", default)]
    pub kind: String,
    #[serde(rename = "Stacktrace", default, skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<String>,
}

impl Protocol {
    pub fn carries_ids(self) -> bool {
        matches!(self, Protocol::WebRcon)
    }

    /// WebSocket URL for `identity`.  The credential travels as the path.
    pub fn endpoint_url(self, identity: &ServerIdentity) -> String {
        format!(
            "ws://{}:{}/{}",
            identity.host,
            identity.port,
            utf8_percent_encode(&identity.credential, PATH_SEGMENT)
        )
    }

    pub fn encode(self, id: CorrelationId, command: &str) -> Result<String, GatewayError> {
        match self {
            Protocol::WebRcon => serde_json::to_string(&WebRconRequest {
                identifier: id,
                message: command.to_string(),
                name: CLIENT_NAME.to_string(),
            })
            .map_err(|e| GatewayError::Encode(e.to_string())),
            Protocol::Text => Ok(command.to_string()),
        }
    }

    /// Returns `None` if the message cannot be parsed at all.
    pub fn decode(self, raw: &str) -> Option<Frame> {
        match self {
            Protocol::WebRcon => {
                let reply: WebRconReply = serde_json::from_str(raw).ok()?;
                // Console output and chat arrive with ids <= 0.
                let id = (reply.identifier > 0).then_some(reply.identifier);
                Some(Frame {
                    id,
                    payload: reply.message,
                })
            }
            Protocol::Text => Some(Frame {
                id: None,
                payload: raw.to_string(),
            }),
        }
    }
}
