//! Push-channel contract.
//!
//! The engine does not implement a transport. It consumes a
//! [`ChannelFactory`] that opens a [`Channel`]; everything about framing,
//! TLS and the wire protocol lives behind these two traits.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Push event carrying a single notification payload.
pub const EVENT_NEW_NOTIFICATION: &str = "new-notification";
/// Room-membership control message: join the user's room.
pub const EVENT_JOIN_USER: &str = "join-user";
/// Room-membership control message: leave the user's room.
pub const EVENT_LEAVE_USER: &str = "leave-user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[serde(alias = "websockets")]
    WebSocket,
    /// HTTP long-polling. The degraded fallback.
    Polling,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::WebSocket => "websocket",
            Transport::Polling => "polling",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the factory needs to open one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelOptions {
    pub url: String,
    pub timeout: Duration,
    pub transport: Transport,
    pub with_credentials: bool,
}

/// Inbound traffic on an open channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A named server event and its JSON payload.
    Message {
        event: String,
        payload: serde_json::Value,
    },
    /// Non-fatal transport error reported by the server or the stack.
    Error(String),
}

/// An open, acknowledged channel.
#[async_trait::async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Server-assigned session identifier.
    fn session_id(&self) -> Option<String>;

    /// Transport this channel is running on.
    fn transport(&self) -> Transport;

    /// Queue an outbound event. Fire-and-forget; delivery is not confirmed.
    fn emit(&self, event: &str, payload: serde_json::Value) -> Result<(), SyncError>;

    /// Next inbound event. `None` means the transport dropped.
    async fn recv(&self) -> Option<ChannelEvent>;

    /// Close the channel. Safe to call more than once.
    fn close(&self);
}

/// Opens channels. `open` resolves once the server acknowledged the
/// connection; the caller bounds it with its own timeout.
#[async_trait::async_trait]
pub trait ChannelFactory: Send + Sync + 'static {
    async fn open(&self, options: &ChannelOptions) -> Result<Arc<dyn Channel>, SyncError>;
}
