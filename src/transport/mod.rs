// Live channel abstraction for marketchat
// The connection manager talks to the push server only through these traits,
// which keeps the real websocket and the fakes used in tests interchangeable.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::UserId;

pub mod websocket;

pub use websocket::WebSocketTransport;

/// Event names understood by the push server
pub mod events {
    pub const JOIN_ROOM: &str = "joinRoom";
    pub const SEND_MESSAGE: &str = "send-message";
    pub const RECEIVE_MESSAGE: &str = "receiveMessage";
}

/// Failures while establishing a channel
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// The server refused the credential. Not retried.
    #[error("Credential rejected: {0}")]
    Unauthorized(String),

    /// The server could not be reached
    #[error("Server unreachable: {0}")]
    Unreachable(String),

    /// The server answered but the handshake failed
    #[error("Handshake failed: {0}")]
    Handshake(String),
}

/// Failures on an established channel
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Not connected")]
    NotConnected,

    #[error("Channel closed")]
    Closed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Inbound lifecycle signals and events from an established channel
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
    Event { name: String, payload: Value },
    /// Non-fatal error reported by the channel
    Error(String),
    /// The channel went away; no further signals follow
    Disconnect(String),
}

/// Write half of an established channel
#[async_trait]
pub trait TransportSink: Send {
    async fn send_event(&mut self, name: &str, payload: Value) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;

    async fn join_room(&mut self, user_id: &UserId) -> Result<(), TransportError> {
        self.send_event(events::JOIN_ROOM, Value::String(user_id.to_string()))
            .await
    }
}

/// An established channel: a sink for directives and a stream of signals
pub struct TransportLink {
    pub sink: Box<dyn TransportSink>,
    pub inbound: mpsc::Receiver<TransportSignal>,
}

/// Factory for channels to the push server
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, credential: &str) -> Result<TransportLink, ConnectError>;
}
