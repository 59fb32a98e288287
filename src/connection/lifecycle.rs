// Connection lifecycle task
//
// Disconnected -> Connecting -> Authenticated -> RoomJoined, and back to
// Disconnected on transport loss, explicit close or terminal failure.
// The room is joined exactly once per established channel.

use log::{debug, error, info, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use super::{Command, ConnectionEvent, DisconnectReason, Shared};
use crate::api::wire::decode_message;
use crate::config::ReconnectPolicy;
use crate::models::{ConnectionState, UserId};
use crate::transport::{events, ConnectError, Transport, TransportError, TransportLink, TransportSignal};

/// How a served connection ended
enum Served {
    Closed,
    Lost(String),
}

pub(super) struct Lifecycle {
    pub(super) user_id: UserId,
    pub(super) credential: String,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) policy: ReconnectPolicy,
    pub(super) shared: Arc<Shared>,
    pub(super) commands: mpsc::Receiver<Command>,
    pub(super) shutdown: watch::Receiver<bool>,
}

impl Lifecycle {
    pub(super) async fn run(mut self, first: Result<TransportLink, ConnectError>) {
        let mut outcome = first;
        let mut reconnects: u32 = 0;

        loop {
            match outcome {
                Ok(link) => {
                    reconnects = 0;
                    match self.serve(link).await {
                        Served::Closed => return self.finish_closed(),
                        Served::Lost(reason) => {
                            warn!("Connection lost: {}", reason);
                            self.shared.set_state(ConnectionState::Disconnected);
                            self.shared
                                .broadcast(ConnectionEvent::Disconnected(DisconnectReason::Transport(reason)));
                        }
                    }
                }
                Err(ConnectError::Unauthorized(reason)) => {
                    error!("Server rejected the session credential: {}", reason);
                    self.shared
                        .broadcast(ConnectionEvent::TransportError(format!("credential rejected: {}", reason)));
                    self.shared.set_state(ConnectionState::Disconnected);
                    self.shared
                        .broadcast(ConnectionEvent::Disconnected(DisconnectReason::AuthRejected(reason)));
                    return;
                }
                Err(e) => {
                    warn!("Connection attempt failed: {}", e);
                    self.shared.set_state(ConnectionState::Disconnected);
                    self.shared.broadcast(ConnectionEvent::TransportError(e.to_string()));
                }
            }

            reconnects += 1;
            if !self.policy.allows(reconnects) {
                error!("Giving up after {} reconnect attempts", reconnects - 1);
                self.shared
                    .broadcast(ConnectionEvent::Disconnected(DisconnectReason::RetriesExhausted));
                return;
            }

            let delay = self.policy.delay(reconnects);
            info!("Reconnecting in {:?} (attempt {})", delay, reconnects);
            self.shared.set_state(ConnectionState::Connecting);
            if !self.wait(delay).await {
                return self.finish_closed();
            }
            outcome = match self.connect().await {
                Some(result) => result,
                None => return self.finish_closed(),
            };
        }
    }

    fn finish_closed(&self) {
        self.shared.set_state(ConnectionState::Disconnected);
        self.shared
            .broadcast(ConnectionEvent::Disconnected(DisconnectReason::ClientClosed));
    }

    /// Sleep out a backoff delay. Returns `false` if shutdown was requested.
    async fn wait(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                _ = self.shutdown.changed() => return false,
                Some(command) = self.commands.recv() => command.reject(TransportError::NotConnected),
            }
        }
    }

    /// One handshake attempt. Returns `None` if shutdown was requested.
    async fn connect(&mut self) -> Option<Result<TransportLink, ConnectError>> {
        self.shared.set_state(ConnectionState::Connecting);
        let transport = self.transport.clone();
        let credential = self.credential.clone();
        let attempt = async move { transport.connect(&credential).await };
        tokio::pin!(attempt);
        loop {
            tokio::select! {
                result = &mut attempt => return Some(result),
                _ = self.shutdown.changed() => return None,
                Some(command) = self.commands.recv() => command.reject(TransportError::NotConnected),
            }
        }
    }

    async fn serve(&mut self, link: TransportLink) -> Served {
        let TransportLink { mut sink, mut inbound } = link;
        self.shared.set_state(ConnectionState::Authenticated);

        info!("Joining room {}", self.user_id);
        if let Err(e) = sink.join_room(&self.user_id).await {
            return Served::Lost(format!("join room failed: {}", e));
        }
        let epoch = self.shared.next_epoch();
        self.shared.set_state(ConnectionState::RoomJoined);
        self.shared.broadcast(ConnectionEvent::Connected);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    if let Err(e) = sink.close().await {
                        debug!("Error while closing transport: {}", e);
                    }
                    return Served::Closed;
                }
                Some(command) = self.commands.recv() => match command {
                    Command::Emit { epoch: issued, .. } if issued != epoch => {
                        debug!("Rejecting emit issued on an earlier connection");
                        command.reject(TransportError::NotConnected);
                    }
                    Command::Emit { name, payload, reply, .. } => {
                        let result = sink.send_event(&name, payload).await;
                        if let Err(e) = &result {
                            warn!("Failed to emit '{}': {}", name, e);
                        }
                        let _ = reply.send(result);
                    }
                },
                signal = inbound.recv() => match signal {
                    Some(TransportSignal::Event { name, payload }) => self.dispatch(&name, payload),
                    Some(TransportSignal::Error(detail)) => {
                        warn!("Transport error: {}", detail);
                        self.shared.broadcast(ConnectionEvent::TransportError(detail));
                    }
                    Some(TransportSignal::Disconnect(reason)) => return Served::Lost(reason),
                    None => return Served::Lost("transport stream ended".to_string()),
                },
            }
        }
    }

    fn dispatch(&self, name: &str, payload: Value) {
        match name {
            events::RECEIVE_MESSAGE => match decode_message(payload) {
                Ok(decoded) => {
                    debug!("Push message {} from {}", decoded.message.id, decoded.message.sender_id);
                    self.shared.broadcast(ConnectionEvent::MessageReceived {
                        message: decoded.message,
                        sender_name: decoded.sender_name,
                    });
                }
                Err(e) => warn!("Dropping undecodable push message: {}", e),
            },
            other => debug!("Ignoring '{}' event", other),
        }
    }
}
