// Connection manager for marketchat
// Owns the single live channel of a session: handshake, room join,
// reconnection with backoff, and typed event dispatch to subscribers.

use log::{debug, info};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::ReconnectPolicy;
use crate::models::{ConnectionState, Message, UserId};
use crate::session::{AuthError, SessionContext};
use crate::transport::{ConnectError, Transport, TransportError};

mod lifecycle;

use lifecycle::Lifecycle;

/// Why the channel went down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `close()` was called or the manager was dropped
    ClientClosed,
    /// The channel was lost; a reconnect follows if the policy allows
    Transport(String),
    /// The server refused the credential on a reconnect
    AuthRejected(String),
    /// The reconnect policy gave up
    RetriesExhausted,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ClientClosed => write!(f, "client closed the connection"),
            DisconnectReason::Transport(reason) => write!(f, "transport lost: {}", reason),
            DisconnectReason::AuthRejected(reason) => write!(f, "credential rejected: {}", reason),
            DisconnectReason::RetriesExhausted => write!(f, "reconnect attempts exhausted"),
        }
    }
}

/// Events observable by subscribers of the connection
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected,
    Disconnected(DisconnectReason),
    TransportError(String),
    MessageReceived {
        message: Message,
        /// Display name of the sender, when the payload carried one
        sender_name: Option<String>,
    },
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    senders: HashMap<u64, mpsc::UnboundedSender<ConnectionEvent>>,
}

/// State shared between the manager, its lifecycle task and subscriptions
struct Shared {
    subscribers: Mutex<Subscribers>,
    state: watch::Sender<ConnectionState>,
    /// Bumped every time a room is joined; emits are only served on the
    /// channel that was joined when they were issued
    epoch: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            subscribers: Mutex::new(Subscribers::default()),
            state,
            epoch: AtomicU64::new(0),
        }
    }

    fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers();
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.senders.insert(id, tx);
        Subscription {
            id,
            rx,
            shared: Arc::downgrade(self),
        }
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Start a new room epoch, returning it
    fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn subscribers(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!("Connection state {:?} -> {:?}", previous, next);
        }
    }

    fn broadcast(&self, event: ConnectionEvent) {
        let mut subscribers = self.subscribers();
        // Drop senders whose receiving side has gone away
        subscribers.senders.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    fn detach_all(&self) {
        let mut subscribers = self.subscribers();
        debug!("Detaching {} subscribers", subscribers.senders.len());
        subscribers.senders.clear();
    }
}

/// A live feed of connection events. Dropping it detaches from the manager.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Next event, or `None` once the manager has been torn down
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ConnectionEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.subscribers().senders.remove(&self.id);
        }
    }
}

pub(crate) enum Command {
    Emit {
        name: String,
        payload: Value,
        epoch: u64,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
}

impl Command {
    fn reject(self, error: TransportError) {
        match self {
            Command::Emit { reply, .. } => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

/// Cloneable write access to the live channel
#[derive(Clone)]
pub struct ConnectionHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    /// Send a named event over the channel. Only accepted while the room is
    /// joined; nothing is buffered for a later reconnect.
    pub async fn emit(&self, name: &str, payload: Value) -> Result<(), TransportError> {
        // Read before the state so a rejoin in between makes this emit stale
        let epoch = self.shared.epoch();
        if *self.state.borrow() != ConnectionState::RoomJoined {
            return Err(TransportError::NotConnected);
        }
        let (reply, result) = oneshot::channel();
        self.commands
            .send(Command::Emit {
                name: name.to_string(),
                payload,
                epoch,
                reply,
            })
            .await
            .map_err(|_| TransportError::Closed)?;
        result.await.map_err(|_| TransportError::Closed)?
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

pub struct ConnectionManager {
    user_id: UserId,
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Open the session's channel.
    ///
    /// The first handshake happens before this returns: a refused credential
    /// fails with [`AuthError::Rejected`]. Any other first failure is
    /// recoverable and the returned manager is already retrying.
    pub async fn open(
        session: &SessionContext,
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
    ) -> Result<Self, AuthError> {
        let (manager, _first) = Self::open_subscribed(session, transport, policy).await?;
        Ok(manager)
    }

    /// Like [`open`](Self::open), with a subscription attached before the
    /// lifecycle starts, so it sees every event including the first
    /// `Connected` and any message delivered right after the room join
    pub async fn open_subscribed(
        session: &SessionContext,
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
    ) -> Result<(Self, Subscription), AuthError> {
        let shared = Arc::new(Shared::new());
        let subscription = shared.subscribe();
        shared.set_state(ConnectionState::Connecting);

        let first = transport.connect(session.credential()).await;
        if let Err(ConnectError::Unauthorized(reason)) = &first {
            shared.set_state(ConnectionState::Disconnected);
            return Err(AuthError::Rejected(reason.clone()));
        }

        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let lifecycle = Lifecycle {
            user_id: session.user_id().clone(),
            credential: session.credential().to_string(),
            transport,
            policy,
            shared: shared.clone(),
            commands: commands_rx,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(lifecycle.run(first));

        let manager = Self {
            user_id: session.user_id().clone(),
            shared,
            commands: commands_tx,
            shutdown: shutdown_tx,
            task: Some(task),
        };
        Ok((manager, subscription))
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn subscribe(&self) -> Subscription {
        self.shared.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers().senders.len()
    }

    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            commands: self.commands.clone(),
            state: self.shared.state.subscribe(),
            shared: self.shared.clone(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub async fn emit(&self, name: &str, payload: Value) -> Result<(), TransportError> {
        self.handle().emit(name, payload).await
    }

    /// Close the channel, wait for the lifecycle to finish, then detach
    /// every subscriber
    pub async fn close(mut self) {
        info!("Closing connection for {}", self.user_id);
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.shared.set_state(ConnectionState::Disconnected);
        self.shared.detach_all();
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // The lifecycle task closes the transport when it sees this
        let _ = self.shutdown.send(true);
    }
}
