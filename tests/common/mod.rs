// Common test utilities for integration tests
// Scripted fakes for the live channel and the REST API, plus fixtures.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use log::{debug, LevelFilter};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::{sleep, timeout, Instant};

use marketchat::api::{wire, ApiError, HistoryApi, MessageWriter};
use marketchat::connection::{ConnectionEvent, Subscription};
use marketchat::transport::{
    events, ConnectError, Transport, TransportError, TransportLink, TransportSignal, TransportSink,
};
use marketchat::{ChatClient, ContactSummary, Message, MessageId, NewMessage, ReconnectPolicy, SessionContext, UserId};

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

pub const WAIT: Duration = Duration::from_secs(5);

/// Poll `check` until it holds or the wait runs out
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Next event on `subscription`, failing the test after a timeout
pub async fn next_event(subscription: &mut Subscription) -> ConnectionEvent {
    timeout(WAIT, subscription.recv())
        .await
        .expect("timed out waiting for a connection event")
        .expect("subscription was detached")
}

/// Reconnect policy with millisecond delays and no jitter
pub fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy::default()
        .with_delays(Duration::from_millis(5), Duration::from_millis(20))
        .without_jitter()
        .with_max_attempts(max_attempts)
}

pub fn session(user: &str) -> SessionContext {
    SessionContext::new(user, format!("token-{}", user)).expect("valid session")
}

pub fn user(id: &str) -> UserId {
    UserId::new(id)
}

/// A message created `secs` seconds after a fixed epoch
pub fn message(id: &str, from: &str, to: &str, secs: i64, content: &str) -> Message {
    Message {
        id: MessageId::new(id),
        sender_id: UserId::new(from),
        receiver_id: UserId::new(to),
        content: content.to_string(),
        created_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
    }
}

pub fn ids(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.id.as_str()).collect()
}

/// Push payload with the sender populated, the way the server relays it
pub fn populated_payload(message: &Message, sender_name: &str) -> Value {
    json!({
        "_id": message.id.as_str(),
        "sender": {"_id": message.sender_id.as_str(), "name": sender_name},
        "receiver": message.receiver_id.as_str(),
        "content": message.content,
        "createdAt": message.created_at.to_rfc3339(),
    })
}

#[derive(Default)]
struct TransportState {
    failures: VecDeque<ConnectError>,
    fail_always: Option<ConnectError>,
    inbound: Option<mpsc::Sender<TransportSignal>>,
    on_connect: Vec<Value>,
    emitted: Vec<(String, Value)>,
    closed: usize,
}

/// In-memory live channel. Every successful connect produces a new link
/// whose inbound side the test drives.
#[derive(Default)]
pub struct FakeTransport {
    state: Arc<Mutex<TransportState>>,
    connects: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The next connect fails with `error`
    pub fn fail_next(&self, error: ConnectError) {
        self.state.lock().unwrap().failures.push_back(error);
    }

    /// Every connect from now on fails with `error`
    pub fn fail_always(&self, error: ConnectError) {
        self.state.lock().unwrap().fail_always = Some(error);
    }

    /// Deliver `message` on every new link as soon as it is established
    pub fn push_on_connect(&self, message: &Message) {
        self.state.lock().unwrap().on_connect.push(wire::encode_message(message));
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn join_count(&self) -> usize {
        self.emitted_named(events::JOIN_ROOM).len()
    }

    pub fn emitted_named(&self, name: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .emitted
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    async fn signal(&self, signal: TransportSignal) {
        let inbound = self.state.lock().unwrap().inbound.clone();
        let inbound = inbound.expect("no live link");
        inbound.send(signal).await.expect("link reader gone");
    }

    /// Deliver a `receiveMessage` event on the current link
    pub async fn push(&self, payload: Value) {
        self.signal(TransportSignal::Event {
            name: events::RECEIVE_MESSAGE.to_string(),
            payload,
        })
        .await;
    }

    pub async fn push_message(&self, message: &Message) {
        self.push(wire::encode_message(message)).await;
    }

    pub async fn report_error(&self, detail: &str) {
        self.signal(TransportSignal::Error(detail.to_string())).await;
    }

    /// Drop the current link as if the network went away
    pub async fn drop_link(&self, reason: &str) {
        let inbound = self.state.lock().unwrap().inbound.take();
        let inbound = inbound.expect("no live link");
        inbound
            .send(TransportSignal::Disconnect(reason.to_string()))
            .await
            .expect("link reader gone");
    }
}

struct FakeSink {
    state: Arc<Mutex<TransportState>>,
}

#[async_trait]
impl TransportSink for FakeSink {
    async fn send_event(&mut self, name: &str, payload: Value) -> Result<(), TransportError> {
        debug!("fake transport <- {} {}", name, payload);
        self.state.lock().unwrap().emitted.push((name.to_string(), payload));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.closed += 1;
        state.inbound = None;
        Ok(())
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, credential: &str) -> Result<TransportLink, ConnectError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        debug!("fake transport connect with {}", credential);
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        if let Some(error) = &state.fail_always {
            return Err(error.clone());
        }
        let (tx, rx) = mpsc::channel(16);
        for payload in &state.on_connect {
            let _ = tx.try_send(TransportSignal::Event {
                name: events::RECEIVE_MESSAGE.to_string(),
                payload: payload.clone(),
            });
        }
        state.inbound = Some(tx);
        Ok(TransportLink {
            sink: Box::new(FakeSink {
                state: self.state.clone(),
            }),
            inbound: rx,
        })
    }
}

#[derive(Default)]
struct ApiState {
    history: HashMap<UserId, Vec<Message>>,
    history_error: Option<ApiError>,
    contacts: Vec<ContactSummary>,
    write_results: VecDeque<Result<Message, ApiError>>,
    writes: Vec<NewMessage>,
    write_gate: Option<Arc<Notify>>,
    next_id: u32,
}

/// In-memory REST API for one session user
pub struct FakeApi {
    state: Mutex<ApiState>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ApiState {
                next_id: 100,
                ..Default::default()
            }),
        })
    }

    pub fn set_history(&self, counterpart: &str, messages: Vec<Message>) {
        self.state.lock().unwrap().history.insert(UserId::new(counterpart), messages);
    }

    pub fn fail_history(&self, error: ApiError) {
        self.state.lock().unwrap().history_error = Some(error);
    }

    pub fn set_contacts(&self, contacts: &[(&str, &str)]) {
        self.state.lock().unwrap().contacts = contacts
            .iter()
            .map(|(id, name)| ContactSummary {
                user_id: UserId::new(*id),
                display_name: name.to_string(),
            })
            .collect();
    }

    /// Queue the result of the next durable write
    pub fn next_write(&self, result: Result<Message, ApiError>) {
        self.state.lock().unwrap().write_results.push_back(result);
    }

    /// Hold every durable write until `release_writes` is called
    pub fn hold_writes(&self) {
        self.state.lock().unwrap().write_gate = Some(Arc::new(Notify::new()));
    }

    pub fn release_writes(&self) {
        if let Some(gate) = self.state.lock().unwrap().write_gate.take() {
            gate.notify_one();
        }
    }

    pub fn writes(&self) -> Vec<NewMessage> {
        self.state.lock().unwrap().writes.clone()
    }
}

#[async_trait]
impl HistoryApi for FakeApi {
    async fn fetch_history(&self, counterpart: &UserId) -> Result<Vec<Message>, ApiError> {
        let state = self.state.lock().unwrap();
        if let Some(error) = &state.history_error {
            return Err(error.clone());
        }
        Ok(state.history.get(counterpart).cloned().unwrap_or_default())
    }

    async fn fetch_contacts(&self, _user: &UserId) -> Result<Vec<ContactSummary>, ApiError> {
        Ok(self.state.lock().unwrap().contacts.clone())
    }
}

#[async_trait]
impl MessageWriter for FakeApi {
    async fn create_message(&self, request: &NewMessage) -> Result<Message, ApiError> {
        let gate = {
            let mut state = self.state.lock().unwrap();
            state.writes.push(request.clone());
            state.write_gate.clone()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut state = self.state.lock().unwrap();
        if let Some(result) = state.write_results.pop_front() {
            return result;
        }
        state.next_id += 1;
        Ok(Message {
            id: MessageId::new(format!("m{}", state.next_id)),
            sender_id: request.sender_id.clone(),
            receiver_id: request.receiver_id.clone(),
            content: request.content.clone(),
            created_at: Utc::now(),
        })
    }
}

/// A client for `me` wired to fresh fakes, already in its room
pub async fn joined_client(me: &str) -> (ChatClient, Arc<FakeTransport>, Arc<FakeApi>) {
    setup_logging();
    let transport = FakeTransport::new();
    let api = FakeApi::new();
    let client = ChatClient::with_collaborators(session(me), transport.clone(), api.clone(), api.clone(), fast_policy(3))
        .await
        .expect("client should connect");
    assert!(
        eventually(|| {
            let joined = client.connection_state() == marketchat::ConnectionSummary::Connected;
            async move { joined }
        })
        .await,
        "client never joined its room"
    );
    (client, transport, api)
}

/// Wait until the conversation with `with` holds `count` messages
pub async fn wait_for_messages(client: &ChatClient, with: &str, count: usize) -> bool {
    let counterpart = user(with);
    eventually(|| {
        let counterpart = counterpart.clone();
        async move { client.messages(&counterpart).await.len() == count }
    })
    .await
}

/// Wait until `contact` shows `unread` unread messages
pub async fn wait_for_unread(client: &ChatClient, contact: &str, unread: u32) -> bool {
    let contact = user(contact);
    eventually(|| {
        let contact = contact.clone();
        async move {
            client
                .contacts()
                .await
                .iter()
                .any(|c| c.user_id == contact && c.unread_count == unread)
        }
    })
    .await
}
