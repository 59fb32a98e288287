//! Delivery coordinator
//!
//! Merges the three sources of messages into the [`MessageStore`]:
//! confirmed sends, history pages and push deliveries. Every path goes
//! through `insert_if_absent`, keyed by the server-assigned id, so a push
//! echo of a message we just sent is a no-op and a failed send never
//! shows up in the store.
//!
//! Lock order is always store, then contacts.
//!
//! [`MessageStore`]: crate::store::MessageStore

use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api::{wire, ApiError, HistoryApi, MessageWriter};
use crate::connection::{ConnectionEvent, ConnectionHandle, Subscription};
use crate::contacts::ContactDirectory;
use crate::models::{ConversationKey, DeliveryStatus, Message, NewMessage, PendingMessage, UserId};
use crate::session::SessionContext;
use crate::store::SharedStore;
use crate::transport::events;

/// A send rejected before any network call
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message content cannot be empty")]
    EmptyContent,

    #[error("No conversation selected")]
    NoCounterpart,
}

/// The durable write did not produce a stored message
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Failed to save message: {0}")]
    Write(#[from] ApiError),

    #[error("Server confirmed message {0} for a different conversation")]
    Mismatch(String),

    #[error("Send task ended before the server confirmed")]
    Abandoned,
}

/// Result of [`DeliveryCoordinator::send`]: the pending value to render
/// right away and the eventual confirmation
pub struct OutgoingMessage {
    pending: PendingMessage,
    confirmation: oneshot::Receiver<Result<Message, SendError>>,
}

impl OutgoingMessage {
    pub fn pending(&self) -> &PendingMessage {
        &self.pending
    }

    /// Wait for the durable write. On success the message is already in
    /// the store.
    pub async fn confirmed(self) -> Result<Message, SendError> {
        self.settle().await.1
    }

    /// Like [`confirmed`](Self::confirmed), also handing back the pending
    /// value marked `Sent` or `Failed`
    pub async fn settle(self) -> (PendingMessage, Result<Message, SendError>) {
        let mut pending = self.pending;
        let result = self.confirmation.await.unwrap_or(Err(SendError::Abandoned));
        pending.status = match &result {
            Ok(_) => DeliveryStatus::Sent,
            Err(_) => DeliveryStatus::Failed,
        };
        (pending, result)
    }
}

struct Inner {
    session: SessionContext,
    store: SharedStore,
    contacts: Arc<ContactDirectory>,
    history: Arc<dyn HistoryApi>,
    writer: Arc<dyn MessageWriter>,
    connection: ConnectionHandle,
}

#[derive(Clone)]
pub struct DeliveryCoordinator {
    inner: Arc<Inner>,
}

impl DeliveryCoordinator {
    pub fn new(
        session: SessionContext,
        store: SharedStore,
        contacts: Arc<ContactDirectory>,
        history: Arc<dyn HistoryApi>,
        writer: Arc<dyn MessageWriter>,
        connection: ConnectionHandle,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                session,
                store,
                contacts,
                history,
                writer,
                connection,
            }),
        }
    }

    /// Validate and start sending `content` to `receiver`.
    ///
    /// Returns as soon as the write is issued. The write runs in its own
    /// task, so dropping the returned value does not cancel it.
    pub fn send(&self, receiver: Option<&UserId>, content: &str) -> Result<OutgoingMessage, ValidationError> {
        let receiver = receiver.ok_or(ValidationError::NoCounterpart)?;
        if content.trim().is_empty() {
            return Err(ValidationError::EmptyContent);
        }

        let sender = self.inner.session.user_id().clone();
        let pending = PendingMessage {
            local_id: Uuid::new_v4().to_string(),
            sender_id: sender.clone(),
            receiver_id: receiver.clone(),
            content: content.to_string(),
            created_at: Utc::now(),
            status: DeliveryStatus::Sending,
        };
        let request = NewMessage {
            sender_id: sender,
            receiver_id: receiver.clone(),
            content: content.to_string(),
        };
        info!("Sending message {} to {}", pending.local_id, receiver);

        let (reply, confirmation) = oneshot::channel();
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let result = inner.complete_send(request).await;
            let _ = reply.send(result);
        });

        Ok(OutgoingMessage { pending, confirmation })
    }

    /// Apply one event from the connection
    pub async fn handle_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::MessageReceived { message, sender_name } => {
                self.inner.accept_push(message, sender_name.as_deref()).await;
            }
            ConnectionEvent::Connected => info!("Live channel ready"),
            ConnectionEvent::Disconnected(reason) => info!("Live channel down: {}", reason),
            ConnectionEvent::TransportError(detail) => debug!("Live channel error: {}", detail),
        }
    }

    /// Consume a subscription, applying its events one at a time in order
    pub fn spawn(&self, mut subscription: Subscription) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                coordinator.handle_event(event).await;
            }
            debug!("Connection event feed closed");
        })
    }

    /// Make `contact` the open conversation, then fetch and merge its history.
    /// Returns the conversation as stored after the merge.
    pub async fn open_conversation(&self, contact: &UserId) -> Result<Vec<Message>, ApiError> {
        let inner = &self.inner;
        inner.contacts.open(contact).await;

        let history = inner.history.fetch_history(contact).await?;
        let key = self.key_with(contact);
        let mut store = inner.store.lock().await;
        let added = store.load_history(&key, history);
        info!("Loaded history with {}: {} new messages", contact, added);
        Ok(store.read(&key).cloned().collect())
    }

    pub async fn close_conversation(&self) {
        self.inner.contacts.close().await;
    }

    /// Snapshot of the conversation with `contact`
    pub async fn messages(&self, contact: &UserId) -> Vec<Message> {
        let key = self.key_with(contact);
        let store = self.inner.store.lock().await;
        store.read(&key).cloned().collect()
    }

    fn key_with(&self, contact: &UserId) -> ConversationKey {
        ConversationKey::new(self.inner.session.user_id().clone(), contact.clone())
    }
}

impl Inner {
    async fn complete_send(&self, request: NewMessage) -> Result<Message, SendError> {
        let message = match self.writer.create_message(&request).await {
            Ok(message) => message,
            Err(e) => {
                error!("Message to {} was not saved: {}", request.receiver_id, e);
                return Err(SendError::Write(e));
            }
        };

        let key = ConversationKey::new(request.sender_id.clone(), request.receiver_id.clone());
        if message.conversation_key() != key {
            error!("Server returned message {} for {} instead of {}", message.id, message.conversation_key(), key);
            return Err(SendError::Mismatch(message.id.to_string()));
        }

        {
            let mut store = self.store.lock().await;
            if store.insert_if_absent(&key, message.clone()) {
                debug!("Confirmed message {} stored", message.id);
            }
            self.contacts.record_outgoing(&request.receiver_id).await;
        }

        // Relay to the counterpart's room so they do not need to refetch
        if let Err(e) = self
            .connection
            .emit(events::SEND_MESSAGE, wire::encode_message(&message))
            .await
        {
            warn!("Message {} saved but not relayed: {}", message.id, e);
        }
        Ok(message)
    }

    /// Returns `true` if the message was new
    async fn accept_push(&self, message: Message, sender_name: Option<&str>) -> bool {
        let me = self.session.user_id();
        if !message.involves(me) {
            warn!(
                "Ignoring message {} between {} and {}",
                message.id, message.sender_id, message.receiver_id
            );
            return false;
        }

        let key = message.conversation_key();
        let from_me = message.is_from(me);
        let sender = message.sender_id.clone();
        let receiver = message.receiver_id.clone();

        let mut store = self.store.lock().await;
        if !store.insert_if_absent(&key, message) {
            return false;
        }
        if from_me {
            // Sent from another session of ours
            self.contacts.record_outgoing(&receiver).await;
        } else {
            let unread = self.contacts.record_incoming(&sender, sender_name).await;
            debug!("Unread from {}: {}", sender, unread);
        }
        true
    }
}
