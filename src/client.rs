// ChatClient: the surface exposed to the view layer
// Wires the session, connection manager, store, contact directory and
// delivery coordinator together for one logged-in user.

use log::info;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::{HistoryApi, HttpApi, MessageWriter};
use crate::config::{ClientConfig, ReconnectPolicy};
use crate::connection::{ConnectionManager, Subscription};
use crate::contacts::ContactDirectory;
use crate::delivery::{DeliveryCoordinator, OutgoingMessage};
use crate::error::ChatError;
use crate::models::{ConnectionState, ConnectionSummary, Contact, Message, UserId};
use crate::session::SessionContext;
use crate::store::{MessageStore, SharedStore};
use crate::transport::{Transport, WebSocketTransport};

pub struct ChatClient {
    session: SessionContext,
    connection: ConnectionManager,
    coordinator: DeliveryCoordinator,
    contacts: Arc<ContactDirectory>,
    store: SharedStore,
    pump: JoinHandle<()>,
}

impl ChatClient {
    /// Connect using the production collaborators: REST over `reqwest` and
    /// the websocket push channel
    pub async fn connect(session: SessionContext, config: &ClientConfig) -> Result<Self, ChatError> {
        let api = Arc::new(HttpApi::new(config, &session)?);
        let transport = Arc::new(WebSocketTransport::new(config.socket_url.clone()));
        Self::with_collaborators(session, transport, api.clone(), api, config.reconnect.clone()).await
    }

    pub async fn with_collaborators(
        session: SessionContext,
        transport: Arc<dyn Transport>,
        history: Arc<dyn HistoryApi>,
        writer: Arc<dyn MessageWriter>,
        policy: ReconnectPolicy,
    ) -> Result<Self, ChatError> {
        // The coordinator's feed is attached before the lifecycle starts, so
        // pushes delivered right after the room join are not missed
        let (connection, feed) = ConnectionManager::open_subscribed(&session, transport, policy).await?;
        let store = MessageStore::shared();
        let contacts = Arc::new(ContactDirectory::new(session.user_id().clone(), history.clone()));
        let coordinator = DeliveryCoordinator::new(
            session.clone(),
            store.clone(),
            contacts.clone(),
            history,
            writer,
            connection.handle(),
        );
        let pump = coordinator.spawn(feed);
        info!("Chat session started for {}", session.user_id());

        Ok(Self {
            session,
            connection,
            coordinator,
            contacts,
            store,
            pump,
        })
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub async fn refresh_contacts(&self) -> Result<Vec<Contact>, ChatError> {
        Ok(self.contacts.refresh().await?)
    }

    pub async fn contacts(&self) -> Vec<Contact> {
        self.contacts.contacts().await
    }

    /// Open the conversation with `contact`, clearing its unread count
    pub async fn open(&self, contact: &UserId) -> Result<Vec<Message>, ChatError> {
        Ok(self.coordinator.open_conversation(contact).await?)
    }

    pub async fn close_conversation(&self) {
        self.coordinator.close_conversation().await;
    }

    pub async fn active_contact(&self) -> Option<UserId> {
        self.contacts.active().await
    }

    /// Send to the open conversation
    pub async fn send(&self, content: &str) -> Result<OutgoingMessage, ChatError> {
        let active = self.contacts.active().await;
        Ok(self.coordinator.send(active.as_ref(), content)?)
    }

    pub fn send_to(&self, contact: &UserId, content: &str) -> Result<OutgoingMessage, ChatError> {
        Ok(self.coordinator.send(Some(contact), content)?)
    }

    pub async fn messages(&self, contact: &UserId) -> Vec<Message> {
        self.coordinator.messages(contact).await
    }

    /// Unread messages across all contacts
    pub async fn total_unread(&self) -> u32 {
        self.contacts.total_unread().await
    }

    pub fn connection_state(&self) -> ConnectionSummary {
        self.connection.state().summary()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    pub fn subscribe(&self) -> Subscription {
        self.connection.subscribe()
    }

    /// Tear the session down: close the channel and forget all state
    pub async fn logout(self) {
        let ChatClient {
            session,
            connection,
            contacts,
            store,
            pump,
            ..
        } = self;
        connection.close().await;
        // Closing detached the coordinator's subscription, so the pump ends
        let _ = pump.await;
        store.lock().await.clear();
        contacts.clear().await;
        info!("Logged out {}", session.user_id());
    }
}
