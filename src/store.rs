//! Message store
//!
//! Ordered, deduplicated log of confirmed messages per conversation. A
//! message's server id is its only identity: inserting an id that is
//! already present is a no-op, whichever channel it came from. Messages are
//! kept sorted by `(createdAt, id)` at insertion time, so merging a history
//! page with live traffic never reorders what is already there.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;

use crate::models::{ConversationKey, Message, MessageId};

/// Store handle shared by the delivery coordinator and the client facade
pub type SharedStore = Arc<TokioMutex<MessageStore>>;

#[derive(Debug, Default)]
pub struct Conversation {
    ordered: BTreeMap<(DateTime<Utc>, MessageId), Message>,
    ids: HashSet<MessageId>,
}

impl Conversation {
    fn insert_if_absent(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id.clone()) {
            return false;
        }
        self.ordered.insert(message.order_key(), message);
        true
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> + '_ {
        self.ordered.values()
    }

    pub fn last(&self) -> Option<&Message> {
        self.ordered.values().next_back()
    }
}

#[derive(Debug, Default)]
pub struct MessageStore {
    conversations: HashMap<ConversationKey, Conversation>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedStore {
        Arc::new(TokioMutex::new(Self::new()))
    }

    /// Insert `message` unless a message with the same id is already stored.
    /// Returns `true` if the message was newly inserted.
    pub fn insert_if_absent(&mut self, key: &ConversationKey, message: Message) -> bool {
        if &message.conversation_key() != key {
            warn!(
                "Refusing to file message {} under {}: it belongs to {}",
                message.id,
                key,
                message.conversation_key()
            );
            return false;
        }
        let id = message.id.clone();
        let inserted = self
            .conversations
            .entry(key.clone())
            .or_default()
            .insert_if_absent(message);
        if inserted {
            debug!("Stored message {} in {}", id, key);
        } else {
            debug!("Message {} already present in {}", id, key);
        }
        inserted
    }

    /// Merge a bulk history fetch with whatever is already stored.
    /// Returns how many messages were new.
    pub fn load_history(&mut self, key: &ConversationKey, messages: impl IntoIterator<Item = Message>) -> usize {
        let mut added = 0;
        for message in messages {
            if self.insert_if_absent(key, message) {
                added += 1;
            }
        }
        debug!("History merge added {} messages to {}", added, key);
        added
    }

    /// Messages of a conversation in `(createdAt, id)` order, as stored right now.
    /// Calling it again restarts from the beginning.
    pub fn read<'a>(&'a self, key: &ConversationKey) -> impl Iterator<Item = &'a Message> + 'a {
        self.conversations
            .get(key)
            .into_iter()
            .flat_map(|conversation| conversation.iter())
    }

    pub fn conversation(&self, key: &ConversationKey) -> Option<&Conversation> {
        self.conversations.get(key)
    }

    pub fn contains(&self, key: &ConversationKey, id: &MessageId) -> bool {
        self.conversations
            .get(key)
            .map(|conversation| conversation.contains(id))
            .unwrap_or(false)
    }

    pub fn len(&self, key: &ConversationKey) -> usize {
        self.conversations.get(key).map(Conversation::len).unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.conversations.clear();
    }
}
