// Core data model for marketchat
// Identifiers, messages, conversations and contacts shared by every module

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Identifier of a marketplace user (buyer or seller)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        UserId::new(id)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        UserId(id)
    }
}

/// Server-assigned message identifier.
///
/// Opaque to the client, but totally ordered so that it can break ties
/// between messages created in the same instant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        MessageId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        MessageId::new(id)
    }
}

/// A confirmed message. Only values the server has assigned an id to are
/// ever represented by this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::new(self.sender_id.clone(), self.receiver_id.clone())
    }

    /// Sort key of a message inside its conversation: `(createdAt, id)`
    pub fn order_key(&self) -> (DateTime<Utc>, MessageId) {
        (self.created_at, self.id.clone())
    }

    pub fn is_from(&self, user: &UserId) -> bool {
        &self.sender_id == user
    }

    pub fn involves(&self, user: &UserId) -> bool {
        &self.sender_id == user || &self.receiver_id == user
    }
}

// Two messages are the same message when the server gave them the same id
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Message {}

/// Canonical unordered pair of participants
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConversationKey {
    low: UserId,
    high: UserId,
}

impl ConversationKey {
    pub fn new(a: UserId, b: UserId) -> Self {
        match a.cmp(&b) {
            Ordering::Greater => ConversationKey { low: b, high: a },
            _ => ConversationKey { low: a, high: b },
        }
    }

    pub fn contains(&self, user: &UserId) -> bool {
        &self.low == user || &self.high == user
    }

    /// The participant that is not `user`, if `user` takes part at all
    pub fn counterpart(&self, user: &UserId) -> Option<&UserId> {
        if &self.low == user {
            Some(&self.high)
        } else if &self.high == user {
            Some(&self.low)
        } else {
            None
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}, {}}}", self.low, self.high)
    }
}

/// Contact summary as returned by the server, without any unread state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactSummary {
    pub user_id: UserId,
    pub display_name: String,
}

/// Contact as presented to the view layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub user_id: UserId,
    pub display_name: String,
    pub unread_count: u32,
}

/// Body of a durable write request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
}

/// Locally tracked outgoing message that has not been confirmed yet.
/// Never enters the message store.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub local_id: String,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DeliveryStatus {
    Sending, // Durable write in flight
    Sent,    // Server assigned an id
    Failed,  // Durable write failed, caller may resubmit
}

/// Lifecycle of the live channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticated,
    RoomJoined,
}

/// Coarse connection indicator for the view layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionSummary {
    Connected,
    Connecting,
    Disconnected,
}

impl ConnectionState {
    pub fn summary(self) -> ConnectionSummary {
        match self {
            ConnectionState::RoomJoined => ConnectionSummary::Connected,
            ConnectionState::Connecting | ConnectionState::Authenticated => ConnectionSummary::Connecting,
            ConnectionState::Disconnected => ConnectionSummary::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionSummary::Connected => "connected",
            ConnectionSummary::Connecting => "connecting",
            ConnectionSummary::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}
