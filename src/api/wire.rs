// Wire formats of the marketplace API and push server
//
// The server is inconsistent about how it spells a message: participants may
// be plain ids (`sender`, `senderId`) or populated user objects
// (`sender: {_id, name}`), the id may be `_id` or `id`, and the timestamp
// `createdAt` or `timestamp`. Everything is normalized here so the rest of
// the crate only sees scalar user ids.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use super::ApiError;
use crate::models::{ContactSummary, Message, MessageId, UserId};

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum UserRef {
    Id(String),
    Populated {
        #[serde(rename = "_id", alias = "id")]
        id: String,
        #[serde(default)]
        name: Option<String>,
    },
}

impl UserRef {
    fn id(&self) -> &str {
        match self {
            UserRef::Id(id) => id,
            UserRef::Populated { id, .. } => id,
        }
    }

    fn name(&self) -> Option<&str> {
        match self {
            UserRef::Id(_) => None,
            UserRef::Populated { name, .. } => name.as_deref(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(rename = "_id")]
    object_id: Option<String>,
    id: Option<String>,
    sender: Option<UserRef>,
    sender_id: Option<UserRef>,
    receiver: Option<UserRef>,
    receiver_id: Option<UserRef>,
    content: Option<String>,
    created_at: Option<DateTime<Utc>>,
    timestamp: Option<DateTime<Utc>>,
}

/// A message decoded from the wire, plus what the payload told us about
/// the sender's display name
#[derive(Debug, Clone)]
pub struct DecodedMessage {
    pub message: Message,
    pub sender_name: Option<String>,
}

/// Normalize any of the server's message shapes
pub fn decode_message(value: Value) -> Result<DecodedMessage, ApiError> {
    let wire: WireMessage =
        serde_json::from_value(value).map_err(|e| ApiError::Decode(format!("message: {}", e)))?;

    let id = wire
        .object_id
        .or(wire.id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::Decode("message without id".to_string()))?;
    let sender = wire
        .sender_id
        .or(wire.sender)
        .ok_or_else(|| ApiError::Decode(format!("message {} has no sender", id)))?;
    let receiver = wire
        .receiver_id
        .or(wire.receiver)
        .ok_or_else(|| ApiError::Decode(format!("message {} has no receiver", id)))?;
    let content = wire
        .content
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::Decode(format!("message {} has no content", id)))?;
    let created_at = wire
        .created_at
        .or(wire.timestamp)
        .ok_or_else(|| ApiError::Decode(format!("message {} has no timestamp", id)))?;

    Ok(DecodedMessage {
        sender_name: sender.name().map(str::to_string),
        message: Message {
            id: MessageId::new(id),
            sender_id: UserId::new(sender.id()),
            receiver_id: UserId::new(receiver.id()),
            content,
            created_at,
        },
    })
}

/// Payload used when relaying a confirmed message over the live channel.
/// Carries both spellings so older clients can read it.
pub fn encode_message(message: &Message) -> Value {
    json!({
        "_id": message.id.as_str(),
        "sender": message.sender_id.as_str(),
        "receiver": message.receiver_id.as_str(),
        "senderId": message.sender_id.as_str(),
        "receiverId": message.receiver_id.as_str(),
        "content": message.content,
        "createdAt": message.created_at.to_rfc3339(),
    })
}

#[derive(Debug, Deserialize)]
struct WireContact {
    #[serde(rename = "_id")]
    object_id: Option<String>,
    id: Option<String>,
    name: Option<String>,
    email: Option<String>,
}

pub fn decode_contact(value: Value) -> Result<ContactSummary, ApiError> {
    let wire: WireContact =
        serde_json::from_value(value).map_err(|e| ApiError::Decode(format!("contact: {}", e)))?;
    let id = wire
        .object_id
        .or(wire.id)
        .ok_or_else(|| ApiError::Decode("contact without id".to_string()))?;
    let display_name = wire
        .name
        .filter(|n| !n.trim().is_empty())
        .or(wire.email)
        .unwrap_or_else(|| id.clone());
    Ok(ContactSummary {
        user_id: UserId::new(id),
        display_name,
    })
}
