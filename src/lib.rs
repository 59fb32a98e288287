// Real-time messaging core of the marketplace client
pub mod api;
pub mod client;
pub mod config;
pub mod connection;
pub mod contacts;
pub mod delivery;
pub mod error;
pub mod models;
pub mod session;
pub mod store;
pub mod transport;

// Re-export main types for convenience
pub use client::ChatClient;
pub use config::{ClientConfig, ReconnectPolicy};
pub use error::ChatError;
pub use models::*;
pub use session::SessionContext;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn message(id: &str, from: &str, to: &str) -> Message {
        Message {
            id: MessageId::new(id),
            sender_id: UserId::new(from),
            receiver_id: UserId::new(to),
            content: "Is the logo gig still available?".to_string(),
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn test_conversation_key_is_unordered() {
        let ab = ConversationKey::new(UserId::new("buyer"), UserId::new("seller"));
        let ba = ConversationKey::new(UserId::new("seller"), UserId::new("buyer"));
        assert_eq!(ab, ba);
        assert!(ab.contains(&UserId::new("buyer")));
        assert_eq!(ab.counterpart(&UserId::new("seller")), Some(&UserId::new("buyer")));
        assert_eq!(ab.counterpart(&UserId::new("someone")), None);
    }

    #[test]
    fn test_message_conversation_key() {
        let sent = message("m1", "u1", "u2");
        let received = message("m2", "u2", "u1");
        assert_eq!(sent.conversation_key(), received.conversation_key());
        assert!(sent.is_from(&UserId::new("u1")));
        assert!(received.involves(&UserId::new("u1")));
        assert!(!received.involves(&UserId::new("u3")));
    }

    #[test]
    fn test_messages_with_same_id_are_equal() {
        let original = message("m1", "u1", "u2");
        let mut echoed = original.clone();
        echoed.content = "different rendering".to_string();
        assert_eq!(original, echoed);
        assert_ne!(original, message("m2", "u1", "u2"));
    }

    #[test]
    fn test_connection_summary() {
        assert_eq!(ConnectionState::RoomJoined.summary(), ConnectionSummary::Connected);
        assert_eq!(ConnectionState::Authenticated.summary(), ConnectionSummary::Connecting);
        assert_eq!(ConnectionState::Connecting.summary(), ConnectionSummary::Connecting);
        assert_eq!(ConnectionState::Disconnected.summary(), ConnectionSummary::Disconnected);
        assert_eq!(ConnectionSummary::Connected.to_string(), "connected");
    }

    #[test]
    fn test_new_message_wire_names() {
        let body = NewMessage {
            sender_id: UserId::new("u1"),
            receiver_id: UserId::new("u2"),
            content: "Hello".to_string(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["senderId"], "u1");
        assert_eq!(json["receiverId"], "u2");
        assert_eq!(json["content"], "Hello");
    }
}
