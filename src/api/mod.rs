//! Request/response collaborators
//!
//! The history fetch, the contact list and the durable write all live on
//! the marketplace REST API. The core only depends on the traits below;
//! [`HttpApi`] is the production implementation.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{ContactSummary, Message, NewMessage, UserId};

pub mod http;
pub mod wire;

pub use http::HttpApi;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Credential missing, expired or refused
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    Decode(String),
}

/// Read side: conversation history and the contact list
#[async_trait]
pub trait HistoryApi: Send + Sync {
    /// Messages exchanged between the session user and `counterpart`
    async fn fetch_history(&self, counterpart: &UserId) -> Result<Vec<Message>, ApiError>;

    /// Users `user` has exchanged messages with
    async fn fetch_contacts(&self, user: &UserId) -> Result<Vec<ContactSummary>, ApiError>;
}

/// Write side: persists a message and returns it with its server id
#[async_trait]
pub trait MessageWriter: Send + Sync {
    async fn create_message(&self, message: &NewMessage) -> Result<Message, ApiError>;
}
