//! Top-level error type
//!
//! Joins the per-module errors so callers of [`ChatClient`](crate::ChatClient)
//! can use a single `Result`.

use thiserror::Error;

use crate::api::ApiError;
use crate::delivery::{SendError, ValidationError};
use crate::session::AuthError;
use crate::transport::{ConnectError, TransportError};

#[derive(Debug, Error)]
pub enum ChatError {
    /// Missing or refused credential; the caller should log in again
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Rejected before any network call
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The durable write failed; nothing was stored
    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl ChatError {
    /// Whether the session itself is no longer usable
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            ChatError::Auth(_)
                | ChatError::Connect(ConnectError::Unauthorized(_))
                | ChatError::Api(ApiError::Unauthorized(_))
                | ChatError::Send(SendError::Write(ApiError::Unauthorized(_)))
        )
    }
}
