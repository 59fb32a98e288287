//! Session context
//!
//! Identity and bearer credential of the logged-in user. Supplied by the
//! auth collaborator and passed explicitly to every component that needs it.

use std::fmt;
use thiserror::Error;

use crate::models::UserId;

/// Errors raised when a session cannot be used to open a connection
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No bearer credential was supplied
    #[error("No credential available for the current session")]
    MissingCredential,

    /// The session carries no user identifier
    #[error("Session has no user id")]
    MissingUserId,

    /// The server refused the credential
    #[error("Credential rejected by server: {0}")]
    Rejected(String),
}

#[derive(Clone)]
pub struct SessionContext {
    user_id: UserId,
    display_name: Option<String>,
    credential: String,
}

impl SessionContext {
    /// Build a session, refusing blank identities or credentials
    pub fn new(user_id: impl Into<UserId>, credential: impl Into<String>) -> Result<Self, AuthError> {
        let user_id = user_id.into();
        let credential = credential.into();
        if user_id.as_str().trim().is_empty() {
            return Err(AuthError::MissingUserId);
        }
        if credential.trim().is_empty() {
            return Err(AuthError::MissingCredential);
        }
        Ok(SessionContext {
            user_id,
            display_name: None,
            credential,
        })
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }
}

// Keep the bearer token out of logs
impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("user_id", &self.user_id)
            .field("display_name", &self.display_name)
            .field("credential", &"<redacted>")
            .finish()
    }
}
