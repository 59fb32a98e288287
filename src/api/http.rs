// REST client for the marketplace messaging API

use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;

use super::wire::{decode_contact, decode_message};
use super::{ApiError, HistoryApi, MessageWriter};
use crate::config::ClientConfig;
use crate::models::{ContactSummary, Message, NewMessage, UserId};
use crate::session::SessionContext;

pub struct HttpApi {
    client: Client,
    base_url: String,
    credential: String,
}

impl HttpApi {
    pub fn new(config: &ClientConfig, session: &SessionContext) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            credential: session.credential().to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send_json(&self, request: RequestBuilder) -> Result<Value, ApiError> {
        let response = request
            .bearer_auth(&self.credential)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Unauthorized(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Split a JSON array into decoded items, dropping the ones that fail.
/// Anything other than an array is treated as an empty list.
fn decode_list<T>(value: Value, what: &str, decode: impl Fn(Value) -> Result<T, ApiError>) -> Vec<T> {
    let items = match value {
        Value::Array(items) => items,
        other => {
            warn!("Expected a list of {}, got: {}", what, other);
            return Vec::new();
        }
    };
    items
        .into_iter()
        .filter_map(|item| match decode(item) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!("Skipping malformed {}: {}", what, e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl HistoryApi for HttpApi {
    async fn fetch_history(&self, counterpart: &UserId) -> Result<Vec<Message>, ApiError> {
        debug!("Fetching history with {}", counterpart);
        let body = self
            .send_json(self.client.get(self.url(&format!("/api/messages/{}", counterpart))))
            .await?;
        let messages: Vec<Message> = decode_list(body, "messages", decode_message)
            .into_iter()
            .map(|decoded| decoded.message)
            .collect();
        info!("Fetched {} messages with {}", messages.len(), counterpart);
        Ok(messages)
    }

    async fn fetch_contacts(&self, user: &UserId) -> Result<Vec<ContactSummary>, ApiError> {
        debug!("Fetching contacts for {}", user);
        let body = self
            .send_json(self.client.get(self.url(&format!("/api/messages/chat-users/{}", user))))
            .await?;
        let contacts = decode_list(body, "contacts", decode_contact);
        info!("Fetched {} contacts", contacts.len());
        Ok(contacts)
    }
}

#[async_trait]
impl MessageWriter for HttpApi {
    async fn create_message(&self, message: &NewMessage) -> Result<Message, ApiError> {
        debug!("Persisting message to {}", message.receiver_id);
        let body = self
            .send_json(self.client.post(self.url("/api/messages")).json(message))
            .await
            .map_err(|e| {
                error!("Durable write to {} failed: {}", message.receiver_id, e);
                e
            })?;
        Ok(decode_message(body)?.message)
    }
}
