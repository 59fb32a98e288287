//! Contact directory
//!
//! Derives the list of counterparties from the server's contact list plus
//! anyone seen on the live channel, and keeps the client-side unread
//! counters. Unread counts are not persisted and not synchronized between
//! devices; they only live as long as the session.

use log::{debug, info};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;

use crate::api::{ApiError, HistoryApi};
use crate::models::{Contact, ContactSummary, UserId};

/// Synchronous state of the directory
#[derive(Debug, Default)]
pub struct DirectoryState {
    // Server order first, then push-only contacts in first-seen order
    entries: Vec<Contact>,
    active: Option<UserId>,
}

impl DirectoryState {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, user: &UserId) -> Option<usize> {
        self.entries.iter().position(|c| &c.user_id == user)
    }

    /// Replace the server-known part of the directory, keeping local unread
    /// counts and push-only contacts the server does not know about yet
    pub fn merge_authoritative(&mut self, summaries: Vec<ContactSummary>) {
        let mut seen = HashSet::new();
        let mut merged = Vec::with_capacity(summaries.len());
        for summary in summaries {
            if !seen.insert(summary.user_id.clone()) {
                continue;
            }
            let unread_count = self
                .position(&summary.user_id)
                .map(|i| self.entries[i].unread_count)
                .unwrap_or(0);
            merged.push(Contact {
                user_id: summary.user_id,
                display_name: summary.display_name,
                unread_count,
            });
        }
        let push_only: Vec<Contact> = self
            .entries
            .drain(..)
            .filter(|c| !seen.contains(&c.user_id))
            .collect();
        merged.extend(push_only);
        self.entries = merged;
    }

    /// Make sure `user` is listed, without touching any counter
    pub fn ensure(&mut self, user: &UserId, name_hint: Option<&str>) -> &mut Contact {
        let index = match self.position(user) {
            Some(i) => i,
            None => {
                debug!("Adding contact {} seen outside the server list", user);
                self.entries.push(Contact {
                    user_id: user.clone(),
                    display_name: name_hint.unwrap_or(user.as_str()).to_string(),
                    unread_count: 0,
                });
                self.entries.len() - 1
            }
        };
        &mut self.entries[index]
    }

    /// A new message from `from` arrived over the live channel.
    /// Returns the contact's unread count afterwards.
    pub fn record_incoming(&mut self, from: &UserId, name_hint: Option<&str>) -> u32 {
        let is_active = self.active.as_ref() == Some(from);
        let contact = self.ensure(from, name_hint);
        if !is_active {
            contact.unread_count += 1;
        }
        contact.unread_count
    }

    /// Mark `user` as the open conversation and clear its unread count
    pub fn open(&mut self, user: &UserId) {
        self.ensure(user, None).unread_count = 0;
        self.active = Some(user.clone());
    }

    pub fn close(&mut self) {
        self.active = None;
    }

    pub fn active(&self) -> Option<&UserId> {
        self.active.as_ref()
    }

    pub fn get(&self, user: &UserId) -> Option<&Contact> {
        self.entries.iter().find(|c| &c.user_id == user)
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.entries
    }

    pub fn total_unread(&self) -> u32 {
        self.entries.iter().map(|c| c.unread_count).sum()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.active = None;
    }
}

/// Directory of counterparties for one session
pub struct ContactDirectory {
    user_id: UserId,
    api: Arc<dyn HistoryApi>,
    state: TokioMutex<DirectoryState>,
}

impl ContactDirectory {
    pub fn new(user_id: UserId, api: Arc<dyn HistoryApi>) -> Self {
        Self {
            user_id,
            api,
            state: TokioMutex::new(DirectoryState::new()),
        }
    }

    /// Pull the server's contact list and merge it with local state
    pub async fn refresh(&self) -> Result<Vec<Contact>, ApiError> {
        let summaries = self.api.fetch_contacts(&self.user_id).await?;
        let summaries: Vec<ContactSummary> = summaries
            .into_iter()
            .filter(|s| s.user_id != self.user_id)
            .collect();
        let mut state = self.state.lock().await;
        state.merge_authoritative(summaries);
        info!("Contact directory refreshed: {} contacts", state.contacts().len());
        Ok(state.contacts().to_vec())
    }

    /// Open the conversation with `contact`; the only way unread counts go down
    pub async fn open(&self, contact: &UserId) {
        self.state.lock().await.open(contact);
        debug!("Opened conversation with {}", contact);
    }

    pub async fn close(&self) {
        self.state.lock().await.close();
    }

    pub async fn active(&self) -> Option<UserId> {
        self.state.lock().await.active().cloned()
    }

    pub async fn contacts(&self) -> Vec<Contact> {
        self.state.lock().await.contacts().to_vec()
    }

    pub async fn get(&self, contact: &UserId) -> Option<Contact> {
        self.state.lock().await.get(contact).cloned()
    }

    pub async fn total_unread(&self) -> u32 {
        self.state.lock().await.total_unread()
    }

    pub(crate) async fn record_incoming(&self, from: &UserId, name_hint: Option<&str>) -> u32 {
        self.state.lock().await.record_incoming(from, name_hint)
    }

    pub(crate) async fn record_outgoing(&self, to: &UserId) {
        self.state.lock().await.ensure(to, None);
    }

    pub(crate) async fn clear(&self) {
        self.state.lock().await.clear();
    }
}
