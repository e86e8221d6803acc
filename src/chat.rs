//! Chat delivery core: send, history, contacts.
//!
//! Builds on top of:
//! - `db::MessageStore` (durable append-only storage)
//! - `registry::ConnectionRegistry` (open channels per identity)
//!
//! `send` persists first and dispatches second. Dispatch is best effort: a
//! recipient without open channels picks the message up on the next history
//! fetch, and push failures never undo the insert.
//!
//! Insert and dispatch run under one send lock, so push order always matches
//! persistence order. Dispatch only does non-blocking `try_send`s, which keeps
//! the critical section short.

use std::sync::{Arc, Mutex, PoisonError};

use crate::contacts;
use crate::db::{DatabaseError, MessageStore};
use crate::models::{Contact, Cursor, HistoryPage, Message, NewMessage, PageRequest};
use crate::registry::ConnectionRegistry;

/// Largest page a history request may ask for.
pub const MAX_PAGE_LIMIT: u32 = 200;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Authentication required")]
    Unauthenticated,
    #[error("{0}")]
    InvalidArgument(String),
    #[error("Message store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<DatabaseError> for ChatError {
    fn from(err: DatabaseError) -> Self {
        tracing::error!(error = %err, "Message store call failed");
        ChatError::StoreUnavailable(err.to_string())
    }
}

// ═══════════════════════════════════════════
// Service
// ═══════════════════════════════════════════

pub struct ChatService {
    store: Arc<dyn MessageStore>,
    registry: Arc<ConnectionRegistry>,
    max_message_chars: usize,
    send_lock: Mutex<()>,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        registry: Arc<ConnectionRegistry>,
        max_message_chars: usize,
    ) -> Self {
        Self {
            store,
            registry,
            max_message_chars,
            send_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Persist a message from `sender` to `receiver`, then push it to the
    /// receiver's open channels.
    pub fn send(&self, sender: &str, receiver: &str, content: &str) -> Result<Message, ChatError> {
        let new_message = self.validate_send(sender, receiver, content)?;

        // The guard protects no data, a poisoned lock is still usable.
        let guard = self.send_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let message = self.store.insert(new_message)?;
        let delivered = self.registry.dispatch(&message);
        drop(guard);

        tracing::info!(
            message_id = %message.id,
            sender = %message.sender_id,
            receiver = %message.receiver_id,
            delivered,
            "Message stored"
        );

        Ok(message)
    }

    fn validate_send(
        &self,
        sender: &str,
        receiver: &str,
        content: &str,
    ) -> Result<NewMessage, ChatError> {
        if sender.trim().is_empty() {
            return Err(ChatError::Unauthenticated);
        }
        let receiver = receiver.trim();
        if receiver.is_empty() {
            return Err(ChatError::InvalidArgument("receiver_id is required".into()));
        }
        if receiver == sender {
            return Err(ChatError::InvalidArgument(
                "Cannot send a message to yourself".into(),
            ));
        }
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::InvalidArgument("content must not be empty".into()));
        }
        let chars = content.chars().count();
        if chars > self.max_message_chars {
            return Err(ChatError::InvalidArgument(format!(
                "content exceeds {} characters ({chars})",
                self.max_message_chars
            )));
        }

        Ok(NewMessage {
            sender_id: sender.to_string(),
            receiver_id: receiver.to_string(),
            content: content.to_string(),
        })
    }

    /// Conversation between `viewer` and `peer`, ascending.
    ///
    /// Without `limit` the whole conversation is returned. With `limit`, the
    /// newest `limit` messages older than `before`; `next_cursor` is set while
    /// older messages remain.
    pub fn history(
        &self,
        viewer: &str,
        peer: &str,
        before: Option<&str>,
        limit: Option<u32>,
    ) -> Result<HistoryPage, ChatError> {
        let peer = peer.trim();
        if peer.is_empty() {
            return Err(ChatError::InvalidArgument("peer_id is required".into()));
        }
        if let Some(limit) = limit {
            if limit == 0 || limit > MAX_PAGE_LIMIT {
                return Err(ChatError::InvalidArgument(format!(
                    "limit must be between 1 and {MAX_PAGE_LIMIT}"
                )));
            }
        }
        let before = match before {
            Some(raw) => Some(
                Cursor::decode(raw)
                    .ok_or_else(|| ChatError::InvalidArgument("Invalid cursor".into()))?,
            ),
            None => None,
        };

        let slice = self
            .store
            .conversation(viewer, peer, PageRequest { before, limit })?;

        let next_cursor = if slice.has_more {
            slice.messages.first().map(|m| m.cursor().encode())
        } else {
            None
        };

        Ok(HistoryPage {
            peer_id: peer.to_string(),
            messages: slice
                .messages
                .iter()
                .map(|m| m.to_history_item(viewer))
                .collect(),
            next_cursor,
        })
    }

    pub fn contacts(&self, viewer: &str) -> Result<Vec<Contact>, ChatError> {
        Ok(contacts::aggregate_contacts(self.store.as_ref(), viewer)?)
    }
}
