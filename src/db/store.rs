//! Message store seam.
//!
//! The chat core only talks to `MessageStore`. `SqliteMessageStore` is the
//! bundled adapter; any durable store with insert and ordered range queries
//! can stand in for it.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use super::repository::{self, ConversationSlice};
use super::{open_database, open_memory_database, DatabaseError};
use crate::models::{Message, NewMessage, PageRequest, UserProfile};

/// Source of "now" for store-assigned timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Durable, append-only message storage plus the user directory.
pub trait MessageStore: Send + Sync {
    /// Persist a message, assigning id, timestamp and sequence.
    fn insert(&self, message: NewMessage) -> Result<Message, DatabaseError>;

    fn conversation(
        &self,
        a: &str,
        b: &str,
        page: PageRequest,
    ) -> Result<ConversationSlice, DatabaseError>;

    fn latest_between(&self, a: &str, b: &str) -> Result<Option<Message>, DatabaseError>;

    fn peers_of(&self, viewer: &str) -> Result<Vec<String>, DatabaseError>;

    fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, DatabaseError>;

    fn upsert_profile(&self, profile: &UserProfile) -> Result<(), DatabaseError>;
}

struct Inner {
    conn: Connection,
    last_created_at: Option<DateTime<Utc>>,
}

/// SQLite-backed store. One connection, serialised behind a mutex.
pub struct SqliteMessageStore {
    inner: Mutex<Inner>,
    clock: Clock,
}

impl SqliteMessageStore {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self::from_connection(open_database(path)?))
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::from_connection(open_memory_database()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            inner: Mutex::new(Inner {
                conn,
                last_created_at: None,
            }),
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the timestamp source (tests use a fixed or stepping clock).
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, DatabaseError> {
        self.inner.lock().map_err(|_| DatabaseError::LockPoisoned)
    }
}

/// Millisecond precision, never earlier than the previous insert.
fn next_timestamp(now: DateTime<Utc>, last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
    match last {
        Some(last) if last > now => last,
        _ => now,
    }
}

impl MessageStore for SqliteMessageStore {
    fn insert(&self, message: NewMessage) -> Result<Message, DatabaseError> {
        let mut inner = self.lock()?;
        let created_at = next_timestamp((self.clock)(), inner.last_created_at);
        let id = uuid::Uuid::new_v4().to_string();
        let stored = repository::insert_message(&inner.conn, &id, &message, created_at)?;
        inner.last_created_at = Some(created_at);
        Ok(stored)
    }

    fn conversation(
        &self,
        a: &str,
        b: &str,
        page: PageRequest,
    ) -> Result<ConversationSlice, DatabaseError> {
        let inner = self.lock()?;
        repository::get_conversation(&inner.conn, a, b, page)
    }

    fn latest_between(&self, a: &str, b: &str) -> Result<Option<Message>, DatabaseError> {
        let inner = self.lock()?;
        repository::get_latest_between(&inner.conn, a, b)
    }

    fn peers_of(&self, viewer: &str) -> Result<Vec<String>, DatabaseError> {
        let inner = self.lock()?;
        repository::get_peers_of(&inner.conn, viewer)
    }

    fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, DatabaseError> {
        let inner = self.lock()?;
        repository::get_user(&inner.conn, user_id)
    }

    fn upsert_profile(&self, profile: &UserProfile) -> Result<(), DatabaseError> {
        let inner = self.lock()?;
        repository::upsert_user(&inner.conn, profile)
    }
}
