//! Application state shared by every route and channel.
//!
//! `CoreState` is constructed once at process start (`init`) and wrapped in
//! `Arc`. It owns the message store, the identity oracle, the connection
//! registry and the chat service built on top of them.

use std::sync::Arc;
use std::time::Instant;

use crate::chat::ChatService;
use crate::config::ServerConfig;
use crate::db::{DatabaseError, MessageStore, SqliteMessageStore};
use crate::identity::{self, IdentityError, IdentityOracle, TokenIdentityOracle};
use crate::registry::ConnectionRegistry;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),
}

pub struct CoreState {
    config: ServerConfig,
    identity: Arc<dyn IdentityOracle>,
    registry: Arc<ConnectionRegistry>,
    chat: ChatService,
    started_at: Instant,
}

impl CoreState {
    /// Assemble state from already-built adapters.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn MessageStore>,
        identity: Arc<dyn IdentityOracle>,
    ) -> Self {
        let registry = ConnectionRegistry::new();
        let chat = ChatService::new(store, registry.clone(), config.max_message_chars);
        Self {
            config,
            identity,
            registry,
            chat,
            started_at: Instant::now(),
        }
    }

    /// Open the SQLite store at `config.db_path` and seed identities from
    /// `config.identity_file` when one is configured.
    pub fn init(config: ServerConfig) -> Result<Self, CoreError> {
        let store = SqliteMessageStore::open(&config.db_path)?;
        tracing::info!(path = %config.db_path.display(), "Message store opened");

        let oracle = match &config.identity_file {
            Some(path) => {
                let records = identity::load_identity_file(path)?;
                for record in &records {
                    store.upsert_profile(&record.profile())?;
                }
                tracing::info!(
                    path = %path.display(),
                    identities = records.len(),
                    "Identity file loaded"
                );
                TokenIdentityOracle::from_records(&records)
            }
            None => {
                tracing::warn!("No identity file configured, every request will be rejected");
                TokenIdentityOracle::new()
            }
        };

        Ok(Self::new(config, Arc::new(store), Arc::new(oracle)))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn chat(&self) -> &ChatService {
        &self.chat
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Resolve a bearer credential to a user id.
    pub fn authenticate(&self, credential: &str) -> Option<String> {
        self.identity.resolve(credential)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Drop all open channel registrations. Stored messages are untouched.
    pub fn reset(&self) {
        self.registry.reset();
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// In-memory state with two known users: `doc` (token `doc-token`) and
    /// `pat` (token `pat-token`).
    pub fn core_with_users(config: ServerConfig) -> Arc<CoreState> {
        let store = SqliteMessageStore::open_in_memory().unwrap();
        let oracle = TokenIdentityOracle::new();
        oracle.register("doc-token", "doc");
        oracle.register("pat-token", "pat");
        Arc::new(CoreState::new(config, Arc::new(store), Arc::new(oracle)))
    }
}
