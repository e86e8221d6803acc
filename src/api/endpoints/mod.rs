//! API endpoint handlers.
//!
//! Handlers stay thin: extract, call `ChatService`, map errors.

pub mod auth;
pub mod chat;
pub mod health;
