//! Repository layer: free functions over a borrowed `Connection`.
//!
//! `SqliteMessageStore` wraps these behind the `MessageStore` trait.

mod message;
mod user;

pub use message::*;
pub use user::*;
