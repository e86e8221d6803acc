//! HTTP surface of the chat service.
//!
//! REST routes are nested under `/api/` and protected by a middleware
//! stack: Rate Limit → Auth → Access Log → Handler. The live channel
//! (`/ws/chat`) authenticates with a one-time ticket instead.
//!
//! The router is composable: `chat_api_router()` returns a `Router` that can
//! be mounted on any axum server instance.

pub mod endpoints;
pub mod error;
pub mod event_stream;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;
pub mod websocket;

pub use router::chat_api_router;
pub use server::{shutdown_signal, start_chat_api_server, ChatApiServer, ServerError};
pub use types::ApiContext;
