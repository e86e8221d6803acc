//! Chat endpoints.
//!
//! - `POST /api/chat/send` — persist a message and push it to the receiver
//! - `GET /api/chat/history/:peer_id` — conversation with one peer
//! - `GET /api/chat/contacts` — conversation partners, most recent first
//!
//! The event stream (`GET /api/chat/stream/:peer_id`) lives in
//! `api::event_stream`.
//!
//! Store calls block on the SQLite mutex, so each handler runs its chat call
//! on the blocking pool, like the live channel does.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, UserContext};
use crate::chat::{ChatError, ChatService};
use crate::models::{Contact, HistoryPage, Message};

#[derive(Deserialize)]
pub struct ChatSendRequest {
    #[serde(default)]
    pub receiver_id: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Deserialize, Default)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
    pub before: Option<String>,
}

#[derive(Serialize)]
pub struct ContactsResponse {
    pub contacts: Vec<Contact>,
}

/// `POST /api/chat/send` — returns the persisted message.
pub async fn send(
    State(ctx): State<ApiContext>,
    Extension(user): Extension<UserContext>,
    body: Result<Json<ChatSendRequest>, JsonRejection>,
) -> Result<Json<Message>, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let message = with_chat(&ctx, move |chat| {
        chat.send(&user.user_id, &req.receiver_id, &req.content)
    })
    .await?;
    Ok(Json(message))
}

/// `GET /api/chat/history/:peer_id?limit=&before=`
pub async fn history(
    State(ctx): State<ApiContext>,
    Extension(user): Extension<UserContext>,
    Path(peer_id): Path<String>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<HistoryPage>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let page = with_chat(&ctx, move |chat| {
        chat.history(&user.user_id, &peer_id, query.before.as_deref(), query.limit)
    })
    .await?;
    Ok(Json(page))
}

/// `GET /api/chat/contacts`
pub async fn contacts(
    State(ctx): State<ApiContext>,
    Extension(user): Extension<UserContext>,
) -> Result<Json<ContactsResponse>, ApiError> {
    let contacts = with_chat(&ctx, move |chat| chat.contacts(&user.user_id)).await?;
    Ok(Json(ContactsResponse { contacts }))
}

/// Run `f` against the chat service on the blocking pool.
async fn with_chat<T, F>(ctx: &ApiContext, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&ChatService) -> Result<T, ChatError> + Send + 'static,
    T: Send + 'static,
{
    let core = ctx.core.clone();
    tokio::task::spawn_blocking(move || f(core.chat()))
        .await
        .map_err(|e| ApiError::Internal(format!("chat task failed: {e}")))?
        .map_err(ApiError::from)
}
