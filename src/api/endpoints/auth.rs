//! WebSocket ticket endpoint.
//!
//! `POST /api/chat/ws-ticket` — Protected: client requests a one-time
//! ticket, then opens `/ws/chat?ticket=...` within its lifetime.

use axum::extract::State;
use axum::{Extension, Json};
use serde::Serialize;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, UserContext, WS_TICKET_TTL_SECS};

#[derive(Serialize)]
pub struct WsTicketResponse {
    pub ticket: String,
    pub expires_in: u64,
}

pub async fn ws_ticket(
    State(ctx): State<ApiContext>,
    Extension(user): Extension<UserContext>,
) -> Result<Json<WsTicketResponse>, ApiError> {
    let ticket = {
        let mut tickets = ctx
            .ws_tickets
            .lock()
            .map_err(|_| ApiError::Internal("ticket lock".into()))?;
        tickets.issue(user.user_id)
    };

    Ok(Json(WsTicketResponse {
        ticket,
        expires_in: WS_TICKET_TTL_SECS,
    }))
}
