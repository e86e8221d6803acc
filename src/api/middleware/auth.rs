//! Bearer token authentication middleware.
//!
//! Extracts `Authorization: Bearer <token>`, resolves it through the
//! identity oracle, and injects `UserContext` into request extensions for
//! downstream handlers. Nothing below this layer runs for an unknown caller.
//!
//! Routes a browser opens without custom headers (the event stream) may
//! present a one-time `?ticket=` from `POST /api/chat/ws-ticket` instead.

use axum::extract::Query;
use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, UserContext};

#[derive(serde::Deserialize)]
struct TicketQuery {
    ticket: String,
}

/// Pull the token out of an `Authorization: Bearer <token>` header.
pub fn bearer_token(req: &Request<axum::body::Body>) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Require a bearer token the identity oracle recognises.
///
/// Accesses `ApiContext` from request extensions (injected by Extension layer).
pub async fn require_auth(req: Request<axum::body::Body>, next: Next) -> Response {
    match require_auth_inner(req, next, false).await {
        Ok(resp) => resp,
        Err(err) => err.into_response(),
    }
}

/// Like `require_auth`, but a request without a bearer header may carry a
/// one-time ticket in the query string.
pub async fn require_auth_or_ticket(req: Request<axum::body::Body>, next: Next) -> Response {
    match require_auth_inner(req, next, true).await {
        Ok(resp) => resp,
        Err(err) => err.into_response(),
    }
}

async fn require_auth_inner(
    mut req: Request<axum::body::Body>,
    next: Next,
    allow_ticket: bool,
) -> Result<Response, ApiError> {
    let ctx: ApiContext = req
        .extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or(ApiError::Internal("missing API context".into()))?;

    let user_id = match bearer_token(&req) {
        Some(token) => ctx.core.authenticate(token).ok_or_else(|| {
            tracing::debug!(path = req.uri().path(), "Bearer token rejected");
            ApiError::Unauthorized
        })?,
        None if allow_ticket => consume_ticket(&ctx, &req)?,
        None => return Err(ApiError::Unauthorized),
    };

    req.extensions_mut().insert(UserContext { user_id });

    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert("Cache-Control", HeaderValue::from_static("no-store"));

    Ok(response)
}

fn consume_ticket(ctx: &ApiContext, req: &Request<axum::body::Body>) -> Result<String, ApiError> {
    let Query(query) =
        Query::<TicketQuery>::try_from_uri(req.uri()).map_err(|_| ApiError::Unauthorized)?;
    let mut tickets = ctx
        .ws_tickets
        .lock()
        .map_err(|_| ApiError::Internal("ticket lock".into()))?;
    tickets.consume(&query.ticket).ok_or_else(|| {
        tracing::debug!(path = req.uri().path(), "Ticket rejected");
        ApiError::Unauthorized
    })
}
