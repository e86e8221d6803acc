//! Per-caller rate limiting middleware.
//!
//! Applies sliding-window rate limits per caller:
//! - 100 requests per minute
//! - 1000 requests per hour
//!
//! The caller is the authenticated user when auth already ran, otherwise the
//! bearer token. Ticket-authenticated requests are keyed on the ticket's user.

use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, UserContext};
use crate::identity::hash_token;

/// Extract a rate-limit key from the request.
fn rate_key(req: &Request<axum::body::Body>) -> String {
    if let Some(user) = req.extensions().get::<UserContext>() {
        return user_key(&user.user_id);
    }
    match super::auth::bearer_token(req) {
        Some(token) => {
            let hash = hash_token(token);
            let prefix: String = hash[..8].iter().map(|b| format!("{b:02x}")).collect();
            format!("token:{prefix}")
        }
        None => "anonymous".to_string(),
    }
}

pub fn user_key(user_id: &str) -> String {
    format!("user:{user_id}")
}

/// Count one request against `key`.
pub fn check_rate(ctx: &ApiContext, key: &str) -> Result<(), ApiError> {
    let mut limiter = ctx
        .rate_limiter
        .lock()
        .map_err(|_| ApiError::Internal("rate limiter lock".into()))?;

    limiter.check(key).map_err(|retry_after| {
        tracing::warn!(key, retry_after, "Rate limit exceeded");
        ApiError::RateLimited { retry_after }
    })
}

/// Per-caller rate limiting. Returns 429 if exceeded.
/// Accesses `ApiContext` from request extensions.
pub async fn limit(req: Request<axum::body::Body>, next: Next) -> Response {
    match limit_inner(req, next).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn limit_inner(req: Request<axum::body::Body>, next: Next) -> Result<Response, ApiError> {
    let ctx: ApiContext = req
        .extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or(ApiError::Internal("missing API context".into()))?;

    check_rate(&ctx, &rate_key(&req))?;

    Ok(next.run(req).await)
}
