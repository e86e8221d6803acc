//! Chat API router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//! REST routes are nested under `/api/`, the live channel sits at `/ws/chat`.
//!
//! Middleware stack (outermost → innermost):
//! 1. Rate limiter → 2. Auth validator → 3. Access log
//!
//! The event stream authenticates first (bearer or one-time ticket) and is
//! rate limited per user. The live channel consumes its ticket in the
//! upgrade handler and is rate limited there, per user.

use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::api::endpoints;
use crate::api::event_stream;
use crate::api::middleware;
use crate::api::types::ApiContext;
use crate::api::websocket;
use crate::core_state::CoreState;

/// Build the chat API router.
///
/// Middleware uses `Extension<ApiContext>` (injected as the outermost layer).
/// Endpoint handlers use `State<ApiContext>` (provided via `with_state`).
pub fn chat_api_router(core: Arc<CoreState>) -> Router {
    build_router(ApiContext::new(core))
}

fn build_router(ctx: ApiContext) -> Router {
    // Protected routes — require auth + full middleware stack
    //
    // Layers are applied from bottom (innermost) to top (outermost):
    //   Extension (outermost) → Rate limit → Auth → Access log (innermost) → Handler
    //
    // NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
    let protected = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/chat/send", post(endpoints::chat::send))
        .route("/chat/history/:peer_id", get(endpoints::chat::history))
        .route("/chat/contacts", get(endpoints::chat::contacts))
        .route("/chat/ws-ticket", post(endpoints::auth::ws_ticket))
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::audit::log_access))
        .layer(axum::middleware::from_fn(middleware::auth::require_auth))
        .layer(axum::middleware::from_fn(middleware::rate::limit))
        // Extension must be outermost so middleware can extract ApiContext
        .layer(axum::Extension(ctx.clone()));

    // Event stream: Extension → Auth (bearer or ticket) → Rate limit → Access log
    let streams = Router::new()
        .route("/chat/stream/:peer_id", get(event_stream::stream))
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::audit::log_access))
        .layer(axum::middleware::from_fn(middleware::rate::limit))
        .layer(axum::middleware::from_fn(middleware::auth::require_auth_or_ticket))
        .layer(axum::Extension(ctx.clone()));

    // WebSocket upgrade route (ticket-based auth and rate limit in the handler)
    let ws_routes = Router::new()
        .route("/ws/chat", get(websocket::ws_upgrade))
        .with_state(ctx);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .nest("/api", protected.merge(streams))
        .merge(ws_routes)
        .layer(cors)
}


#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::test_support::{test_context, test_router};
    use super::*;
    use crate::api::types::RateLimiter;
    use crate::config::ServerConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn app() -> (ApiContext, Router) {
        let ctx = test_context(ServerConfig::default());
        (ctx.clone(), test_router(ctx))
    }

    fn get_req(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, token: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_requires_auth() {
        let (_, app) = app();
        let response = app.oneshot(get_req("/api/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = json_body(response).await;
        assert_eq!(json["error"]["code"], "AUTH_REQUIRED");
    }

    #[tokio::test]
    async fn health_succeeds_with_valid_token() {
        let (_, app) = app();
        let response = app
            .oneshot(get_req("/api/health", Some("doc-token")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("Cache-Control").unwrap(), "no-store");
        let json = json_body(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["open_channels"], 0);
    }

    #[tokio::test]
    async fn invalid_token_returns_401() {
        let (_, app) = app();
        let response = app
            .oneshot(get_req("/api/chat/contacts", Some("not-a-token")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn not_found_for_unknown_route() {
        let (_, app) = app();
        let response = app
            .oneshot(get_req("/api/nonexistent", Some("doc-token")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn send_then_history_round_trip() {
        let (ctx, app) = app();
        let response = app
            .clone()
            .oneshot(post_json(
                "/api/chat/send",
                "doc-token",
                serde_json::json!({"receiver_id": "pat", "content": "Your results are in"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let sent = json_body(response).await;
        assert_eq!(sent["sender_id"], "doc");
        assert_eq!(sent["receiver_id"], "pat");
        assert!(sent["created_at"].is_string());

        let response = app
            .oneshot(get_req("/api/chat/history/doc", Some("pat-token")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page = json_body(response).await;
        assert_eq!(page["peer_id"], "doc");
        assert_eq!(page["messages"][0]["id"], sent["id"]);
        assert_eq!(page["messages"][0]["direction"], "peer");
        assert!(page["next_cursor"].is_null());

        assert_eq!(ctx.core.chat().contacts("pat").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn send_validation_returns_400() {
        let (ctx, app) = app();
        let cases = [
            serde_json::json!({"receiver_id": "pat", "content": "   "}),
            serde_json::json!({"receiver_id": "", "content": "hi"}),
            serde_json::json!({"content": "no receiver"}),
            serde_json::json!({"receiver_id": "doc", "content": "to myself"}),
            serde_json::json!({"receiver_id": "pat", "content": "x".repeat(2001)}),
        ];
        for body in cases {
            let response = app
                .clone()
                .oneshot(post_json("/api/chat/send", "doc-token", body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let json = json_body(response).await;
            assert_eq!(json["error"]["code"], "INVALID_ARGUMENT");
        }
        assert!(ctx.core.chat().contacts("doc").unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_json_returns_400() {
        let (_, app) = app();
        let request = Request::builder()
            .method("POST")
            .uri("/api/chat/send")
            .header("Authorization", "Bearer doc-token")
            .header("Content-Type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unauthenticated_send_persists_nothing() {
        let (ctx, app) = app();
        let response = app
            .oneshot(post_json(
                "/api/chat/send",
                "stolen-token",
                serde_json::json!({"receiver_id": "pat", "content": "hi"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(ctx.core.chat().contacts("pat").unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_paging_over_http() {
        let (ctx, app) = app();
        for i in 0..5 {
            ctx.core.chat().send("doc", "pat", &format!("m{i}")).unwrap();
        }

        let response = app
            .clone()
            .oneshot(get_req("/api/chat/history/doc?limit=2", Some("pat-token")))
            .await
            .unwrap();
        let page = json_body(response).await;
        assert_eq!(page["messages"][0]["content"], "m3");
        assert_eq!(page["messages"][1]["content"], "m4");
        let cursor = page["next_cursor"].as_str().unwrap().to_string();

        let response = app
            .oneshot(get_req(
                &format!("/api/chat/history/doc?limit=2&before={cursor}"),
                Some("pat-token"),
            ))
            .await
            .unwrap();
        let page = json_body(response).await;
        assert_eq!(page["messages"][0]["content"], "m1");
        assert_eq!(page["messages"][1]["content"], "m2");
    }

    #[tokio::test]
    async fn history_rejects_bad_query() {
        let (_, app) = app();
        for uri in [
            "/api/chat/history/doc?limit=abc",
            "/api/chat/history/doc?limit=0",
            "/api/chat/history/doc?limit=5&before=garbage!",
        ] {
            let response = app
                .clone()
                .oneshot(get_req(uri, Some("pat-token")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        }
    }

    #[tokio::test]
    async fn contacts_lists_peers_most_recent_first() {
        let (ctx, app) = app();
        ctx.core.chat().send("pat", "pharm", "older").unwrap();
        ctx.core.chat().send("doc", "pat", "newer").unwrap();

        let response = app
            .oneshot(get_req("/api/chat/contacts", Some("pat-token")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        let contacts = json["contacts"].as_array().unwrap();
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0]["peer_id"], "doc");
        assert_eq!(contacts[0]["last_message"]["direction"], "peer");
        assert_eq!(contacts[1]["peer_id"], "pharm");
        assert_eq!(contacts[1]["last_message"]["direction"], "self");
        assert_eq!(contacts[1]["display_name"], "pharm");
        assert!(contacts[1]["role"].is_null());
    }

    #[tokio::test]
    async fn ws_ticket_requires_auth() {
        let (_, app) = app();
        let request = Request::builder()
            .method("POST")
            .uri("/api/chat/ws-ticket")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn ws_ticket_returns_ticket_with_auth() {
        let (ctx, app) = app();
        let request = Request::builder()
            .method("POST")
            .uri("/api/chat/ws-ticket")
            .header("Authorization", "Bearer pat-token")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["expires_in"], 30);

        let ticket = json["ticket"].as_str().unwrap();
        assert_eq!(
            ctx.ws_tickets.lock().unwrap().consume(ticket).as_deref(),
            Some("pat")
        );
    }

    #[tokio::test]
    async fn rate_limit_returns_429() {
        let mut ctx = test_context(ServerConfig::default());
        ctx.rate_limiter = Arc::new(Mutex::new(RateLimiter::with_limits(1, 1000)));
        let app = test_router(ctx);

        let first = app
            .clone()
            .oneshot(get_req("/api/health", Some("doc-token")))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(get_req("/api/health", Some("doc-token")))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(second.headers().get("Retry-After").unwrap(), "60");
    }
}
