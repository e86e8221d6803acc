//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::chat::ChatError;

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: u64 },
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Message store unavailable")]
    StoreUnavailable(String),
    #[error("Channel upgrade failed: {detail}")]
    ChannelUpgradeFailure { status: StatusCode, detail: String },
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "AUTH_REQUIRED",
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::BadRequest(_) => "INVALID_ARGUMENT",
            ApiError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            ApiError::ChannelUpgradeFailure { .. } => "CHANNEL_UPGRADE_FAILED",
            ApiError::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Authentication required".to_string(),
            ),
            ApiError::RateLimited { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                format!("Rate limit exceeded. Retry after {retry_after}s"),
            ),
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail.clone()),
            ApiError::StoreUnavailable(detail) => {
                tracing::error!(detail, "Message store unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Message store unavailable, try again later".to_string(),
                )
            }
            ApiError::ChannelUpgradeFailure { status, detail } => {
                tracing::warn!(status = status.as_u16(), detail, "Channel upgrade rejected");
                (*status, detail.clone())
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message,
            },
        };

        let mut response = (status, Json(body)).into_response();
        // Add retry-after header for rate limited responses
        if let ApiError::RateLimited { retry_after } = &self {
            if let Ok(val) = axum::http::HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("Retry-After", val);
            }
        }
        response
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Unauthenticated => ApiError::Unauthorized,
            ChatError::InvalidArgument(detail) => ApiError::BadRequest(detail),
            ChatError::StoreUnavailable(detail) => ApiError::StoreUnavailable(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn unauthorized_returns_401() {
        let response = ApiError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "AUTH_REQUIRED");
    }

    #[tokio::test]
    async fn rate_limited_returns_429_with_retry_after() {
        let response = ApiError::RateLimited { retry_after: 60 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "60");
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "RATE_LIMITED");
    }

    #[tokio::test]
    async fn bad_request_returns_400_with_detail() {
        let response = ApiError::BadRequest("content must not be empty".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "INVALID_ARGUMENT");
        assert_eq!(json["error"]["message"], "content must not be empty");
    }

    #[tokio::test]
    async fn store_unavailable_returns_503_and_hides_detail() {
        let response = ApiError::StoreUnavailable("disk I/O error".into()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "STORE_UNAVAILABLE");
        assert!(!json["error"]["message"].as_str().unwrap().contains("disk"));
    }

    #[tokio::test]
    async fn upgrade_failure_keeps_status() {
        let response = ApiError::ChannelUpgradeFailure {
            status: StatusCode::UPGRADE_REQUIRED,
            detail: "missing upgrade header".into(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "CHANNEL_UPGRADE_FAILED");
    }

    #[tokio::test]
    async fn internal_returns_500() {
        let response = ApiError::Internal("something broke".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        // Internal errors hide details from client
        assert_eq!(json["error"]["message"], "An internal error occurred");
    }

    #[test]
    fn chat_errors_map_to_api_errors() {
        assert!(matches!(
            ApiError::from(ChatError::Unauthenticated),
            ApiError::Unauthorized
        ));
        assert!(matches!(
            ApiError::from(ChatError::InvalidArgument("x".into())),
            ApiError::BadRequest(_)
        ));
        assert!(matches!(
            ApiError::from(ChatError::StoreUnavailable("x".into())),
            ApiError::StoreUnavailable(_)
        ));
    }
}
