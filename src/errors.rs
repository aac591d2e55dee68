use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Request-time error taxonomy.
///
/// Every variant maps onto an OAuth2 error object (`error` +
/// `error_description`). Configuration faults never reach this type; they
/// abort startup through `anyhow` instead.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("client not allowed: {0}")]
    UnauthorizedClient(String),

    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error("invalid grant: {0}")]
    InvalidGrant(String),

    #[error("client authentication failed")]
    InvalidClient,

    #[error("unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    #[error("unsupported response type: {0}")]
    UnsupportedResponseType(String),

    #[error("host not allowed: {0}")]
    HostNotAllowed(String),

    #[error("request must use HTTPS")]
    InsecureTransport,

    /// Bearer verification failure at `/userinfo`. Carries the
    /// `WWW-Authenticate` challenge per RFC 6750.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// An ID token was presented where an access token was required.
    #[error("ID token is not a valid bearer credential")]
    IdTokenRejected,

    #[error("not found")]
    NotFound,

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, msg) = match &self {
            AppError::InvalidRequest(m) => (StatusCode::BAD_REQUEST, "invalid_request", m.clone()),
            AppError::UnauthorizedClient(m) => {
                (StatusCode::BAD_REQUEST, "unauthorized_client", m.clone())
            }
            AppError::InvalidScope(m) => (StatusCode::BAD_REQUEST, "invalid_scope", m.clone()),
            AppError::InvalidGrant(m) => (StatusCode::BAD_REQUEST, "invalid_grant", m.clone()),
            AppError::InvalidClient => (
                StatusCode::BAD_REQUEST,
                "invalid_client",
                "client authentication failed".to_string(),
            ),
            AppError::UnsupportedGrantType(m) => {
                (StatusCode::BAD_REQUEST, "unsupported_grant_type", m.clone())
            }
            AppError::UnsupportedResponseType(m) => (
                StatusCode::BAD_REQUEST,
                "unsupported_response_type",
                format!("only response_type=code is supported, got {}", m),
            ),
            AppError::HostNotAllowed(host) => (
                StatusCode::BAD_REQUEST,
                "invalid_request",
                format!("host not allowed: {}", host),
            ),
            AppError::InsecureTransport => (
                StatusCode::BAD_REQUEST,
                "invalid_request",
                "request must use HTTPS".to_string(),
            ),
            AppError::InvalidToken(m) => (StatusCode::UNAUTHORIZED, "invalid_token", m.clone()),
            AppError::IdTokenRejected => (
                StatusCode::BAD_REQUEST,
                "invalid_request",
                "an ID token cannot be used as a bearer credential".to_string(),
            ),
            AppError::NotFound => (
                StatusCode::NOT_FOUND,
                "not_found",
                "resource not found".to_string(),
            ),
            AppError::Upstream(e) => {
                tracing::warn!("upstream failure: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "server_error",
                    "upstream identity provider request failed".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": code,
            "error_description": msg,
        }));

        let mut response = (status, body).into_response();

        // RFC 6750 §3: bearer failures carry a WWW-Authenticate challenge.
        if matches!(self, AppError::InvalidToken(_)) {
            response.headers_mut().insert(
                "www-authenticate",
                axum::http::HeaderValue::from_static("Bearer error=\"invalid_token\""),
            );
        }

        response
    }
}
