//! `/userinfo` and `/introspect`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde::Deserialize;
use serde_json::json;

use crate::context::RequestContext;
use crate::errors::AppError;
use crate::tokens::{project, BearerError, ScopeSet};
use crate::upstream::{UpstreamError, UpstreamToken};
use crate::AppState;

fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::InvalidToken("missing bearer token".into()))
}

/// Serves both GET and POST. The bearer must be a Takagi access token whose
/// `aud` is this very URL; its sealed upstream token is used for one fresh
/// identity fetch, projected against the scopes granted at consent.
pub async fn userinfo(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let bearer = bearer_token(&headers)?;

    let keyset = state.keys.snapshot();
    let claims = state
        .tokens
        .verify_userinfo_bearer(&keyset, bearer, &ctx.issuer(), &ctx.userinfo_url())
        .map_err(|e| match e {
            BearerError::IdToken => AppError::IdTokenRejected,
            BearerError::Invalid(m) => AppError::InvalidToken(m),
        })?;

    let sealed = keyset
        .decrypt(&claims.token)
        .map_err(|_| AppError::InvalidToken("embedded upstream token is stale".into()))?;
    let upstream_token: UpstreamToken = serde_json::from_slice(&sealed)
        .map_err(|_| AppError::InvalidToken("embedded upstream token is stale".into()))?;

    let scopes = ScopeSet::parse(&claims.scope);
    let identity = state
        .upstream
        .fetch_identity(&upstream_token, &scopes)
        .await
        .map_err(|e| match e {
            UpstreamError::Status { status, .. } if status == 401 || status == 403 => {
                AppError::InvalidToken("upstream rejected the token".into())
            }
            other => AppError::Upstream(other.to_string()),
        })?;

    // The userinfo response is sub plus the scope-gated claims; no
    // iss/aud/exp envelope here.
    let mut body = serde_json::to_value(project(&identity, &scopes))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("projection failed: {}", e)))?;
    body["sub"] = json!(claims.sub);

    Ok(Json(body).into_response())
}

#[derive(Debug, Deserialize)]
pub struct IntrospectParams {
    pub token: Option<String>,
    #[allow(dead_code)]
    pub token_type_hint: Option<String>,
}

/// RFC 7662 introspection. Anything unverifiable (bad signature, expired,
/// rotated away, an ID token) is simply `active: false`.
pub async fn introspect(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Form(params): Form<IntrospectParams>,
) -> Result<Response, AppError> {
    let token = params
        .token
        .as_deref()
        .ok_or_else(|| AppError::InvalidRequest("token is required".into()))?;

    let keyset = state.keys.snapshot();
    let response = match state.tokens.introspect(&keyset, token, &ctx.issuer()) {
        None => json!({ "active": false }),
        Some(claims) => {
            // `sub` is the upstream user ID; refresh tokens carry the client
            // in `aud` instead of a client_id claim.
            let client_id = claims
                .get("client_id")
                .or_else(|| claims.get("aud"))
                .cloned()
                .unwrap_or_default();
            json!({
                "active": true,
                "sub": claims.get("sub"),
                "client_id": client_id,
                "scope": claims.get("scope"),
                "iss": claims.get("iss"),
                "aud": claims.get("aud"),
                "iat": claims.get("iat"),
                "exp": claims.get("exp"),
                "token_type": "Bearer",
            })
        }
    };

    Ok(Json(response).into_response())
}
