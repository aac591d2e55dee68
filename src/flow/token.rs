//! `/token`: redeem an authorization code (or refresh token) for the ID +
//! access + refresh token triple.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::context::RequestContext;
use crate::errors::AppError;
use crate::tokens::{MintParams, ScopeSet, TokenBundle};
use crate::upstream::{UpstreamError, UpstreamToken};
use crate::AppState;

use super::store::{CodeChallengeMethod, CodeRecord};

#[derive(Debug, Deserialize)]
pub struct TokenParams {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
}

/// Constant-time string comparison. Hashing first normalizes the lengths so
/// the comparison leaks neither content nor length.
fn ct_eq(a: &str, b: &str) -> bool {
    let hash_a = Sha256::digest(a.as_bytes());
    let hash_b = Sha256::digest(b.as_bytes());
    hash_a.ct_eq(&hash_b).into()
}

/// Resolve client credentials from HTTP Basic or form parameters.
///
/// Presenting a secret both ways at once is rejected outright; a client
/// that does that is misconfigured, and guessing which secret it meant
/// helps nobody.
fn client_credentials(
    headers: &HeaderMap,
    params: &TokenParams,
) -> Result<(String, Option<String>), AppError> {
    let basic = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .map(parse_basic)
        .transpose()?;

    match (basic, &params.client_secret) {
        (Some(_), Some(_)) => Err(AppError::InvalidRequest(
            "client credentials were presented both in the Authorization header and the form body"
                .into(),
        )),
        (Some((id, secret)), None) => {
            if let Some(form_id) = &params.client_id {
                if form_id != &id {
                    return Err(AppError::InvalidRequest(
                        "client_id in form does not match Authorization header".into(),
                    ));
                }
            }
            Ok((id, Some(secret)))
        }
        (None, secret) => {
            let id = params
                .client_id
                .clone()
                .ok_or_else(|| AppError::InvalidRequest("client_id is required".into()))?;
            Ok((id, secret.clone()))
        }
    }
}

fn parse_basic(encoded: &str) -> Result<(String, String), AppError> {
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AppError::InvalidRequest("malformed Basic authorization header".into()))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| AppError::InvalidRequest("malformed Basic authorization header".into()))?;
    let (id, secret) = decoded
        .split_once(':')
        .ok_or_else(|| AppError::InvalidRequest("malformed Basic authorization header".into()))?;
    // RFC 6749 §2.3.1: both halves are form-urlencoded.
    let id = urlencoding::decode(id)
        .map_err(|_| AppError::InvalidRequest("malformed Basic authorization header".into()))?;
    let secret = urlencoding::decode(secret)
        .map_err(|_| AppError::InvalidRequest("malformed Basic authorization header".into()))?;
    Ok((id.into_owned(), secret.into_owned()))
}

/// RFC 7636 §4.6 verification against the challenge recorded at `/authorize`.
fn verify_pkce(record: &CodeRecord, verifier: Option<&str>) -> Result<(), AppError> {
    let challenge = match record.code_challenge.as_deref() {
        Some(challenge) => challenge,
        // No challenge was recorded; a stray verifier is ignored.
        None => return Ok(()),
    };
    let verifier = verifier.ok_or_else(|| {
        AppError::InvalidGrant("code_verifier is required for this code".into())
    })?;

    let ok = match record.code_challenge_method {
        Some(CodeChallengeMethod::S256) => {
            let computed = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
            ct_eq(&computed, challenge)
        }
        Some(CodeChallengeMethod::Plain) | None => ct_eq(verifier, challenge),
    };
    if ok {
        Ok(())
    } else {
        Err(AppError::InvalidGrant("code_verifier does not match".into()))
    }
}

pub async fn token(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    headers: HeaderMap,
    Form(params): Form<TokenParams>,
) -> Result<Response, AppError> {
    let (client_id, client_secret) = client_credentials(&headers, &params)?;

    // With an upstream secret configured, the relying party must present it.
    if let Some(expected) = state.config.client_secret.as_deref() {
        match client_secret.as_deref() {
            Some(presented) if ct_eq(presented, expected) => {}
            _ => return Err(AppError::InvalidClient),
        }
    }

    match params.grant_type.as_deref() {
        Some("authorization_code") => code_grant(&state, &ctx, &client_id, &params).await,
        Some("refresh_token") => refresh_grant(&state, &ctx, &client_id, &params).await,
        Some(other) => Err(AppError::UnsupportedGrantType(other.to_string())),
        None => Err(AppError::InvalidRequest("grant_type is required".into())),
    }
}

async fn code_grant(
    state: &Arc<AppState>,
    ctx: &RequestContext,
    client_id: &str,
    params: &TokenParams,
) -> Result<Response, AppError> {
    let code = params
        .code
        .as_deref()
        .ok_or_else(|| AppError::InvalidRequest("code is required".into()))?;

    let record = state.store.take_code(code, ctx.now).ok_or_else(|| {
        AppError::InvalidGrant("authorization code is invalid, expired, or already used".into())
    })?;

    if record.client_id != client_id {
        return Err(AppError::InvalidGrant(
            "authorization code was issued to a different client".into(),
        ));
    }
    match params.redirect_uri.as_deref() {
        Some(uri) if uri == record.redirect_uri => {}
        _ => {
            return Err(AppError::InvalidGrant(
                "redirect_uri does not match the authorization request".into(),
            ));
        }
    }
    verify_pkce(&record, params.code_verifier.as_deref())?;

    let keyset = state.keys.snapshot();
    let bundle = state
        .tokens
        .mint(
            &keyset,
            MintParams {
                identity: &record.identity,
                client_id,
                scopes: &record.scopes,
                nonce: record.nonce.as_deref(),
                issuer: &ctx.issuer(),
                userinfo_url: &ctx.userinfo_url(),
                upstream_jwe: &record.upstream_jwe,
                now: ctx.now,
            },
        )
        .map_err(|e| AppError::Internal(anyhow::anyhow!("token minting failed: {}", e)))?;

    tracing::info!(client_id, sub = %record.identity.id, "tokens issued");
    Ok(token_response(bundle, &record.scopes))
}

async fn refresh_grant(
    state: &Arc<AppState>,
    ctx: &RequestContext,
    client_id: &str,
    params: &TokenParams,
) -> Result<Response, AppError> {
    let refresh_token = params
        .refresh_token
        .as_deref()
        .ok_or_else(|| AppError::InvalidRequest("refresh_token is required".into()))?;

    let keyset = state.keys.snapshot();
    let claims = state
        .tokens
        .verify_refresh(&keyset, refresh_token, &ctx.issuer(), client_id)
        .map_err(AppError::InvalidGrant)?;

    // Single use: each refresh rotates the token, and a replayed jti dies
    // here no matter how redemptions race.
    if !state.store.consume_jti(&claims.jti, claims.exp) {
        return Err(AppError::InvalidGrant(
            "refresh token has already been used".into(),
        ));
    }

    let sealed = keyset
        .decrypt(&claims.token)
        .map_err(|_| AppError::InvalidGrant("refresh token is stale".into()))?;
    let old_token: UpstreamToken = serde_json::from_slice(&sealed)
        .map_err(|_| AppError::InvalidGrant("refresh token is stale".into()))?;

    // Providers that hand out upstream refresh tokens get a real refresh;
    // GitHub's non-expiring access tokens are simply reused.
    let upstream_token = match old_token.refresh_token.as_deref() {
        Some(upstream_refresh) => state
            .upstream
            .refresh(
                client_id,
                state.config.client_secret.as_deref(),
                upstream_refresh,
            )
            .await
            .map_err(map_upstream_grant_error)?,
        None => old_token,
    };

    let scopes = ScopeSet::parse(&claims.scope);
    let identity = state
        .upstream
        .fetch_identity(&upstream_token, &scopes)
        .await
        .map_err(map_upstream_grant_error)?;

    let plaintext = serde_json::to_vec(&upstream_token)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("token serialization failed: {}", e)))?;
    let upstream_jwe = keyset
        .encrypt(&plaintext)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("token sealing failed: {}", e)))?;

    let bundle = state
        .tokens
        .mint(
            &keyset,
            MintParams {
                identity: &identity,
                client_id,
                scopes: &scopes,
                nonce: claims.nonce.as_deref(),
                issuer: &ctx.issuer(),
                userinfo_url: &ctx.userinfo_url(),
                upstream_jwe: &upstream_jwe,
                now: ctx.now,
            },
        )
        .map_err(|e| AppError::Internal(anyhow::anyhow!("token minting failed: {}", e)))?;

    tracing::info!(client_id, sub = %identity.id, "tokens refreshed");
    Ok(token_response(bundle, &scopes))
}

/// An upstream that rejects the grant means the user's upstream session is
/// gone, and that is the relying party's problem (`invalid_grant`). Transport
/// and server failures are ours.
fn map_upstream_grant_error(e: UpstreamError) -> AppError {
    match e {
        UpstreamError::Rejected(m) => AppError::InvalidGrant(m),
        UpstreamError::Status { status, .. } if status == 401 || status == 403 => {
            AppError::InvalidGrant("upstream rejected the stored token".into())
        }
        other => AppError::Upstream(other.to_string()),
    }
}

fn token_response(bundle: TokenBundle, scopes: &ScopeSet) -> Response {
    let mut body = json!({
        "access_token": bundle.access_token,
        "token_type": "Bearer",
        "refresh_token": bundle.refresh_token,
        "id_token": bundle.id_token,
        "scope": scopes.to_string(),
    });
    if let Some(expires_in) = bundle.expires_in {
        body["expires_in"] = json!(expires_in);
    }
    Json(body).into_response()
}
