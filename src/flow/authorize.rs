//! `/authorize`: validate the relying party's request, park it as a
//! transaction, and bounce the browser to the upstream provider.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use url::Url;

use crate::context::RequestContext;
use crate::errors::AppError;
use crate::policy;
use crate::tokens::ScopeSet;
use crate::AppState;

use super::store::{CodeChallengeMethod, Transaction};
use super::found;

#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    pub client_id: Option<String>,
    pub response_type: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    /// Per-request override of `RETURN_TO_REFERRER`.
    #[serde(rename = "return")]
    pub return_to_referrer: Option<String>,
}

/// Validation order is fixed: client allowlist, then redirect-URI policy,
/// then scope, then PKCE. (Host and HTTPS were checked by middleware before
/// we got here.) Nothing redirects until everything is validated, so every
/// failure here is a direct 400, never a bounce to an unverified URI.
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Query(params): Query<AuthorizeParams>,
) -> Result<Response, AppError> {
    let client_id = params
        .client_id
        .as_deref()
        .ok_or_else(|| AppError::InvalidRequest("client_id is required".into()))?;
    if !policy::client_allowed(&state.config, client_id) {
        return Err(AppError::UnauthorizedClient(format!(
            "client {} is not allowed",
            client_id
        )));
    }

    let issuer = ctx.issuer();
    let raw_redirect = params
        .redirect_uri
        .as_deref()
        .ok_or_else(|| AppError::InvalidRequest("redirect_uri is required".into()))?;
    let target = policy::resolve_redirect_uri(&state.config, &issuer, raw_redirect)?;

    match params.response_type.as_deref() {
        Some("code") => {}
        Some(other) => {
            return Err(AppError::UnsupportedResponseType(other.to_string()));
        }
        None => {
            return Err(AppError::InvalidRequest("response_type is required".into()));
        }
    }

    let scopes = ScopeSet::parse(params.scope.as_deref().unwrap_or_default());
    if !scopes.has_openid() {
        return Err(AppError::InvalidScope(
            "the openid scope is required".into(),
        ));
    }

    let code_challenge_method = match (&params.code_challenge, &params.code_challenge_method) {
        (None, None) => None,
        (None, Some(_)) => {
            return Err(AppError::InvalidRequest(
                "code_challenge_method without code_challenge".into(),
            ));
        }
        // RFC 7636 §4.3: method defaults to plain when omitted.
        (Some(_), None) => Some(CodeChallengeMethod::Plain),
        (Some(_), Some(method)) => Some(CodeChallengeMethod::parse(method).ok_or_else(|| {
            AppError::InvalidRequest(format!(
                "code_challenge_method must be S256 or plain, got {}",
                method
            ))
        })?),
    };

    let return_to_referrer = match params.return_to_referrer.as_deref() {
        None => state.config.return_to_referrer,
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        Some(other) => {
            return Err(AppError::InvalidRequest(format!(
                "return must be true or false, got {}",
                other
            )));
        }
    };

    let upstream_scope = state.upstream.upstream_scope(&scopes);
    let transaction = Transaction {
        client_id: client_id.to_string(),
        scopes,
        redirect_uri: target.registered.clone(),
        destination: target.destination,
        state: params.state.clone(),
        nonce: params.nonce.clone(),
        code_challenge: params.code_challenge.clone(),
        code_challenge_method,
        referer: ctx.referer.clone(),
        return_to_referrer,
        issuer,
        expires_at: ctx.now,
    };
    let state_ref = state.store.insert_transaction(transaction, ctx.now);

    let mut upstream_url = Url::parse(&state.upstream.authorize_endpoint())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("bad upstream authorize URL: {}", e)))?;
    {
        let mut pairs = upstream_url.query_pairs_mut();
        pairs
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", &target.registered)
            .append_pair("response_type", "code")
            .append_pair("state", &state_ref);
        // A bare openid request maps to no GitHub scopes; omit the
        // parameter rather than sending an empty one.
        if !upstream_scope.is_empty() {
            pairs.append_pair("scope", &upstream_scope);
        }
    }

    tracing::debug!(
        client_id,
        upstream = state.upstream.name(),
        "authorization request accepted, redirecting upstream"
    );
    Ok(found(upstream_url.as_str()))
}
