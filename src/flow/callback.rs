//! `/r/...`: the upstream provider's callback.
//!
//! Consumes the transaction, exchanges the upstream code for an upstream
//! token, snapshots the user's identity, seals both into an authorization
//! code, and sends the browser on to the relying party. The destination is
//! always the one captured at `/authorize`; whatever the callback URL
//! itself encodes is never trusted.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;

use crate::context::RequestContext;
use crate::errors::AppError;
use crate::AppState;

use super::store::CodeRecord;
use super::{found, redirect_with_error, redirect_with_params};

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

pub async fn callback(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Query(params): Query<CallbackParams>,
) -> Result<Response, AppError> {
    let state_ref = params
        .state
        .as_deref()
        .ok_or_else(|| AppError::InvalidRequest("missing state parameter".into()))?;
    let tx = state
        .store
        .take_transaction(state_ref, ctx.now)
        .ok_or_else(|| {
            AppError::InvalidRequest("unknown or expired authorization transaction".into())
        })?;

    // Upstream denial or failure: the user never consented, or the provider
    // broke. Either way this is a post-redirect error per OIDC Core
    // §3.1.2.6, except when the deployment asked to send deniers back to
    // wherever they came from.
    if let Some(error) = params.error.as_deref() {
        if error == "access_denied" {
            if tx.return_to_referrer {
                if let Some(referer) = tx.referer.as_deref() {
                    tracing::debug!(client_id = %tx.client_id, "denied, returning to referrer");
                    return Ok(found(referer));
                }
            }
            return redirect_with_error(
                &tx.destination,
                "access_denied",
                params.error_description.as_deref(),
                tx.state.as_deref(),
            );
        }
        tracing::warn!(error, "upstream authorization failed");
        return redirect_with_error(
            &tx.destination,
            "server_error",
            Some("upstream authorization failed"),
            tx.state.as_deref(),
        );
    }

    let code = match params.code.as_deref() {
        Some(code) => code,
        None => {
            return Err(AppError::InvalidRequest(
                "callback carried neither code nor error".into(),
            ));
        }
    };

    let upstream_token = match state
        .upstream
        .exchange_code(
            &tx.client_id,
            state.config.client_secret.as_deref(),
            code,
            &tx.redirect_uri,
        )
        .await
    {
        Ok(token) => token,
        Err(e) => {
            tracing::warn!(error = %e, "upstream code exchange failed");
            return redirect_with_error(
                &tx.destination,
                "server_error",
                Some("upstream token exchange failed"),
                tx.state.as_deref(),
            );
        }
    };

    let identity = match state
        .upstream
        .fetch_identity(&upstream_token, &tx.scopes)
        .await
    {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(error = %e, "upstream identity fetch failed");
            return redirect_with_error(
                &tx.destination,
                "server_error",
                Some("upstream identity fetch failed"),
                tx.state.as_deref(),
            );
        }
    };

    let keyset = state.keys.snapshot();
    let plaintext = serde_json::to_vec(&upstream_token)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("token serialization failed: {}", e)))?;
    let upstream_jwe = keyset
        .encrypt(&plaintext)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("token sealing failed: {}", e)))?;

    let record = CodeRecord {
        client_id: tx.client_id.clone(),
        redirect_uri: tx.redirect_uri,
        scopes: tx.scopes,
        nonce: tx.nonce,
        code_challenge: tx.code_challenge,
        code_challenge_method: tx.code_challenge_method,
        upstream_jwe,
        identity,
        expires_at: ctx.now,
    };
    let code = state.store.insert_code(record, ctx.now);

    tracing::debug!(client_id = %tx.client_id, "authorization code issued");
    let mut params: Vec<(&str, &str)> = vec![("code", code.as_str())];
    if let Some(rp_state) = tx.state.as_deref() {
        params.push(("state", rp_state));
    }
    redirect_with_params(&tx.destination, &params)
}
