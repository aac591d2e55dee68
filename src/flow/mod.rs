//! The OIDC flow engine: `/authorize` → `/r/...` callback → `/token` →
//! `/userinfo` / `/introspect`.

pub mod authorize;
pub mod callback;
pub mod store;
pub mod token;
pub mod userinfo;

pub use store::{CodeChallengeMethod, CodeRecord, FlowStore, Transaction};

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use url::Url;

use crate::errors::AppError;

/// 302 Found, the redirect status OAuth2 flows conventionally use.
pub(crate) fn found(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [(header::LOCATION, location.to_string())],
    )
        .into_response()
}

/// Redirect to a relying-party URL with extra query parameters appended,
/// preserving any query the destination already carries.
pub(crate) fn redirect_with_params(
    destination: &str,
    params: &[(&str, &str)],
) -> Result<Response, AppError> {
    let mut url = Url::parse(destination).map_err(|_| {
        AppError::Internal(anyhow::anyhow!(
            "stored destination is not a valid URL: {}",
            destination
        ))
    })?;
    {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in params {
            pairs.append_pair(k, v);
        }
    }
    Ok(found(url.as_str()))
}

/// OIDC Core 1.0 §3.1.2.6: post-validation failures go back to the relying
/// party as `error` / `error_description` query parameters.
pub(crate) fn redirect_with_error(
    destination: &str,
    error: &str,
    description: Option<&str>,
    state: Option<&str>,
) -> Result<Response, AppError> {
    let mut params: Vec<(&str, &str)> = vec![("error", error)];
    if let Some(desc) = description {
        params.push(("error_description", desc));
    }
    if let Some(state) = state {
        params.push(("state", state));
    }
    redirect_with_params(destination, &params)
}
