//! Upstream identity providers.
//!
//! "GitHub" and "Discord" are two implementations of one capability set:
//! exchange an authorization code, refresh a token, fetch an identity
//! snapshot. The flow engine never sees provider quirks.

pub mod discord;
pub mod github;

use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::Provider;
use crate::tokens::{ScopeSet, UserIdentity};

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Transport(String),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The upstream refused the grant itself (bad code, revoked token).
    #[error("upstream rejected the grant: {0}")]
    Rejected(String),

    #[error("unexpected upstream payload: {0}")]
    Decode(String),
}

impl From<reqwest_middleware::Error> for UpstreamError {
    fn from(e: reqwest_middleware::Error) -> Self {
        UpstreamError::Transport(e.to_string())
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        UpstreamError::Transport(e.to_string())
    }
}

/// Upstream OAuth2 token material. Serialized to JSON and JWE-sealed into
/// the access and refresh tokens this service issues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamToken {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

/// Wire shape of upstream token endpoints. GitHub answers HTTP 200 with an
/// `error` field for a bad code, so errors live in the same struct.
#[derive(Debug, Deserialize)]
pub(crate) struct WireTokenResponse {
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl WireTokenResponse {
    pub fn into_token(self) -> Result<UpstreamToken, UpstreamError> {
        if let Some(error) = self.error {
            let detail = self.error_description.unwrap_or_default();
            return Err(UpstreamError::Rejected(format!("{} {}", error, detail)));
        }
        let access_token = self
            .access_token
            .ok_or_else(|| UpstreamError::Decode("token response without access_token".into()))?;
        Ok(UpstreamToken {
            access_token,
            token_type: self.token_type,
            scope: self.scope,
            refresh_token: self.refresh_token,
            expires_in: self.expires_in,
        })
    }
}

#[async_trait]
pub trait UpstreamProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Browser-facing authorization URL, before query parameters.
    fn authorize_endpoint(&self) -> String;

    /// Translate granted OIDC scopes into the provider's scope string.
    fn upstream_scope(&self, scopes: &ScopeSet) -> String;

    async fn exchange_code(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
        code: &str,
        redirect_uri: &str,
    ) -> Result<UpstreamToken, UpstreamError>;

    async fn refresh(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
        refresh_token: &str,
    ) -> Result<UpstreamToken, UpstreamError>;

    async fn fetch_identity(
        &self,
        token: &UpstreamToken,
        scopes: &ScopeSet,
    ) -> Result<UserIdentity, UpstreamError>;
}

/// Shared HTTP client for all upstream calls: rustls, bounded timeouts,
/// and transient-failure retries with exponential backoff.
pub fn http_client() -> ClientWithMiddleware {
    let reqwest_client = reqwest::Client::builder()
        .use_rustls_tls()
        .pool_max_idle_per_host(16)
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(5))
        .build()
        .expect("failed to build HTTP client");

    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(2);

    ClientBuilder::new(reqwest_client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build()
}

pub fn provider_for(provider: Provider) -> Arc<dyn UpstreamProvider> {
    match provider {
        Provider::GitHub => Arc::new(github::GitHub::new(http_client())),
        Provider::Discord => Arc::new(discord::Discord::new(http_client())),
    }
}
