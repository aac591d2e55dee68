//! GitHub as the upstream identity provider.
//!
//! Quirks handled here: the token endpoint answers HTTP 200 with an `error`
//! field, access tokens do not expire by default, a `User-Agent` header is
//! mandatory on api.github.com, and the verified-email status only comes
//! from `/user/emails`.

use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;

use crate::tokens::{Scope, ScopeSet, UserIdentity};

use super::{UpstreamError, UpstreamProvider, UpstreamToken, WireTokenResponse};

const USER_AGENT: &str = concat!("takagi/", env!("CARGO_PKG_VERSION"));

pub struct GitHub {
    client: ClientWithMiddleware,
    oauth_base: String,
    api_base: String,
}

impl GitHub {
    pub fn new(client: ClientWithMiddleware) -> Self {
        Self::with_base_urls(client, "https://github.com", "https://api.github.com")
    }

    /// Override endpoints, for tests against a local mock server.
    pub fn with_base_urls(
        client: ClientWithMiddleware,
        oauth_base: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            client,
            oauth_base: oauth_base.into(),
            api_base: api_base.into(),
        }
    }

    async fn token_request(
        &self,
        form: &[(&str, &str)],
    ) -> Result<UpstreamToken, UpstreamError> {
        let resp = self
            .client
            .post(format!("{}/login/oauth/access_token", self.oauth_base))
            .header("accept", "application/json")
            .header("user-agent", USER_AGENT)
            .form(form)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let wire: WireTokenResponse = resp
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;
        wire.into_token()
    }

    async fn api_get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        access_token: &str,
    ) -> Result<T, UpstreamError> {
        let resp = self
            .client
            .get(format!("{}{}", self.api_base, path))
            .header("accept", "application/vnd.github+json")
            .header("user-agent", USER_AGENT)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        resp.json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: u64,
    login: String,
    name: Option<String>,
    avatar_url: Option<String>,
    html_url: Option<String>,
    email: Option<String>,
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

#[derive(Debug, Deserialize)]
struct GitHubOrg {
    login: String,
}

#[async_trait]
impl UpstreamProvider for GitHub {
    fn name(&self) -> &'static str {
        "github"
    }

    fn authorize_endpoint(&self) -> String {
        format!("{}/login/oauth/authorize", self.oauth_base)
    }

    fn upstream_scope(&self, scopes: &ScopeSet) -> String {
        // Each claim scope maps to its own GitHub permission. A bare openid
        // request asks for no scopes at all: an unscoped token still reads
        // the public profile, which is all `sub` needs.
        let mut upstream = Vec::new();
        if scopes.contains(Scope::Profile) {
            upstream.push("read:user");
        }
        if scopes.contains(Scope::Email) {
            upstream.push("user:email");
        }
        if scopes.contains(Scope::Groups) {
            upstream.push("read:org");
        }
        upstream.join(" ")
    }

    async fn exchange_code(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
        code: &str,
        redirect_uri: &str,
    ) -> Result<UpstreamToken, UpstreamError> {
        let mut form = vec![
            ("client_id", client_id),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];
        if let Some(secret) = client_secret {
            form.push(("client_secret", secret));
        }
        self.token_request(&form).await
    }

    async fn refresh(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
        refresh_token: &str,
    ) -> Result<UpstreamToken, UpstreamError> {
        let mut form = vec![
            ("client_id", client_id),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        if let Some(secret) = client_secret {
            form.push(("client_secret", secret));
        }
        self.token_request(&form).await
    }

    async fn fetch_identity(
        &self,
        token: &UpstreamToken,
        scopes: &ScopeSet,
    ) -> Result<UserIdentity, UpstreamError> {
        let user: GitHubUser = self.api_get("/user", &token.access_token).await?;

        let updated_at = user
            .updated_at
            .as_deref()
            .and_then(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
            .map(|dt| dt.timestamp());

        let mut email = user.email;
        let mut email_verified = None;
        if scopes.contains(Scope::Email) {
            // The profile email is whatever the user chose to publish; the
            // emails endpoint knows the primary address and its verified
            // flag. A failure here drops the claim, it does not fail login.
            match self
                .api_get::<Vec<GitHubEmail>>("/user/emails", &token.access_token)
                .await
            {
                Ok(emails) => {
                    if let Some(primary) = emails.into_iter().find(|e| e.primary) {
                        email_verified = Some(primary.verified);
                        email = Some(primary.email);
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "email lookup failed, dropping email claims");
                }
            }
        }

        let groups = if scopes.contains(Scope::Groups) {
            match self
                .api_get::<Vec<GitHubOrg>>("/user/orgs", &token.access_token)
                .await
            {
                Ok(orgs) => Some(orgs.into_iter().map(|o| o.login).collect()),
                Err(e) => {
                    tracing::debug!(error = %e, "org lookup failed, dropping groups claim");
                    None
                }
            }
        } else {
            None
        };

        Ok(UserIdentity {
            id: user.id.to_string(),
            username: user.login,
            name: user.name,
            avatar_url: user.avatar_url,
            profile_url: user.html_url,
            updated_at,
            email,
            email_verified,
            groups,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_mapping() {
        let gh = GitHub::new(super::super::http_client());
        // openid alone grants nothing beyond the public profile.
        assert_eq!(gh.upstream_scope(&ScopeSet::parse("openid")), "");
        assert_eq!(
            gh.upstream_scope(&ScopeSet::parse("openid email")),
            "user:email"
        );
        assert_eq!(
            gh.upstream_scope(&ScopeSet::parse("openid profile email")),
            "read:user user:email"
        );
        assert_eq!(
            gh.upstream_scope(&ScopeSet::parse("openid groups")),
            "read:org"
        );
    }
}
