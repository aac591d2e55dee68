//! Discord as the upstream identity provider (the Snowflake persona).
//!
//! Quirks handled here: Discord rejects an authorization request whose scope
//! list is empty of "real" scopes, so `identify` is always requested; avatar
//! URLs are synthesized from the CDN hash; there is no profile-update
//! timestamp, so `updated_at` is never emitted.

use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;

use crate::tokens::{Scope, ScopeSet, UserIdentity};

use super::{UpstreamError, UpstreamProvider, UpstreamToken, WireTokenResponse};

pub struct Discord {
    client: ClientWithMiddleware,
    api_base: String,
}

impl Discord {
    pub fn new(client: ClientWithMiddleware) -> Self {
        Self::with_base_url(client, "https://discord.com/api")
    }

    /// Override the API base, for tests against a local mock server.
    pub fn with_base_url(client: ClientWithMiddleware, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into(),
        }
    }

    async fn token_request(
        &self,
        form: &[(&str, &str)],
    ) -> Result<UpstreamToken, UpstreamError> {
        let resp = self
            .client
            .post(format!("{}/oauth2/token", self.api_base))
            .form(form)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            // Discord reports bad grants as HTTP 400 with an OAuth error body.
            if status.as_u16() == 400 {
                return Err(UpstreamError::Rejected(body));
            }
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let wire: WireTokenResponse =
            serde_json::from_str(&body).map_err(|e| UpstreamError::Decode(e.to_string()))?;
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
struct DiscordUser {
    id: String,
    username: String,
    global_name: Option<String>,
    avatar: Option<String>,
    email: Option<String>,
    verified: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct DiscordGuild {
    name: String,
}

#[async_trait]
impl UpstreamProvider for Discord {
    fn name(&self) -> &'static str {
        "discord"
    }

    fn authorize_endpoint(&self) -> String {
        format!("{}/oauth2/authorize", self.api_base)
    }

    fn upstream_scope(&self, scopes: &ScopeSet) -> String {
        // "openid" alone would be rejected with "no scopes provided";
        // identify covers the base profile either way.
        let mut upstream = vec!["identify"];
        if scopes.contains(Scope::Email) {
            upstream.push("email");
        }
        if scopes.contains(Scope::Groups) {
            upstream.push("guilds");
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
            ("grant_type", "authorization_code"),
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
        let user: DiscordUser = self.api_get("/users/@me", &token.access_token).await?;

        let avatar_url = user
            .avatar
            .as_deref()
            .map(|hash| format!("https://cdn.discordapp.com/avatars/{}/{}.png", user.id, hash));

        let groups = if scopes.contains(Scope::Groups) {
            match self
                .api_get::<Vec<DiscordGuild>>("/users/@me/guilds", &token.access_token)
                .await
            {
                Ok(guilds) => Some(guilds.into_iter().map(|g| g.name).collect()),
                Err(e) => {
                    tracing::debug!(error = %e, "guild lookup failed, dropping groups claim");
                    None
                }
            }
        } else {
            None
        };

        let email = if scopes.contains(Scope::Email) {
            user.email
        } else {
            None
        };
        let email_verified = email.as_ref().and(user.verified);

        Ok(UserIdentity {
            id: user.id.clone(),
            username: user.username,
            name: user.global_name,
            avatar_url,
            profile_url: Some(format!("https://discord.com/users/{}", user.id)),
            updated_at: None,
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
    fn test_identify_always_requested() {
        let discord = Discord::new(super::super::http_client());
        assert_eq!(discord.upstream_scope(&ScopeSet::parse("openid")), "identify");
        assert_eq!(
            discord.upstream_scope(&ScopeSet::parse("openid email groups")),
            "identify email guilds"
        );
    }
}
