//! Claim model: scopes, the normalized upstream identity snapshot, and the
//! claim sets carried by each issued token.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Timestamp of 9999-12-31T23:59:59Z, the effective "never expires" value
/// used when no token lifetime is configured.
pub const MAX_EXPIRY_UNIX: i64 = 253_402_300_799;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    OpenId,
    Profile,
    Email,
    Groups,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::OpenId => "openid",
            Scope::Profile => "profile",
            Scope::Email => "email",
            Scope::Groups => "groups",
        }
    }

    pub fn from_str(s: &str) -> Option<Scope> {
        match s {
            "openid" => Some(Scope::OpenId),
            "profile" => Some(Scope::Profile),
            "email" => Some(Scope::Email),
            "groups" => Some(Scope::Groups),
            _ => None,
        }
    }

    pub fn all() -> [Scope; 4] {
        [Scope::OpenId, Scope::Profile, Scope::Email, Scope::Groups]
    }
}

/// An ordered, deduplicated scope set. Unknown scope values are ignored on
/// parse (RFC 6749 §3.3 lets the server narrow the requested scope).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeSet(BTreeSet<Scope>);

impl ScopeSet {
    pub fn parse(raw: &str) -> Self {
        ScopeSet(
            raw.split_whitespace()
                .filter_map(Scope::from_str)
                .collect(),
        )
    }

    pub fn contains(&self, scope: Scope) -> bool {
        self.0.contains(&scope)
    }

    pub fn has_openid(&self) -> bool {
        self.contains(Scope::OpenId)
    }

    pub fn iter(&self) -> impl Iterator<Item = Scope> + '_ {
        self.0.iter().copied()
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.0.iter().map(Scope::as_str).collect();
        f.write_str(&joined.join(" "))
    }
}

/// Normalized identity snapshot from the upstream provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_url: Option<String>,
    /// Seconds since the epoch of the last profile update, where the
    /// upstream exposes one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
}

/// The scope-gated claim block shared by ID tokens and `/userinfo`.
/// Every field is optional and omitted when null; a relying party never
/// sees an explicit `null` claim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileClaims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
}

/// Project an identity snapshot onto the granted scopes.
pub fn project(identity: &UserIdentity, scopes: &ScopeSet) -> ProfileClaims {
    let mut claims = ProfileClaims::default();

    if scopes.contains(Scope::Profile) {
        claims.preferred_username = Some(identity.username.clone());
        claims.nickname = Some(identity.username.clone());
        claims.name = identity.name.clone();
        claims.picture = identity.avatar_url.clone();
        claims.profile = identity.profile_url.clone();
        claims.updated_at = identity.updated_at;
    }

    if scopes.contains(Scope::Email) {
        claims.email = identity.email.clone();
        claims.email_verified = identity.email_verified;
    }

    if scopes.contains(Scope::Groups) {
        // An empty group list is indistinguishable from "no data" upstream;
        // omit it rather than emitting [].
        claims.groups = identity.groups.clone().filter(|g| !g.is_empty());
    }

    claims
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(flatten)]
    pub profile: ProfileClaims,
}

/// Access-token claims. `aud` is the observed `/userinfo` URL; `token` is
/// the JWE-sealed upstream token, opaque to relying parties.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub client_id: String,
    pub iat: i64,
    pub exp: i64,
    pub scope: String,
    pub token: String,
}

/// Refresh-token claims. `aud` binds the token to the client it was issued
/// to; `jti` makes each one single-use.
#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub scope: String,
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> UserIdentity {
        UserIdentity {
            id: "583231".into(),
            username: "octocat".into(),
            name: Some("The Octocat".into()),
            avatar_url: Some("https://avatars.example/u/583231".into()),
            profile_url: Some("https://github.com/octocat".into()),
            updated_at: Some(1_700_000_000),
            email: Some("octocat@github.com".into()),
            email_verified: Some(true),
            groups: Some(vec!["github".into()]),
        }
    }

    #[test]
    fn test_scope_parse_ignores_unknown() {
        let scopes = ScopeSet::parse("openid  profile bogus email");
        assert!(scopes.has_openid());
        assert!(scopes.contains(Scope::Profile));
        assert!(scopes.contains(Scope::Email));
        assert!(!scopes.contains(Scope::Groups));
        assert_eq!(scopes.to_string(), "openid profile email");
    }

    #[test]
    fn test_projection_is_scope_gated() {
        let id = identity();

        let openid_only = project(&id, &ScopeSet::parse("openid"));
        let json = serde_json::to_value(&openid_only).unwrap();
        assert_eq!(json, serde_json::json!({}));

        let with_profile = project(&id, &ScopeSet::parse("openid profile"));
        assert_eq!(with_profile.preferred_username.as_deref(), Some("octocat"));
        assert_eq!(with_profile.nickname.as_deref(), Some("octocat"));
        assert!(with_profile.email.is_none());
        assert!(with_profile.groups.is_none());

        let with_email = project(&id, &ScopeSet::parse("openid email"));
        assert_eq!(with_email.email.as_deref(), Some("octocat@github.com"));
        assert_eq!(with_email.email_verified, Some(true));
        assert!(with_email.preferred_username.is_none());
    }

    #[test]
    fn test_null_claims_are_omitted() {
        let mut id = identity();
        id.name = None;
        id.email = None;
        id.email_verified = None;

        let claims = project(&id, &ScopeSet::parse("openid profile email"));
        let json = serde_json::to_value(&claims).unwrap();
        assert!(json.get("name").is_none());
        assert!(json.get("email").is_none());
        assert!(json.get("email_verified").is_none());
        assert_eq!(json["preferred_username"], "octocat");
    }

    #[test]
    fn test_empty_groups_omitted() {
        let mut id = identity();
        id.groups = Some(vec![]);
        let claims = project(&id, &ScopeSet::parse("openid groups"));
        assert!(claims.groups.is_none());
    }
}
