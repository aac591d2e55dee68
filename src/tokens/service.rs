//! Minting and verification of the three locally-issued token kinds.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, Validation};
use thiserror::Error;
use uuid::Uuid;

use crate::keys::{KeyError, Keyset};

use super::claims::{
    project, AccessTokenClaims, IdTokenClaims, RefreshTokenClaims, ScopeSet, UserIdentity,
    MAX_EXPIRY_UNIX,
};

#[derive(Debug, Error)]
pub enum BearerError {
    /// Signature, expiry, kid, issuer, or audience problems; 401 territory.
    #[error("{0}")]
    Invalid(String),

    /// The bearer verified but is an ID token, which is never a credential.
    #[error("ID token presented as bearer")]
    IdToken,
}

impl From<KeyError> for BearerError {
    fn from(e: KeyError) -> Self {
        BearerError::Invalid(e.to_string())
    }
}

pub struct TokenBundle {
    pub id_token: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: Option<i64>,
}

pub struct MintParams<'a> {
    pub identity: &'a UserIdentity,
    pub client_id: &'a str,
    pub scopes: &'a ScopeSet,
    pub nonce: Option<&'a str>,
    pub issuer: &'a str,
    pub userinfo_url: &'a str,
    /// JWE-sealed upstream token, embedded opaquely in the access and
    /// refresh tokens.
    pub upstream_jwe: &'a str,
    pub now: DateTime<Utc>,
}

/// Stateless token factory; the keyset snapshot is passed per call so a
/// rotation between two requests cannot straddle one operation.
pub struct TokenService {
    lifetime: Option<std::time::Duration>,
}

impl TokenService {
    pub fn new(lifetime: Option<std::time::Duration>) -> Self {
        Self { lifetime }
    }

    fn expiry(&self, iat: i64) -> i64 {
        match self.lifetime {
            Some(d) => (iat + d.as_secs() as i64).min(MAX_EXPIRY_UNIX),
            None => MAX_EXPIRY_UNIX,
        }
    }

    pub fn expires_in(&self) -> Option<i64> {
        self.lifetime.map(|d| d.as_secs() as i64)
    }

    /// Mint the ID + access + refresh token triple.
    pub fn mint(&self, keyset: &Keyset, params: MintParams<'_>) -> Result<TokenBundle, KeyError> {
        let iat = params.now.timestamp();
        let exp = self.expiry(iat);

        let id_token = keyset.sign(&IdTokenClaims {
            iss: params.issuer.to_string(),
            sub: params.identity.id.clone(),
            aud: params.client_id.to_string(),
            iat,
            exp,
            nonce: params.nonce.map(String::from),
            profile: project(params.identity, params.scopes),
        })?;

        let access_token = keyset.sign(&AccessTokenClaims {
            iss: params.issuer.to_string(),
            sub: params.identity.id.clone(),
            aud: params.userinfo_url.to_string(),
            client_id: params.client_id.to_string(),
            iat,
            exp,
            scope: params.scopes.to_string(),
            token: params.upstream_jwe.to_string(),
        })?;

        let refresh_token = keyset.sign(&RefreshTokenClaims {
            iss: params.issuer.to_string(),
            sub: params.identity.id.clone(),
            aud: params.client_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat,
            exp,
            scope: params.scopes.to_string(),
            token: params.upstream_jwe.to_string(),
            nonce: params.nonce.map(String::from),
        })?;

        Ok(TokenBundle {
            id_token,
            access_token,
            refresh_token,
            expires_in: self.expires_in(),
        })
    }

    /// Verify a `/userinfo` bearer: signature, expiry, current `kid`, issuer
    /// coherence, and audience equal to the observed `/userinfo` URL. ID
    /// tokens are detected by shape (no embedded `token` claim) and rejected
    /// distinctly so the endpoint can answer 400 instead of 401.
    pub fn verify_userinfo_bearer(
        &self,
        keyset: &Keyset,
        bearer: &str,
        expected_issuer: &str,
        userinfo_url: &str,
    ) -> Result<AccessTokenClaims, BearerError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;

        let data = keyset.verify::<serde_json::Value>(bearer, &validation)?;
        let claims = data.claims;

        if claims.get("token").and_then(|v| v.as_str()).is_none() {
            return Err(BearerError::IdToken);
        }
        if claims.get("iss").and_then(|v| v.as_str()) != Some(expected_issuer) {
            return Err(BearerError::Invalid("issuer mismatch".into()));
        }
        if claims.get("aud").and_then(|v| v.as_str()) != Some(userinfo_url) {
            return Err(BearerError::Invalid("audience mismatch".into()));
        }

        serde_json::from_value(claims)
            .map_err(|_| BearerError::Invalid("malformed access token".into()))
    }

    /// Verify a refresh token presented at `/token`, including its binding
    /// to the requesting client. Replay (`jti`) checks happen in the flow
    /// layer where the consumed-set lives.
    pub fn verify_refresh(
        &self,
        keyset: &Keyset,
        token: &str,
        expected_issuer: &str,
        client_id: &str,
    ) -> Result<RefreshTokenClaims, String> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;

        let data = keyset
            .verify::<serde_json::Value>(token, &validation)
            .map_err(|e| e.to_string())?;
        let claims = data.claims;

        if claims.get("jti").and_then(|v| v.as_str()).is_none()
            || claims.get("token").and_then(|v| v.as_str()).is_none()
        {
            return Err("not a refresh token".into());
        }
        if claims.get("iss").and_then(|v| v.as_str()) != Some(expected_issuer) {
            return Err("issuer mismatch".into());
        }
        if claims.get("aud").and_then(|v| v.as_str()) != Some(client_id) {
            return Err("refresh token was issued to a different client".into());
        }

        serde_json::from_value(claims).map_err(|_| "malformed refresh token".into())
    }

    /// Best-effort verification for `/introspect`: any failure means the
    /// token is simply inactive. ID tokens are never active credentials.
    pub fn introspect(
        &self,
        keyset: &Keyset,
        token: &str,
        expected_issuer: &str,
    ) -> Option<serde_json::Value> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;

        let data = keyset.verify::<serde_json::Value>(token, &validation).ok()?;
        let claims = data.claims;

        if claims.get("iss").and_then(|v| v.as_str()) != Some(expected_issuer) {
            return None;
        }
        claims.get("token").and_then(|v| v.as_str())?;
        Some(claims)
    }
}
