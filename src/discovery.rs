//! Discovery surface: the OpenID Provider metadata document, JWKS,
//! WebFinger, health, the root redirect, and the optional docs pages.
//!
//! Every URL in these responses is derived from the observed request, so
//! the same deployment answers correctly on every hostname it is allowed
//! to serve.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::RootRedirect;
use crate::context::RequestContext;
use crate::errors::AppError;
use crate::flow::found;
use crate::policy;
use crate::tokens::Scope;
use crate::AppState;

pub const OIDC_ISSUER_REL: &str = "http://openid.net/specs/connect/1.0/issuer";

#[derive(Debug, Serialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub introspection_endpoint: String,
    pub jwks_uri: String,
    pub response_types_supported: Vec<&'static str>,
    pub subject_types_supported: Vec<&'static str>,
    pub id_token_signing_alg_values_supported: Vec<&'static str>,
    pub scopes_supported: Vec<&'static str>,
    pub token_endpoint_auth_methods_supported: Vec<&'static str>,
    pub grant_types_supported: Vec<&'static str>,
    pub code_challenge_methods_supported: Vec<&'static str>,
    pub claims_supported: Vec<&'static str>,
}

pub async fn openid_configuration(
    State(_state): State<Arc<AppState>>,
    ctx: RequestContext,
) -> Json<DiscoveryDocument> {
    Json(DiscoveryDocument {
        issuer: ctx.issuer(),
        authorization_endpoint: ctx.url_for("/authorize"),
        token_endpoint: ctx.url_for("/token"),
        userinfo_endpoint: ctx.url_for("/userinfo"),
        introspection_endpoint: ctx.url_for("/introspect"),
        jwks_uri: ctx.url_for("/.well-known/jwks.json"),
        response_types_supported: vec!["code"],
        subject_types_supported: vec!["public"],
        id_token_signing_alg_values_supported: vec!["RS256"],
        scopes_supported: Scope::all().iter().map(Scope::as_str).collect(),
        token_endpoint_auth_methods_supported: vec!["client_secret_basic", "client_secret_post"],
        grant_types_supported: vec!["authorization_code", "refresh_token"],
        code_challenge_methods_supported: vec!["S256", "plain"],
        claims_supported: vec![
            "iss",
            "sub",
            "aud",
            "iat",
            "exp",
            "preferred_username",
            "name",
            "nickname",
            "picture",
            "profile",
            "updated_at",
            "email",
            "email_verified",
            "groups",
        ],
    })
}

/// Public parameters of the signing key only. The encryption key and all
/// private material stay inside the process.
pub async fn jwks(State(state): State<Arc<AppState>>) -> Response {
    Json(state.keys.snapshot().public_jwks()).into_response()
}

#[derive(Debug, Deserialize)]
pub struct WebFingerParams {
    pub resource: Option<String>,
    pub rel: Option<String>,
}

pub async fn webfinger(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Query(params): Query<WebFingerParams>,
) -> Result<Response, AppError> {
    let resource = params
        .resource
        .as_deref()
        .ok_or_else(|| AppError::InvalidRequest("resource is required".into()))?;

    // Only acct: resources for allowlisted mail domains exist here.
    let email = resource.strip_prefix("acct:").ok_or(AppError::NotFound)?;
    let (_, domain) = policy::parse_email(email).ok_or(AppError::NotFound)?;
    if !policy::webfinger_domain_allowed(&state.config, domain) {
        return Err(AppError::NotFound);
    }

    let links = match params.rel.as_deref() {
        None => vec![json!({ "rel": OIDC_ISSUER_REL, "href": ctx.issuer() })],
        Some(rel) if rel == OIDC_ISSUER_REL => {
            vec![json!({ "rel": OIDC_ISSUER_REL, "href": ctx.issuer() })]
        }
        Some(_) => vec![],
    };

    let body = json!({
        "subject": resource,
        "links": links,
    });
    Ok((
        [(header::CONTENT_TYPE, "application/jrd+json")],
        body.to_string(),
    )
        .into_response())
}

/// Liveness only; never touches the upstream provider or the keyset.
pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn root(State(state): State<Arc<AppState>>, ctx: RequestContext) -> Response {
    match state.config.root_redirect {
        RootRedirect::Repo => found(state.config.provider.repo_url()),
        RootRedirect::Settings => found(state.config.provider.settings_url()),
        RootRedirect::Docs => found(&ctx.url_for("/docs")),
        RootRedirect::Off => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn docs(ctx: RequestContext) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>Takagi API</title>
  <script type="module" src="https://unpkg.com/rapidoc/dist/rapidoc-min.js"></script>
</head>
<body>
  <rapi-doc spec-url="{}" theme="dark" render-style="read"></rapi-doc>
</body>
</html>
"#,
        ctx.url_for("/openapi.json")
    ))
}

pub async fn openapi(ctx: RequestContext) -> Json<serde_json::Value> {
    let issuer = ctx.issuer();
    Json(json!({
        "openapi": "3.0.3",
        "info": {
            "title": "Takagi",
            "description": "An OpenID Connect 1.0 provider backed by an upstream OAuth2 identity provider.",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "servers": [{ "url": issuer }],
        "paths": {
            "/authorize": {
                "get": {
                    "summary": "OIDC authorization endpoint",
                    "parameters": [
                        { "name": "client_id", "in": "query", "required": true, "schema": { "type": "string" } },
                        { "name": "response_type", "in": "query", "required": true, "schema": { "type": "string", "enum": ["code"] } },
                        { "name": "redirect_uri", "in": "query", "required": true, "schema": { "type": "string" } },
                        { "name": "scope", "in": "query", "required": true, "schema": { "type": "string" } },
                        { "name": "state", "in": "query", "schema": { "type": "string" } },
                        { "name": "nonce", "in": "query", "schema": { "type": "string" } },
                        { "name": "code_challenge", "in": "query", "schema": { "type": "string" } },
                        { "name": "code_challenge_method", "in": "query", "schema": { "type": "string", "enum": ["S256", "plain"] } }
                    ],
                    "responses": { "302": { "description": "Redirect to the upstream provider" } }
                }
            },
            "/token": {
                "post": {
                    "summary": "OIDC token endpoint",
                    "responses": { "200": { "description": "Token response" } }
                }
            },
            "/userinfo": {
                "get": { "summary": "OIDC userinfo endpoint", "responses": { "200": { "description": "Claims for the bearer" } } },
                "post": { "summary": "OIDC userinfo endpoint", "responses": { "200": { "description": "Claims for the bearer" } } }
            },
            "/introspect": {
                "post": { "summary": "RFC 7662 token introspection", "responses": { "200": { "description": "Introspection result" } } }
            },
            "/.well-known/openid-configuration": {
                "get": { "summary": "OIDC discovery document", "responses": { "200": { "description": "Provider metadata" } } }
            },
            "/.well-known/jwks.json": {
                "get": { "summary": "Public signing keys", "responses": { "200": { "description": "JWK Set" } } }
            },
            "/.well-known/webfinger": {
                "get": { "summary": "WebFinger issuer discovery", "responses": { "200": { "description": "JRD document" } } }
            },
            "/health": {
                "get": { "summary": "Liveness check", "responses": { "200": { "description": "Always empty 200" } } }
            }
        }
    }))
}
