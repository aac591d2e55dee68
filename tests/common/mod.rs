//! Shared fixtures for integration tests: a router wired to a wiremock
//! upstream, plus request/response helpers.
#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use takagi::config::{Config, Provider, RootRedirect};
use takagi::upstream::github::GitHub;
use takagi::upstream::http_client;
use takagi::{router, AppState};

pub fn test_config() -> Config {
    Config {
        provider: Provider::GitHub,
        allowed_hosts: vec!["id.example.com".into()],
        allowed_clients: vec!["*".into()],
        base_path: String::new(),
        fix_redirect_uris: false,
        token_lifetime: None,
        root_redirect: RootRedirect::Repo,
        treat_loopback_as_secure: true,
        // The suite simulates a TLS-terminating proxy via X-Forwarded-*.
        trust_forwarded_headers: true,
        return_to_referrer: false,
        allowed_webfinger_hosts: Some(vec!["allowed.example".into()]),
        keyset: Some(
            serde_json::to_string(&takagi::keys::generate_jwks().unwrap()).unwrap(),
        ),
        keyset_file: None,
        data_dir: "data".into(),
        client_secret: None,
        enable_docs: false,
        bind: "127.0.0.1".into(),
        transaction_ttl: std::time::Duration::from_secs(600),
    }
}

/// Router + state backed by a mock GitHub at `mock_uri`.
pub fn app_with_mock(config: Config, mock_uri: &str) -> (Router, Arc<AppState>) {
    let upstream = Arc::new(GitHub::with_base_urls(http_client(), mock_uri, mock_uri));
    let state = Arc::new(AppState::with_upstream(config, upstream).unwrap());
    (router(state.clone()), state)
}

/// Mount the standard happy-path GitHub mocks: token exchange and the
/// user/emails/orgs API.
pub async fn mount_github_mocks(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "gho_testtoken",
            "token_type": "bearer",
            "scope": "read:user,user:email",
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": 583231,
            "login": "octocat",
            "name": "The Octocat",
            "avatar_url": "https://avatars.githubusercontent.com/u/583231",
            "html_url": "https://github.com/octocat",
            "email": null,
            "updated_at": "2024-01-15T10:00:00Z",
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/user/emails"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "email": "octocat@github.com", "primary": true, "verified": true },
            { "email": "octo@example.com", "primary": false, "verified": false },
        ])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/user/orgs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "login": "github" },
            { "login": "octo-org" },
        ])))
        .mount(server)
        .await;
}

pub async fn send(app: &Router, req: Request<Body>) -> Response<Body> {
    app.clone().oneshot(req).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    send(
        app,
        Request::builder()
            .uri(uri)
            .header(header::HOST, "id.example.com")
            .header("x-forwarded-proto", "https")
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

pub async fn post_form(app: &Router, uri: &str, body: &str) -> Response<Body> {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::HOST, "id.example.com")
            .header("x-forwarded-proto", "https")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

pub async fn body_json(resp: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn location(resp: &Response<Body>) -> String {
    resp.headers()
        .get(header::LOCATION)
        .expect("response has no Location header")
        .to_str()
        .unwrap()
        .to_string()
}

pub fn query_param(url: &str, name: &str) -> Option<String> {
    let parsed = url::Url::parse(url).unwrap();
    parsed
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// Decode a JWT payload without verifying, for asserting claim contents
/// after the signature has already been checked elsewhere.
pub fn decode_payload(jwt: &str) -> serde_json::Value {
    let parts: Vec<&str> = jwt.split('.').collect();
    assert_eq!(parts.len(), 3, "not a JWS: {}", jwt);
    let bytes = URL_SAFE_NO_PAD.decode(parts[1]).unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub const REDIRECT_URI: &str = "https://id.example.com/r/https://app.example/cb";

/// Drive `/authorize` + the upstream callback, returning the authorization
/// code delivered to the relying party.
pub async fn obtain_code(app: &Router, extra_authorize_params: &str) -> String {
    let uri = format!(
        "/authorize?client_id=Iv1.cafe&response_type=code&redirect_uri={}&scope={}&state=rp-state&nonce=n-0S6_WzA2Mj{}",
        urlencoding::encode(REDIRECT_URI),
        urlencoding::encode("openid profile email"),
        extra_authorize_params,
    );
    let resp = get(app, &uri).await;
    assert_eq!(resp.status(), StatusCode::FOUND, "authorize did not redirect");
    let upstream_url = location(&resp);
    let state_ref = query_param(&upstream_url, "state").expect("no state handed upstream");

    let resp = get(
        app,
        &format!("/r/https://app.example/cb?code=gh_code&state={}", state_ref),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FOUND, "callback did not redirect");
    let rp_url = location(&resp);
    assert!(
        rp_url.starts_with("https://app.example/cb"),
        "unexpected relying-party redirect: {}",
        rp_url
    );
    assert_eq!(query_param(&rp_url, "state").as_deref(), Some("rp-state"));
    query_param(&rp_url, "code").expect("no code delivered to the relying party")
}
