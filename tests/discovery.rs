//! Discovery, JWKS, WebFinger, health, root-redirect, and host-policy
//! surface tests.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use wiremock::MockServer;

use common::*;

#[tokio::test]
async fn discovery_document_follows_observed_host() {
    let server = MockServer::start().await;
    let (app, _state) = app_with_mock(test_config(), &server.uri());

    let resp = get(&app, "/.well-known/openid-configuration").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let doc = body_json(resp).await;

    assert_eq!(doc["issuer"], "https://id.example.com");
    assert_eq!(
        doc["authorization_endpoint"],
        "https://id.example.com/authorize"
    );
    assert_eq!(doc["token_endpoint"], "https://id.example.com/token");
    assert_eq!(doc["userinfo_endpoint"], "https://id.example.com/userinfo");
    assert_eq!(
        doc["jwks_uri"],
        "https://id.example.com/.well-known/jwks.json"
    );
    assert_eq!(doc["response_types_supported"], serde_json::json!(["code"]));
    assert_eq!(doc["subject_types_supported"], serde_json::json!(["public"]));
    assert_eq!(
        doc["id_token_signing_alg_values_supported"],
        serde_json::json!(["RS256"])
    );
    assert_eq!(
        doc["token_endpoint_auth_methods_supported"],
        serde_json::json!(["client_secret_basic", "client_secret_post"])
    );
    assert_eq!(
        doc["code_challenge_methods_supported"],
        serde_json::json!(["S256", "plain"])
    );
    assert_eq!(
        doc["scopes_supported"],
        serde_json::json!(["openid", "profile", "email", "groups"])
    );
}

#[tokio::test]
async fn discovery_respects_base_path() {
    let server = MockServer::start().await;
    let mut config = test_config();
    config.base_path = "/oidc".into();
    let (app, _state) = app_with_mock(config, &server.uri());

    let resp = get(&app, "/oidc/.well-known/openid-configuration").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let doc = body_json(resp).await;
    assert_eq!(doc["issuer"], "https://id.example.com/oidc");
    assert_eq!(doc["token_endpoint"], "https://id.example.com/oidc/token");
}

#[tokio::test]
async fn jwks_exposes_only_public_signing_material() {
    let server = MockServer::start().await;
    let (app, _state) = app_with_mock(test_config(), &server.uri());

    let resp = get(&app, "/.well-known/jwks.json").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let jwks = body_json(resp).await;

    let keys = jwks["keys"].as_array().unwrap();
    assert_eq!(keys.len(), 1, "only the signing key may be published");
    let key = &keys[0];
    assert_eq!(key["kty"], "RSA");
    assert_eq!(key["use"], "sig");
    assert_eq!(key["alg"], "RS256");
    assert!(key["kid"].is_string());
    assert!(key["n"].is_string());
    assert!(key["e"].is_string());
    assert!(key.get("d").is_none());
    assert!(key.get("p").is_none());
    assert!(key.get("k").is_none());
}

#[tokio::test]
async fn webfinger_scenarios() {
    let server = MockServer::start().await;
    let (app, _state) = app_with_mock(test_config(), &server.uri());

    // Allowed domain: one issuer link.
    let resp = get(
        &app,
        "/.well-known/webfinger?resource=acct:alice@allowed.example",
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/jrd+json"
    );
    let jrd = body_json(resp).await;
    assert_eq!(jrd["subject"], "acct:alice@allowed.example");
    let links = jrd["links"].as_array().unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(
        links[0]["rel"],
        "http://openid.net/specs/connect/1.0/issuer"
    );
    assert_eq!(links[0]["href"], "https://id.example.com");

    // Matching rel keeps the link; any other rel empties it.
    let resp = get(
        &app,
        "/.well-known/webfinger?resource=acct:alice@allowed.example&rel=http%3A%2F%2Fopenid.net%2Fspecs%2Fconnect%2F1.0%2Fissuer",
    )
    .await;
    assert_eq!(body_json(resp).await["links"].as_array().unwrap().len(), 1);

    let resp = get(
        &app,
        "/.well-known/webfinger?resource=acct:alice@allowed.example&rel=other",
    )
    .await;
    assert!(body_json(resp).await["links"].as_array().unwrap().is_empty());

    // Unlisted domain and non-acct resources: 404.
    let resp = get(
        &app,
        "/.well-known/webfinger?resource=acct:alice@other.example",
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = get(
        &app,
        &format!(
            "/.well-known/webfinger?resource={}",
            urlencoding::encode("https://foo")
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webfinger_disabled_without_allowlist() {
    let server = MockServer::start().await;
    let mut config = test_config();
    config.allowed_webfinger_hosts = None;
    let (app, _state) = app_with_mock(config, &server.uri());

    let resp = get(
        &app,
        "/.well-known/webfinger?resource=acct:alice@allowed.example",
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_ignores_host_policy() {
    let server = MockServer::start().await;
    let (app, _state) = app_with_mock(test_config(), &server.uri());

    // Probes address the pod directly; no allowlisted Host, plain HTTP.
    let resp = send(
        &app,
        Request::builder()
            .uri("/health")
            .header(header::HOST, "10.42.0.7:8000")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn disallowed_host_is_rejected() {
    let server = MockServer::start().await;
    let (app, _state) = app_with_mock(test_config(), &server.uri());

    let resp = send(
        &app,
        Request::builder()
            .uri("/.well-known/openid-configuration")
            .header(header::HOST, "evil.example.org")
            .header("x-forwarded-proto", "https")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn forwarded_headers_ignored_without_trusted_proxy() {
    let server = MockServer::start().await;
    let mut config = test_config();
    config.trust_forwarded_headers = false;
    let (app, _state) = app_with_mock(config, &server.uri());

    // A direct client forging proxy headers is judged by its real Host and
    // scheme: evil.example.org over plain HTTP, rejected twice over.
    let resp = send(
        &app,
        Request::builder()
            .uri("/.well-known/openid-configuration")
            .header(header::HOST, "evil.example.org")
            .header("x-forwarded-host", "id.example.com")
            .header("x-forwarded-proto", "https")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Even with an acceptable real Host, the forged headers must not leak
    // into the issuer.
    let resp = send(
        &app,
        Request::builder()
            .uri("/.well-known/openid-configuration")
            .header(header::HOST, "localhost:8000")
            .header("x-forwarded-host", "id.example.com")
            .header("x-forwarded-proto", "https")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["issuer"], "http://localhost:8000");
}

#[tokio::test]
async fn plain_http_requires_loopback() {
    let server = MockServer::start().await;
    let (app, _state) = app_with_mock(test_config(), &server.uri());

    // Allowed host, but plain HTTP from outside: rejected.
    let resp = send(
        &app,
        Request::builder()
            .uri("/.well-known/openid-configuration")
            .header(header::HOST, "id.example.com")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Loopback over plain HTTP: fine by default.
    let resp = send(
        &app,
        Request::builder()
            .uri("/.well-known/openid-configuration")
            .header(header::HOST, "localhost:8000")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["issuer"], "http://localhost:8000");
}

#[tokio::test]
async fn root_redirect_modes() {
    let server = MockServer::start().await;
    let (app, _state) = app_with_mock(test_config(), &server.uri());
    let resp = get(&app, "/").await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert!(location(&resp).starts_with("https://github.com/"));

    let mut config = test_config();
    config.root_redirect = takagi::config::RootRedirect::Off;
    let (app, _state) = app_with_mock(config, &server.uri());
    let resp = get(&app, "/").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn docs_gated_by_config() {
    let server = MockServer::start().await;

    let (app, _state) = app_with_mock(test_config(), &server.uri());
    let resp = get(&app, "/openapi.json").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let mut config = test_config();
    config.enable_docs = true;
    let (app, _state) = app_with_mock(config, &server.uri());
    let resp = get(&app, "/openapi.json").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let doc = body_json(resp).await;
    assert_eq!(doc["openapi"], "3.0.3");
    assert!(doc["paths"].get("/authorize").is_some());

    let resp = get(&app, "/docs").await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn security_headers_present() {
    let server = MockServer::start().await;
    let (app, _state) = app_with_mock(test_config(), &server.uri());

    let resp = get(&app, "/.well-known/openid-configuration").await;
    assert_eq!(
        resp.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert_eq!(resp.headers().get("cache-control").unwrap(), "no-store");
    assert_eq!(
        resp.headers().get("referrer-policy").unwrap(),
        "no-referrer"
    );
}
