//! Takagi — an OpenID Connect 1.0 provider backed by GitHub (or, as
//! Snowflake, by Discord).
//!
//! Library crate: everything the binary wires together, re-exported for
//! integration tests in `tests/`.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod cli;
pub mod config;
pub mod context;
pub mod discovery;
pub mod errors;
pub mod flow;
pub mod jobs;
pub mod keys;
pub mod policy;
pub mod tokens;
pub mod upstream;

use config::Config;
use context::RequestContext;
use errors::AppError;
use flow::FlowStore;
use keys::KeysetManager;
use tokens::TokenService;
use upstream::UpstreamProvider;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub config: Config,
    pub keys: KeysetManager,
    pub tokens: TokenService,
    pub upstream: Arc<dyn UpstreamProvider>,
    pub store: Arc<FlowStore>,
}

impl AppState {
    /// Assemble state from configuration with the provider implied by it.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let upstream = upstream::provider_for(config.provider);
        Self::with_upstream(config, upstream)
    }

    /// Assemble state with an explicit upstream so tests can point it at
    /// a mock server.
    pub fn with_upstream(
        config: Config,
        upstream: Arc<dyn UpstreamProvider>,
    ) -> anyhow::Result<Self> {
        let keys = KeysetManager::initialize(&config)?;
        let tokens = TokenService::new(config.token_lifetime);
        let store = Arc::new(FlowStore::new(config.transaction_ttl));
        Ok(Self {
            config,
            keys,
            tokens,
            upstream,
            store,
        })
    }
}

/// Build the full application router, honoring the configured base path.
pub fn router(state: Arc<AppState>) -> Router {
    let mut routes = Router::new()
        .route("/", get(discovery::root))
        .route("/authorize", get(flow::authorize::authorize))
        .route("/token", post(flow::token::token))
        .route(
            "/userinfo",
            get(flow::userinfo::userinfo).post(flow::userinfo::userinfo),
        )
        .route("/introspect", post(flow::userinfo::introspect))
        .route("/r/*destination", get(flow::callback::callback))
        .route(
            "/.well-known/openid-configuration",
            get(discovery::openid_configuration),
        )
        .route("/.well-known/jwks.json", get(discovery::jwks))
        .route("/.well-known/webfinger", get(discovery::webfinger));

    if state.config.enable_docs {
        routes = routes
            .route("/docs", get(discovery::docs))
            .route("/openapi.json", get(discovery::openapi));
    }

    let policed = routes.layer(middleware::from_fn_with_state(
        state.clone(),
        enforce_host_policy,
    ));

    // /health sits outside the host policy: probes hit it by IP, and it must
    // answer no matter how the deployment is addressed.
    let inner = Router::new()
        .route("/health", get(discovery::health))
        .merge(policed)
        .with_state(state.clone());

    let app = if state.config.base_path.is_empty() {
        inner
    } else {
        Router::new().nest(&state.config.base_path, inner)
    };

    app.layer(TraceLayer::new_for_http())
        // Discovery, JWKS, and userinfo are meant to be fetched cross-origin.
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(security_headers_middleware))
}

/// Middleware: every request (except `/health`) must arrive for an allowed
/// host over an acceptable scheme before any handler runs.
async fn enforce_host_policy(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ctx = RequestContext::from_headers(
        req.headers(),
        &state.config.base_path,
        state.config.trust_forwarded_headers,
    )?;
    if !policy::host_allowed(&state.config, &ctx.host) {
        return Err(AppError::HostNotAllowed(ctx.host));
    }
    if !policy::scheme_allowed(&state.config, &ctx.scheme, &ctx.host) {
        return Err(AppError::InsecureTransport);
    }
    Ok(next.run(req).await)
}

/// Middleware: injects security headers into every response.
/// `no-store` doubles as the RFC 6749 §5.1 cache directive for token
/// responses.
async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", "nosniff".parse().unwrap());
    headers.insert("X-Frame-Options", "DENY".parse().unwrap());
    headers.insert("Cache-Control", "no-store".parse().unwrap());
    headers.insert("Pragma", "no-cache".parse().unwrap());
    headers.insert("Referrer-Policy", "no-referrer".parse().unwrap());
    headers.remove("Server");

    resp
}
