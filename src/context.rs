use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};

use crate::errors::AppError;
use crate::AppState;

/// Immutable view of the request as the outside world saw it.
///
/// Every issuer-relative URL (the `iss` claim, discovery endpoints, the
/// `/userinfo` audience) is derived from this; nothing is baked into
/// configuration except the base path.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub scheme: String,
    pub host: String,
    pub base_path: String,
    pub referer: Option<String>,
    pub now: DateTime<Utc>,
}

impl RequestContext {
    /// Derive the observed scheme and host.
    ///
    /// `X-Forwarded-Proto` / `X-Forwarded-Host` are spoofable by anyone who
    /// can reach this process directly, so they are consulted only when the
    /// deployment has declared a trusted reverse proxy in front of it
    /// (`TRUST_FORWARDED_HEADERS`). Otherwise the `Host` header and the
    /// plain-HTTP reality of the listener are what was observed.
    pub fn from_headers(
        headers: &HeaderMap,
        base_path: &str,
        trust_forwarded: bool,
    ) -> Result<Self, AppError> {
        let forwarded = |name: &str| {
            if !trust_forwarded {
                return None;
            }
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let scheme = forwarded("x-forwarded-proto")
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_else(|| "http".to_string());

        let host = forwarded("x-forwarded-host")
            .or_else(|| {
                headers
                    .get(axum::http::header::HOST)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
            })
            .ok_or_else(|| AppError::InvalidRequest("missing Host header".into()))?;

        let referer = headers
            .get(axum::http::header::REFERER)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Ok(Self {
            scheme,
            host,
            base_path: base_path.to_string(),
            referer,
            now: Utc::now(),
        })
    }

    /// The issuer URL observed on this request: scheme + host + base path,
    /// no trailing slash.
    pub fn issuer(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.base_path)
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.issuer(), path)
    }

    pub fn userinfo_url(&self) -> String {
        self.url_for("/userinfo")
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for RequestContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Self::from_headers(
            &parts.headers,
            &state.config.base_path,
            state.config.trust_forwarded_headers,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                v.parse().unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_issuer_from_host() {
        let ctx =
            RequestContext::from_headers(&headers(&[("host", "id.example.com")]), "", false)
                .unwrap();
        assert_eq!(ctx.issuer(), "http://id.example.com");
        assert_eq!(ctx.userinfo_url(), "http://id.example.com/userinfo");
    }

    #[test]
    fn test_forwarded_headers_win_behind_trusted_proxy() {
        let ctx = RequestContext::from_headers(
            &headers(&[
                ("host", "10.0.0.5:8000"),
                ("x-forwarded-host", "id.example.com"),
                ("x-forwarded-proto", "https"),
            ]),
            "/oidc",
            true,
        )
        .unwrap();
        assert_eq!(ctx.issuer(), "https://id.example.com/oidc");
    }

    #[test]
    fn test_forwarded_headers_ignored_without_trust() {
        // A direct client forging proxy headers gets no say in the observed
        // scheme or host.
        let ctx = RequestContext::from_headers(
            &headers(&[
                ("host", "direct.example.org"),
                ("x-forwarded-host", "id.example.com"),
                ("x-forwarded-proto", "https"),
            ]),
            "",
            false,
        )
        .unwrap();
        assert_eq!(ctx.host, "direct.example.org");
        assert_eq!(ctx.scheme, "http");
    }

    #[test]
    fn test_missing_host_rejected() {
        assert!(RequestContext::from_headers(&HeaderMap::new(), "", false).is_err());
        // Forwarded host alone is not an identity when untrusted.
        assert!(RequestContext::from_headers(
            &headers(&[("x-forwarded-host", "id.example.com")]),
            "",
            false
        )
        .is_err());
    }
}
