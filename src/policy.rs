//! Trust-boundary checks: host headers, redirect URIs, client allowlists,
//! and the WebFinger domain allowlist.
//!
//! These are small pure functions on purpose: every one of them guards a
//! security decision and gets exercised directly by unit tests.

use url::Url;

use crate::config::Config;
use crate::errors::AppError;

/// Strip an optional port from a Host header value. IPv6 literals keep their
/// brackets stripped as well (`[::1]:8080` → `::1`).
pub fn host_without_port(host: &str) -> &str {
    let host = host.trim();
    if let Some(rest) = host.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
    }
    // A bare IPv6 literal without brackets contains multiple colons and no port.
    if host.matches(':').count() > 1 {
        return host;
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

pub fn is_loopback_host(host: &str) -> bool {
    let h = host_without_port(host).to_ascii_lowercase();
    h == "localhost" || h == "127.0.0.1" || h == "::1"
}

/// Match a single allowlist pattern against a hostname.
///
/// Patterns are literal hostnames or IP literals, `*.example.com` (one or
/// more extra labels left of the suffix), or a bare `*` matching any host.
pub fn host_matches(pattern: &str, host: &str) -> bool {
    let host = host_without_port(host).to_ascii_lowercase();
    let pattern = pattern.trim().to_ascii_lowercase();

    if pattern == "*" {
        return true;
    }
    if let Some(suffix) = pattern.strip_prefix("*.") {
        // The wildcard must consume at least one non-empty label.
        return match host.strip_suffix(suffix) {
            Some(prefix) => prefix.ends_with('.') && prefix.len() > 1,
            None => false,
        };
    }
    pattern == host
}

/// Host-header check: loopback is always admitted, everything else must
/// match the allowlist.
pub fn host_allowed(config: &Config, host: &str) -> bool {
    if is_loopback_host(host) {
        return true;
    }
    config.allowed_hosts.iter().any(|p| host_matches(p, host))
}

/// HTTPS requirement: external traffic must be HTTPS; loopback may use
/// plain HTTP when `TREAT_LOOPBACK_AS_SECURE` (default) is on.
pub fn scheme_allowed(config: &Config, scheme: &str, host: &str) -> bool {
    if scheme.eq_ignore_ascii_case("https") {
        return true;
    }
    config.treat_loopback_as_secure && is_loopback_host(host)
}

pub fn client_allowed(config: &Config, client_id: &str) -> bool {
    config
        .allowed_clients
        .iter()
        .any(|c| c == "*" || c == client_id)
}

/// A validated relying-party redirect URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    /// The redirect URI as the relying party must present it at `/token`
    /// (after any `FIX_REDIRECT_URIS` rewrite).
    pub registered: String,
    /// The real destination the browser is ultimately sent to.
    pub destination: String,
}

/// Validate a redirect URI against the `/r/` policy.
///
/// Every redirect URI must point at this service's `/r/` endpoint with the
/// true destination encoded as the remainder of the path (plus query). When
/// `FIX_REDIRECT_URIS` is on, a non-`/r/` URI is rewritten into
/// `<issuer>/r/<original>` instead of being rejected.
pub fn resolve_redirect_uri(
    config: &Config,
    issuer: &str,
    raw: &str,
) -> Result<RedirectTarget, AppError> {
    let url = Url::parse(raw)
        .map_err(|_| AppError::InvalidRequest(format!("malformed redirect_uri: {}", raw)))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(AppError::InvalidRequest(format!(
            "redirect_uri must be http(s): {}",
            raw
        )));
    }

    let prefix = format!("{}/r/", config.base_path);
    let own_host = url
        .host_str()
        .map(|h| host_allowed(config, h))
        .unwrap_or(false);

    if own_host && url.path().starts_with(&prefix) {
        let mut destination = url.path()[prefix.len()..].to_string();
        if let Some(q) = url.query() {
            destination.push('?');
            destination.push_str(q);
        }
        let destination = urlencoding::decode(&destination)
            .map(|d| d.into_owned())
            .unwrap_or(destination);
        let dest_url = Url::parse(&destination).map_err(|_| {
            AppError::InvalidRequest(format!(
                "redirect_uri does not encode a valid destination: {}",
                raw
            ))
        })?;
        if dest_url.scheme() != "http" && dest_url.scheme() != "https" {
            return Err(AppError::InvalidRequest(format!(
                "encoded destination must be http(s): {}",
                destination
            )));
        }
        return Ok(RedirectTarget {
            registered: raw.to_string(),
            destination,
        });
    }

    if config.fix_redirect_uris {
        // The issuer already carries the base path, so the rewrite is a
        // straight prefix.
        return Ok(RedirectTarget {
            registered: format!("{}/r/{}", issuer.trim_end_matches('/'), raw),
            destination: raw.to_string(),
        });
    }

    Err(AppError::InvalidRequest(format!(
        "redirect_uri must be a subpath of the /r/ endpoint: {}",
        raw
    )))
}

/// WebFinger domain check. Wildcard domain patterns are allowed; a bare `*`
/// is rejected at configuration load. An absent allowlist disables WebFinger.
pub fn webfinger_domain_allowed(config: &Config, domain: &str) -> bool {
    match &config.allowed_webfinger_hosts {
        None => false,
        Some(patterns) => patterns.iter().any(|p| p != "*" && host_matches(p, domain)),
    }
}

/// Minimal `local@domain` syntax check for WebFinger `acct:` resources.
pub fn parse_email(addr: &str) -> Option<(&str, &str)> {
    let (local, domain) = addr.split_once('@')?;
    if local.is_empty() || domain.is_empty() {
        return None;
    }
    if domain.contains('@') || domain.starts_with('.') || domain.ends_with('.') {
        return None;
    }
    if !domain
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return None;
    }
    Some((local, domain))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Provider, RootRedirect};

    fn test_config() -> Config {
        Config {
            provider: Provider::GitHub,
            allowed_hosts: vec!["id.example.com".into(), "*.oidc.example.net".into()],
            allowed_clients: vec!["*".into()],
            base_path: String::new(),
            fix_redirect_uris: false,
            token_lifetime: None,
            root_redirect: RootRedirect::Repo,
            treat_loopback_as_secure: true,
            trust_forwarded_headers: false,
            return_to_referrer: false,
            allowed_webfinger_hosts: Some(vec!["allowed.example".into(), "*.corp.example".into()]),
            keyset: None,
            keyset_file: None,
            data_dir: "data".into(),
            client_secret: None,
            enable_docs: false,
            bind: "0.0.0.0".into(),
            transaction_ttl: std::time::Duration::from_secs(600),
        }
    }

    #[test]
    fn test_host_without_port() {
        assert_eq!(host_without_port("example.com:8443"), "example.com");
        assert_eq!(host_without_port("example.com"), "example.com");
        assert_eq!(host_without_port("[::1]:8080"), "::1");
        assert_eq!(host_without_port("::1"), "::1");
        assert_eq!(host_without_port("127.0.0.1:80"), "127.0.0.1");
    }

    #[test]
    fn test_wildcard_patterns() {
        assert!(host_matches("*.example.com", "a.example.com"));
        assert!(host_matches("*.example.com", "a.b.example.com"));
        assert!(!host_matches("*.example.com", "example.com"));
        assert!(!host_matches("*.example.com", ".example.com"));
        assert!(!host_matches("*.example.com", "aexample.com"));
        assert!(!host_matches("*.example.com", "example.com.evil.io"));
        assert!(host_matches("*", "anything.at.all"));
        assert!(host_matches("id.example.com", "ID.Example.Com"));
    }

    #[test]
    fn test_loopback_always_allowed() {
        let cfg = test_config();
        assert!(host_allowed(&cfg, "localhost:3000"));
        assert!(host_allowed(&cfg, "127.0.0.1"));
        assert!(host_allowed(&cfg, "[::1]:9000"));
        assert!(host_allowed(&cfg, "id.example.com"));
        assert!(host_allowed(&cfg, "deep.oidc.example.net"));
        assert!(!host_allowed(&cfg, "evil.example.org"));
    }

    #[test]
    fn test_scheme_rules() {
        let mut cfg = test_config();
        assert!(scheme_allowed(&cfg, "https", "id.example.com"));
        assert!(!scheme_allowed(&cfg, "http", "id.example.com"));
        assert!(scheme_allowed(&cfg, "http", "localhost:8000"));
        cfg.treat_loopback_as_secure = false;
        assert!(!scheme_allowed(&cfg, "http", "localhost:8000"));
    }

    #[test]
    fn test_redirect_uri_must_target_r() {
        let cfg = test_config();
        let issuer = "https://id.example.com";

        let target = resolve_redirect_uri(
            &cfg,
            issuer,
            "https://id.example.com/r/https://app.example/cb",
        )
        .unwrap();
        assert_eq!(target.destination, "https://app.example/cb");
        assert_eq!(
            target.registered,
            "https://id.example.com/r/https://app.example/cb"
        );

        // Plain RP redirect URI is rejected without FIX_REDIRECT_URIS…
        assert!(resolve_redirect_uri(&cfg, issuer, "https://app.example/cb").is_err());

        // …and /r/ URIs on foreign hosts are never trusted.
        assert!(resolve_redirect_uri(
            &cfg,
            issuer,
            "https://evil.example.org/r/https://app.example/cb"
        )
        .is_err());
    }

    #[test]
    fn test_fix_redirect_uris_rewrites() {
        let mut cfg = test_config();
        cfg.fix_redirect_uris = true;
        let target =
            resolve_redirect_uri(&cfg, "https://id.example.com", "https://app.example/cb")
                .unwrap();
        assert_eq!(
            target.registered,
            "https://id.example.com/r/https://app.example/cb"
        );
        assert_eq!(target.destination, "https://app.example/cb");
    }

    #[test]
    fn test_redirect_destination_keeps_query() {
        let cfg = test_config();
        let target = resolve_redirect_uri(
            &cfg,
            "https://id.example.com",
            "https://id.example.com/r/https://app.example/cb?tenant=t1",
        )
        .unwrap();
        assert_eq!(target.destination, "https://app.example/cb?tenant=t1");
    }

    #[test]
    fn test_webfinger_allowlist() {
        let cfg = test_config();
        assert!(webfinger_domain_allowed(&cfg, "allowed.example"));
        assert!(webfinger_domain_allowed(&cfg, "eng.corp.example"));
        assert!(!webfinger_domain_allowed(&cfg, "other.example"));

        let mut no_list = test_config();
        no_list.allowed_webfinger_hosts = None;
        assert!(!webfinger_domain_allowed(&no_list, "allowed.example"));
    }

    #[test]
    fn test_parse_email() {
        assert_eq!(
            parse_email("alice@allowed.example"),
            Some(("alice", "allowed.example"))
        );
        assert!(parse_email("alice").is_none());
        assert!(parse_email("@allowed.example").is_none());
        assert!(parse_email("alice@").is_none());
        assert!(parse_email("a@b@c").is_none());
    }
}
