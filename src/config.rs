use std::path::PathBuf;
use std::time::Duration;

/// Upstream identity provider personality.
///
/// Takagi fronts GitHub; the same binary running as Snowflake fronts Discord.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    GitHub,
    Discord,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GitHub => "github",
            Provider::Discord => "discord",
        }
    }

    /// Where `/` sends the browser for `ROOT_REDIRECT=repo`.
    pub fn repo_url(&self) -> &'static str {
        match self {
            Provider::GitHub => "https://github.com/celsiusnarhwal/takagi",
            Provider::Discord => "https://github.com/celsiusnarhwal/snowflake",
        }
    }

    /// Where `/` sends the browser for `ROOT_REDIRECT=settings`.
    pub fn settings_url(&self) -> &'static str {
        match self {
            Provider::GitHub => "https://github.com/settings/developers",
            Provider::Discord => "https://discord.com/developers/applications",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootRedirect {
    Repo,
    Settings,
    Docs,
    Off,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub provider: Provider,
    /// Host-header allowlist. Loopback hosts are always accepted on top of this.
    pub allowed_hosts: Vec<String>,
    /// Client-ID allowlist for `/authorize`; `*` admits any client.
    pub allowed_clients: Vec<String>,
    /// URL prefix the service is mounted under. Normalized: `""` for root,
    /// otherwise `/prefix` with no trailing slash.
    pub base_path: String,
    pub fix_redirect_uris: bool,
    /// Token TTL. `None` means tokens effectively never expire.
    pub token_lifetime: Option<Duration>,
    pub root_redirect: RootRedirect,
    pub treat_loopback_as_secure: bool,
    /// Honor `X-Forwarded-Proto` / `X-Forwarded-Host`. Only safe when a
    /// trusted reverse proxy is the sole path to this process; anyone who
    /// can reach it directly could otherwise forge an allowed host and an
    /// HTTPS scheme.
    pub trust_forwarded_headers: bool,
    pub return_to_referrer: bool,
    /// WebFinger domain allowlist. `None` disables WebFinger entirely.
    pub allowed_webfinger_hosts: Option<Vec<String>>,
    /// Inline JWK Set JSON. Mutually exclusive with `keyset_file`.
    pub keyset: Option<String>,
    pub keyset_file: Option<PathBuf>,
    /// Directory holding the managed keyset when no external keyset is given.
    pub data_dir: PathBuf,
    /// Upstream OAuth application client secret. Used for the callback code
    /// exchange and, when set, to authenticate `/token` clients.
    pub client_secret: Option<String>,
    pub enable_docs: bool,
    pub bind: String,
    /// Authorization transaction / code TTL.
    pub transaction_ttl: Duration,
}

/// Read an environment variable under the Takagi prefix, falling back to the
/// Snowflake prefix so either persona's deployment docs work unchanged.
fn env_any(name: &str) -> Option<String> {
    std::env::var(format!("TAKAGI_{}", name))
        .or_else(|_| std::env::var(format!("SNOWFLAKE_{}", name)))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_bool(name: &str, default: bool) -> anyhow::Result<bool> {
    match env_any(name) {
        None => Ok(default),
        Some(v) => match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => anyhow::bail!("{} must be a boolean, got {:?}", name, other),
        },
    }
}

fn env_list(name: &str) -> Option<Vec<String>> {
    env_any(name).map(|v| {
        v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let provider = match env_any("PROVIDER").as_deref() {
        None | Some("github") => Provider::GitHub,
        Some("discord") => Provider::Discord,
        Some(other) => anyhow::bail!("unknown provider {:?} (expected github or discord)", other),
    };

    let allowed_hosts = env_list("ALLOWED_HOSTS")
        .unwrap_or_else(|| vec!["localhost".into(), "127.0.0.1".into(), "::1".into()]);
    // Only a literal "*" opens the service to any host; wildcard domains
    // like *.example.com are scoped and get no warning.
    if allowed_hosts.iter().any(|h| h == "*") {
        tracing::warn!("ALLOWED_HOSTS contains \"*\"; any Host header will be accepted");
    }

    let allowed_clients = env_list("ALLOWED_CLIENTS").unwrap_or_else(|| vec!["*".into()]);

    let base_path = normalize_base_path(env_any("BASE_PATH").as_deref().unwrap_or("/"));

    let token_lifetime = match env_any("TOKEN_LIFETIME") {
        None => None,
        Some(raw) => {
            let d = parse_duration(&raw)?;
            if d < Duration::from_secs(60) {
                anyhow::bail!("TOKEN_LIFETIME must be at least 60s, got {:?}", raw);
            }
            Some(d)
        }
    };

    let transaction_ttl = match env_any("TRANSACTION_TTL") {
        None => Duration::from_secs(600),
        Some(raw) => {
            let d = parse_duration(&raw)?;
            if d < Duration::from_secs(600) {
                anyhow::bail!("TRANSACTION_TTL must be at least 10m, got {:?}", raw);
            }
            d
        }
    };

    let mut enable_docs = env_bool("ENABLE_DOCS", false)?;
    let root_redirect = match env_any("ROOT_REDIRECT").as_deref() {
        None | Some("repo") => RootRedirect::Repo,
        Some("settings") => RootRedirect::Settings,
        Some("docs") => {
            // Redirecting to docs implies serving them.
            enable_docs = true;
            RootRedirect::Docs
        }
        Some("off") => RootRedirect::Off,
        Some(other) => anyhow::bail!(
            "unknown ROOT_REDIRECT {:?} (expected repo, settings, docs, or off)",
            other
        ),
    };

    let allowed_webfinger_hosts = env_list("ALLOWED_WEBFINGER_HOSTS");
    if let Some(hosts) = &allowed_webfinger_hosts {
        if hosts.iter().any(|h| h == "*") {
            anyhow::bail!("ALLOWED_WEBFINGER_HOSTS must not contain a bare \"*\"");
        }
    }

    let keyset = env_any("KEYSET");
    let keyset_file = env_any("KEYSET_FILE").map(PathBuf::from);
    if keyset.is_some() && keyset_file.is_some() {
        anyhow::bail!("KEYSET and KEYSET_FILE are mutually exclusive; set at most one");
    }

    Ok(Config {
        provider,
        allowed_hosts,
        allowed_clients,
        base_path,
        fix_redirect_uris: env_bool("FIX_REDIRECT_URIS", false)?,
        token_lifetime,
        root_redirect,
        treat_loopback_as_secure: env_bool("TREAT_LOOPBACK_AS_SECURE", true)?,
        trust_forwarded_headers: env_bool("TRUST_FORWARDED_HEADERS", false)?,
        return_to_referrer: env_bool("RETURN_TO_REFERRER", false)?,
        allowed_webfinger_hosts,
        keyset,
        keyset_file,
        data_dir: env_any("DATA_DIR").map(PathBuf::from).unwrap_or_else(|| "data".into()),
        client_secret: env_any("CLIENT_SECRET"),
        enable_docs,
        bind: env_any("BIND").unwrap_or_else(|| "0.0.0.0".into()),
        transaction_ttl,
    })
}

fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Parse a duration like `90s`, `15m`, `12h`, `7d`, `2w`, `1mm` (30 days) or
/// `1y`. Segments may be concatenated (`1h30m`).
pub fn parse_duration(raw: &str) -> anyhow::Result<Duration> {
    let s = raw.trim();
    if s.is_empty() {
        anyhow::bail!("empty duration");
    }

    let mut total: u64 = 0;
    let mut chars = s.chars().peekable();
    while chars.peek().is_some() {
        let mut digits = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_digit() {
                digits.push(*c);
                chars.next();
            } else {
                break;
            }
        }
        let mut unit = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_alphabetic() {
                unit.push(*c);
                chars.next();
            } else {
                break;
            }
        }
        if digits.is_empty() || unit.is_empty() {
            anyhow::bail!("invalid duration {:?}", raw);
        }
        let value: u64 = digits.parse()?;
        let mult = match unit.as_str() {
            "s" => 1,
            "m" => 60,
            "h" => 3600,
            "d" => 86_400,
            "w" => 7 * 86_400,
            "mm" => 30 * 86_400,
            "y" => 365 * 86_400,
            other => anyhow::bail!("unknown duration unit {:?} in {:?}", other, raw),
        };
        total = total
            .checked_add(value.checked_mul(mult).ok_or_else(|| {
                anyhow::anyhow!("duration overflow in {:?}", raw)
            })?)
            .ok_or_else(|| anyhow::anyhow!("duration overflow in {:?}", raw))?;
    }

    Ok(Duration::from_secs(total))
}
