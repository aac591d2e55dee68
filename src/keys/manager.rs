//! Keyset sources, persistence, and rotation.
//!
//! Three sources, in priority order: the `KEYSET` env var (inline JSON), a
//! `KEYSET_FILE` path, or a managed file under the data directory that is
//! created on first startup. Externally-supplied keysets are never written
//! back; only the managed file can be rotated.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::config::Config;

use super::jwk::JwkSet;
use super::keyset::{generate_jwks, Keyset};

pub const MANAGED_KEYSET_FILE: &str = "keyset.json";

#[derive(Debug, Clone, PartialEq, Eq)]
enum KeysetSource {
    /// Supplied via env or file; read-only.
    External,
    /// Owned by this service at the given path.
    Managed(PathBuf),
}

pub struct KeysetManager {
    source: KeysetSource,
    current: RwLock<Arc<Keyset>>,
}

impl KeysetManager {
    /// Resolve the keyset source from configuration, loading or creating the
    /// keys. Any shape problem is fatal here, before the server binds.
    pub fn initialize(config: &Config) -> anyhow::Result<Self> {
        match (&config.keyset, &config.keyset_file) {
            (Some(_), Some(_)) => {
                // Config load rejects this too; kept as a guard for direct
                // construction in tests.
                anyhow::bail!("KEYSET and KEYSET_FILE are mutually exclusive")
            }
            (Some(json), None) => {
                let jwks: JwkSet = serde_json::from_str(json)
                    .map_err(|e| anyhow::anyhow!("KEYSET is not valid JWK Set JSON: {}", e))?;
                Ok(Self::external(jwks)?)
            }
            (None, Some(path)) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    anyhow::anyhow!("failed to read KEYSET_FILE {}: {}", path.display(), e)
                })?;
                let jwks: JwkSet = serde_json::from_str(&raw).map_err(|e| {
                    anyhow::anyhow!("{} is not valid JWK Set JSON: {}", path.display(), e)
                })?;
                Ok(Self::external(jwks)?)
            }
            (None, None) => {
                let path = config.data_dir.join(MANAGED_KEYSET_FILE);
                let jwks = if path.exists() {
                    let raw = std::fs::read_to_string(&path)?;
                    serde_json::from_str(&raw).map_err(|e| {
                        anyhow::anyhow!(
                            "managed keyset {} is corrupt: {}",
                            path.display(),
                            e
                        )
                    })?
                } else {
                    tracing::info!(path = %path.display(), "no keyset found, generating one");
                    let jwks = generate_jwks()?;
                    persist(&path, &jwks)?;
                    jwks
                };
                let keyset = Keyset::from_jwks(&jwks)?;
                Ok(Self {
                    source: KeysetSource::Managed(path),
                    current: RwLock::new(Arc::new(keyset)),
                })
            }
        }
    }

    fn external(jwks: JwkSet) -> anyhow::Result<Self> {
        let keyset = Keyset::from_jwks(&jwks)?;
        Ok(Self {
            source: KeysetSource::External,
            current: RwLock::new(Arc::new(keyset)),
        })
    }

    /// Current keyset snapshot. Callers hold the `Arc` across their whole
    /// operation so a concurrent rotation cannot mix generations.
    pub fn snapshot(&self) -> Arc<Keyset> {
        self.current.read().expect("keyset lock poisoned").clone()
    }

    /// Replace the managed keyset with a fresh one. Every token issued under
    /// the old keys stops verifying immediately.
    pub fn rotate(&self) -> anyhow::Result<()> {
        let path = match &self.source {
            KeysetSource::Managed(path) => path.clone(),
            KeysetSource::External => {
                anyhow::bail!("cannot rotate an externally-supplied keyset")
            }
        };

        let jwks = generate_jwks()?;
        let keyset = Keyset::from_jwks(&jwks)?;
        persist(&path, &jwks)?;

        let mut current = self.current.write().expect("keyset lock poisoned");
        *current = Arc::new(keyset);
        tracing::info!(path = %path.display(), "keyset rotated");
        Ok(())
    }
}

/// Rotate the managed keyset on disk without a running server (the `rotate`
/// CLI command). Fails when the deployment uses an external keyset.
pub fn rotate_managed(config: &Config) -> anyhow::Result<PathBuf> {
    if config.keyset.is_some() || config.keyset_file.is_some() {
        anyhow::bail!("cannot rotate: this deployment uses an externally-supplied keyset");
    }
    let path = config.data_dir.join(MANAGED_KEYSET_FILE);
    let jwks = generate_jwks()?;
    persist(&path, &jwks)?;
    Ok(path)
}

/// Write the keyset atomically: temp file in the same directory, then rename
/// over the target. A crash mid-write leaves either the old keyset or none.
fn persist(path: &Path, jwks: &JwkSet) -> anyhow::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let tmp = dir.join(format!(".{}.tmp", MANAGED_KEYSET_FILE));
    let json = serde_json::to_string_pretty(jwks)?;
    std::fs::write(&tmp, &json)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&tmp, path)?;
    Ok(())
}
