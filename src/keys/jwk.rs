//! JWK / JWK Set model and validation.
//!
//! A keyset is exactly two keys: one RSA signing key (`use=sig`, `alg=RS256`)
//! with full private parameters, and one 256-bit symmetric encryption key
//! (`use=enc`, `alg=A256GCM`). Key IDs are RFC 7638 thumbprints.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const SIG_ALG: &str = "RS256";
pub const ENC_ALG: &str = "A256GCM";

#[derive(Clone, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub alg: String,
    pub kid: String,

    // RSA public parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    // RSA private parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dq: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qi: Option<String>,

    // Symmetric key material
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
}

impl Jwk {
    /// Public view of this key: private parameters stripped.
    pub fn public_only(&self) -> Jwk {
        Jwk {
            kty: self.kty.clone(),
            key_use: self.key_use.clone(),
            alg: self.alg.clone(),
            kid: self.kid.clone(),
            n: self.n.clone(),
            e: self.e.clone(),
            d: None,
            p: None,
            q: None,
            dp: None,
            dq: None,
            qi: None,
            k: None,
        }
    }

    pub fn has_full_rsa_private(&self) -> bool {
        self.n.is_some()
            && self.e.is_some()
            && self.d.is_some()
            && self.p.is_some()
            && self.q.is_some()
    }
}

// Key material must never reach logs.
impl std::fmt::Debug for Jwk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jwk")
            .field("kty", &self.kty)
            .field("use", &self.key_use)
            .field("alg", &self.alg)
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Validate the keyset shape and return `(signing, encryption)`.
    ///
    /// Applied to externally-supplied keysets as well as managed ones, so a
    /// corrupted keyset file is caught at startup rather than at first use.
    pub fn validate(&self) -> anyhow::Result<(&Jwk, &Jwk)> {
        let sig: Vec<&Jwk> = self.keys.iter().filter(|k| k.key_use == "sig").collect();
        let enc: Vec<&Jwk> = self.keys.iter().filter(|k| k.key_use == "enc").collect();

        if sig.len() != 1 {
            anyhow::bail!("keyset must contain exactly one signing key, found {}", sig.len());
        }
        if enc.len() != 1 {
            anyhow::bail!(
                "keyset must contain exactly one encryption key, found {}",
                enc.len()
            );
        }

        let sig = sig[0];
        if sig.kty != "RSA" || sig.alg != SIG_ALG {
            anyhow::bail!("signing key must be kty=RSA alg={}", SIG_ALG);
        }
        if !sig.has_full_rsa_private() {
            anyhow::bail!("signing key is missing private RSA parameters");
        }
        if sig.kid.is_empty() {
            anyhow::bail!("signing key has an empty kid");
        }

        let enc = enc[0];
        if enc.kty != "oct" || enc.alg != ENC_ALG {
            anyhow::bail!("encryption key must be kty=oct alg={}", ENC_ALG);
        }
        if enc.kid.is_empty() {
            anyhow::bail!("encryption key has an empty kid");
        }
        let k = enc
            .k
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("encryption key is missing the k parameter"))?;
        let decoded = URL_SAFE_NO_PAD
            .decode(k)
            .map_err(|_| anyhow::anyhow!("encryption key k is not valid base64url"))?;
        if decoded.len() != 32 {
            anyhow::bail!(
                "encryption key must decode to 32 bytes, got {}",
                decoded.len()
            );
        }

        Ok((sig, enc))
    }
}

/// RFC 7638 thumbprint of an RSA public key (required members in lexical
/// order, no whitespace).
pub fn rsa_thumbprint(n: &str, e: &str) -> String {
    let canonical = format!(r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#, e, n);
    URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
}

/// RFC 7638 thumbprint of a symmetric key.
pub fn oct_thumbprint(k: &str) -> String {
    let canonical = format!(r#"{{"k":"{}","kty":"oct"}}"#, k);
    URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
}
