//! Runtime keyset: RS256 signing/verification and compact-JWE encryption.
//!
//! The signing half drives `jsonwebtoken`; the encryption half implements the
//! one JWE shape this service uses (`alg=dir`, `enc=A256GCM`, five-segment
//! compact serialization with an empty encrypted-key segment).

use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation};
use rand::RngCore;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::jwk::{oct_thumbprint, rsa_thumbprint, Jwk, JwkSet, ENC_ALG, SIG_ALG};
use super::KeyError;

const RSA_BITS: usize = 2048;
const JWE_IV_LEN: usize = 12;
const JWE_TAG_LEN: usize = 16;

pub struct SigningKey {
    pub kid: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
    public: Jwk,
}

pub struct EncryptionKey {
    pub kid: String,
    key: [u8; 32],
}

/// One coherent generation of keys. Rotation swaps the whole value, so a
/// verification never mixes a signing key from one generation with an
/// encryption key from another.
pub struct Keyset {
    pub signing: SigningKey,
    pub encryption: EncryptionKey,
}

impl std::fmt::Debug for Keyset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyset")
            .field("signing_kid", &self.signing.kid)
            .field("encryption_kid", &self.encryption.kid)
            .finish()
    }
}

fn b64_biguint(v: &BigUint) -> String {
    URL_SAFE_NO_PAD.encode(v.to_bytes_be())
}

fn biguint_from_b64(field: &str, v: &str) -> anyhow::Result<BigUint> {
    let bytes = URL_SAFE_NO_PAD
        .decode(v)
        .map_err(|_| anyhow::anyhow!("JWK field {} is not valid base64url", field))?;
    Ok(BigUint::from_bytes_be(&bytes))
}

impl Keyset {
    /// Build a runtime keyset from a validated JWK Set.
    pub fn from_jwks(jwks: &JwkSet) -> anyhow::Result<Self> {
        let (sig, enc) = jwks.validate()?;

        let n = biguint_from_b64("n", sig.n.as_deref().unwrap())?;
        let e = biguint_from_b64("e", sig.e.as_deref().unwrap())?;
        let d = biguint_from_b64("d", sig.d.as_deref().unwrap())?;
        let p = biguint_from_b64("p", sig.p.as_deref().unwrap())?;
        let q = biguint_from_b64("q", sig.q.as_deref().unwrap())?;

        let mut private = RsaPrivateKey::from_components(n, e, d, vec![p, q])
            .map_err(|e| anyhow::anyhow!("invalid RSA signing key: {}", e))?;
        private
            .precompute()
            .map_err(|e| anyhow::anyhow!("invalid RSA signing key: {}", e))?;
        private
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid RSA signing key: {}", e))?;

        let pem = private
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .map_err(|e| anyhow::anyhow!("failed to encode RSA signing key: {}", e))?;
        let encoding = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("failed to load RSA signing key: {}", e))?;
        let decoding = DecodingKey::from_rsa_components(
            sig.n.as_deref().unwrap(),
            sig.e.as_deref().unwrap(),
        )
        .map_err(|e| anyhow::anyhow!("failed to load RSA verification key: {}", e))?;

        let k_bytes = URL_SAFE_NO_PAD
            .decode(enc.k.as_deref().unwrap())
            .expect("validated above");
        let mut key = [0u8; 32];
        key.copy_from_slice(&k_bytes);

        Ok(Keyset {
            signing: SigningKey {
                kid: sig.kid.clone(),
                encoding,
                decoding,
                public: sig.public_only(),
            },
            encryption: EncryptionKey {
                kid: enc.kid.clone(),
                key,
            },
        })
    }

    /// Public half of the keyset: the RSA verification key only. The
    /// encryption key never leaves the process.
    pub fn public_jwks(&self) -> JwkSet {
        JwkSet {
            keys: vec![self.signing.public.clone()],
        }
    }

    /// Sign a claims object as a compact JWS with the signing `kid` header.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, KeyError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.signing.kid.clone());
        Ok(jsonwebtoken::encode(&header, claims, &self.signing.encoding)?)
    }

    /// Verify a compact JWS against this keyset.
    ///
    /// The caller supplies the `Validation` (audience, issuer, expiry rules
    /// differ per endpoint); the `kid` header must reference the current
    /// signing key; anything else was signed by a rotated-away or foreign
    /// key.
    pub fn verify<T: DeserializeOwned>(
        &self,
        token: &str,
        validation: &Validation,
    ) -> Result<TokenData<T>, KeyError> {
        let header = jsonwebtoken::decode_header(token)?;
        match header.kid.as_deref() {
            Some(kid) if kid == self.signing.kid => {}
            _ => return Err(KeyError::UnknownKid),
        }
        Ok(jsonwebtoken::decode::<T>(token, &self.signing.decoding, validation)?)
    }

    /// Encrypt bytes as a compact JWE under the symmetric key.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, KeyError> {
        let header = serde_json::json!({
            "alg": "dir",
            "enc": ENC_ALG,
            "kid": self.encryption.kid,
        });
        let protected = URL_SAFE_NO_PAD.encode(header.to_string());

        let mut iv = [0u8; JWE_IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let cipher = Aes256Gcm::new_from_slice(&self.encryption.key)
            .map_err(|_| KeyError::Encrypt)?;
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: plaintext,
                    aad: protected.as_bytes(),
                },
            )
            .map_err(|_| KeyError::Encrypt)?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - JWE_TAG_LEN);

        // Direct encryption: the encrypted-key segment is empty.
        Ok(format!(
            "{}..{}.{}.{}",
            protected,
            URL_SAFE_NO_PAD.encode(iv),
            URL_SAFE_NO_PAD.encode(ciphertext),
            URL_SAFE_NO_PAD.encode(tag)
        ))
    }

    /// Decrypt a compact JWE produced by `encrypt`.
    pub fn decrypt(&self, compact: &str) -> Result<Vec<u8>, KeyError> {
        let parts: Vec<&str> = compact.split('.').collect();
        if parts.len() != 5 || !parts[1].is_empty() {
            return Err(KeyError::MalformedJwe);
        }

        let header_bytes = URL_SAFE_NO_PAD
            .decode(parts[0])
            .map_err(|_| KeyError::MalformedJwe)?;
        let header: serde_json::Value =
            serde_json::from_slice(&header_bytes).map_err(|_| KeyError::MalformedJwe)?;
        if header.get("alg").and_then(|v| v.as_str()) != Some("dir")
            || header.get("enc").and_then(|v| v.as_str()) != Some(ENC_ALG)
        {
            return Err(KeyError::MalformedJwe);
        }
        if header.get("kid").and_then(|v| v.as_str()) != Some(self.encryption.kid.as_str()) {
            return Err(KeyError::UnknownKid);
        }

        let iv = URL_SAFE_NO_PAD
            .decode(parts[2])
            .map_err(|_| KeyError::MalformedJwe)?;
        let ciphertext = URL_SAFE_NO_PAD
            .decode(parts[3])
            .map_err(|_| KeyError::MalformedJwe)?;
        let tag = URL_SAFE_NO_PAD
            .decode(parts[4])
            .map_err(|_| KeyError::MalformedJwe)?;
        if iv.len() != JWE_IV_LEN || tag.len() != JWE_TAG_LEN {
            return Err(KeyError::MalformedJwe);
        }

        let mut sealed = ciphertext;
        sealed.extend_from_slice(&tag);

        let cipher = Aes256Gcm::new_from_slice(&self.encryption.key)
            .map_err(|_| KeyError::Decrypt)?;
        cipher
            .decrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &sealed,
                    aad: parts[0].as_bytes(),
                },
            )
            .map_err(|_| KeyError::Decrypt)
    }
}

/// Manufacture a fresh keyset: a 2048-bit RSA signing key and a random
/// 256-bit encryption key, with RFC 7638 thumbprint kids.
pub fn generate_jwks() -> anyhow::Result<JwkSet> {
    let mut rng = rand::rngs::OsRng;
    let mut private = RsaPrivateKey::new(&mut rng, RSA_BITS)
        .map_err(|e| anyhow::anyhow!("RSA key generation failed: {}", e))?;
    private
        .precompute()
        .map_err(|e| anyhow::anyhow!("RSA key generation failed: {}", e))?;

    let n = b64_biguint(private.n());
    let e = b64_biguint(private.e());
    let primes = private.primes();

    let signing = Jwk {
        kty: "RSA".into(),
        key_use: "sig".into(),
        alg: SIG_ALG.into(),
        kid: rsa_thumbprint(&n, &e),
        n: Some(n),
        e: Some(e),
        d: Some(b64_biguint(private.d())),
        p: Some(b64_biguint(&primes[0])),
        q: Some(b64_biguint(&primes[1])),
        // CRT hints travel along when the key has them precomputed;
        // loading recomputes them either way.
        dp: private.dp().map(b64_biguint),
        dq: private.dq().map(b64_biguint),
        qi: private.qinv().and_then(|v| v.to_biguint()).map(|v| b64_biguint(&v)),
        k: None,
    };

    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    let k = URL_SAFE_NO_PAD.encode(key);
    let encryption = Jwk {
        kty: "oct".into(),
        key_use: "enc".into(),
        alg: ENC_ALG.into(),
        kid: oct_thumbprint(&k),
        n: None,
        e: None,
        d: None,
        p: None,
        q: None,
        dp: None,
        dq: None,
        qi: None,
        k: Some(k),
    };

    Ok(JwkSet {
        keys: vec![signing, encryption],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn keyset() -> Keyset {
        Keyset::from_jwks(&generate_jwks().unwrap()).unwrap()
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Claims {
        sub: String,
        exp: i64,
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let ks = keyset();
        let token = ks
            .sign(&Claims {
                sub: "1234".into(),
                exp: 253_402_300_799,
            })
            .unwrap();

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;
        let data: TokenData<Claims> = ks.verify(&token, &validation).unwrap();
        assert_eq!(data.claims.sub, "1234");
    }

    #[test]
    fn test_verify_rejects_foreign_kid() {
        let ks = keyset();
        let other = keyset();
        let token = other
            .sign(&Claims {
                sub: "1234".into(),
                exp: 253_402_300_799,
            })
            .unwrap();

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;
        let err = ks.verify::<Claims>(&token, &validation).unwrap_err();
        assert!(matches!(err, KeyError::UnknownKid));
    }

    #[test]
    fn test_jwe_round_trip() {
        let ks = keyset();
        let sealed = ks.encrypt(b"gho_upstream_token").unwrap();
        assert_eq!(sealed.split('.').count(), 5);
        assert_eq!(ks.decrypt(&sealed).unwrap(), b"gho_upstream_token");
    }

    #[test]
    fn test_jwe_rejects_tampering() {
        let ks = keyset();
        let sealed = ks.encrypt(b"secret").unwrap();
        let mut parts: Vec<String> = sealed.split('.').map(String::from).collect();
        let mut ct = URL_SAFE_NO_PAD.decode(&parts[3]).unwrap();
        ct[0] ^= 0xff;
        parts[3] = URL_SAFE_NO_PAD.encode(ct);
        assert!(ks.decrypt(&parts.join(".")).is_err());
    }

    #[test]
    fn test_jwe_rejects_other_generation() {
        let ks = keyset();
        let rotated = keyset();
        let sealed = ks.encrypt(b"secret").unwrap();
        assert!(rotated.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_public_jwks_has_no_private_material() {
        let ks = keyset();
        let public = ks.public_jwks();
        assert_eq!(public.keys.len(), 1);
        let json = serde_json::to_string(&public).unwrap();
        assert!(!json.contains("\"d\""));
        assert!(!json.contains("\"k\""));
        assert!(json.contains("\"n\""));
    }
}
