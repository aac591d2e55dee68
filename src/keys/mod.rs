//! Cryptographic keyset layer: JWK model, RS256 signing, A256GCM encryption,
//! persistence, and rotation.

pub mod jwk;
pub mod keyset;
pub mod manager;

pub use jwk::{Jwk, JwkSet};
pub use keyset::{generate_jwks, Keyset};
pub use manager::{rotate_managed, KeysetManager};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    /// The token's `kid` header does not reference the current signing key:
    /// either foreign material or something minted before a rotation.
    #[error("unknown key id")]
    UnknownKid,

    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("malformed JWE")]
    MalformedJwe,

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed")]
    Decrypt,
}
