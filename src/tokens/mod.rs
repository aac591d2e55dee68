//! Token service: claim model and JWS/JWE token minting and verification.

pub mod claims;
pub mod service;

pub use claims::{
    project, AccessTokenClaims, IdTokenClaims, ProfileClaims, RefreshTokenClaims, Scope,
    ScopeSet, UserIdentity, MAX_EXPIRY_UNIX,
};
pub use service::{BearerError, MintParams, TokenBundle, TokenService};
