//! Per-`kid` key resolution for issuers that distribute verification keys
//! via a JWKS endpoint rather than a single static key.

use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use thiserror::Error;

/// Errors raised while resolving a `kid` to a [`DecodingKey`].
#[derive(Debug, Error)]
pub enum JwksError {
    /// The JWKS document contained no key matching the requested `kid`.
    #[error("no jwks key found for kid {0:?}")]
    UnknownKid(String),
    /// Fetching the JWKS document failed.
    #[error("jwks fetch failed: {0}")]
    Fetch(String),
    /// The JWKS document or a key within it could not be parsed into a
    /// usable [`DecodingKey`].
    #[error("jwks key malformed: {0}")]
    Malformed(String),
}

/// Resolves a JWS header's `kid` to the [`DecodingKey`] that should verify
/// it. Implementations own fetching and caching the backing JWKS document.
#[async_trait]
pub trait JwksResolver: Send + Sync {
    /// Looks up the decoding key for `kid`.
    ///
    /// # Errors
    ///
    /// Returns [`JwksError`] if the key cannot be fetched, parsed, or found.
    async fn resolve(&self, kid: &str) -> Result<DecodingKey, JwksError>;
}
