// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Compact-JWS receipt generation, verification, and JTI replay protection."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Produces and verifies compact-JWS receipts under a strict allow-list
//! algorithm and claim policy, and maintains the JTI replay cache described
//! in the receipt-service contract.

mod jwks;
mod replay;

pub use jwks::{JwksError, JwksResolver};
pub use replay::{InMemoryReplayStore, ReplayStore};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use par_core::{ReceiptClaims, StatusRef};
use rand::RngCore;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// The only signing algorithm this service will generate or accept.
pub const ALLOWED_ALGORITHM: Algorithm = Algorithm::ES256;

/// Default validity window applied by [`generate`] when the caller does not
/// override it: issued one year before expiry.
pub const DEFAULT_EXPIRES_IN: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Default not-before backdate applied by [`generate`].
pub const DEFAULT_NOT_BEFORE: Duration = Duration::from_secs(0);

/// Acceptable clock skew applied during [`verify`].
pub const CLOCK_SKEW: Duration = Duration::from_secs(60);

/// How long a verified `jti` is retained in the replay cache.
pub const REPLAY_TTL: Duration = Duration::from_secs(10 * 60);

/// Errors raised while generating a receipt.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// The underlying JOSE library failed to sign the claims.
    #[error("failed to sign receipt: {0}")]
    Sign(#[from] jsonwebtoken::errors::Error),
}

/// The caller-supplied inputs bound into a freshly generated receipt.
#[derive(Debug, Clone)]
pub struct GenerateInput {
    /// base64url(sha256(proof bytes)).
    pub proof_digest: String,
    /// The asset's policy hash.
    pub policy_hash: String,
    /// The asset's constraint hash.
    pub constraint_hash: String,
    /// The status-list slot this receipt is bound to.
    pub status_ref: StatusRef,
    /// Required audience.
    pub audience: String,
    /// Optional verifier DID.
    pub issuer: Option<String>,
    /// Optional bound asset id.
    pub subject: Option<String>,
    /// Optional anti-replay nonce.
    pub nonce: Option<String>,
    /// Not-before backdate; defaults to [`DEFAULT_NOT_BEFORE`] if `None`.
    pub not_before: Option<Duration>,
    /// Validity duration; defaults to [`DEFAULT_EXPIRES_IN`] if `None`.
    pub expires_in: Option<Duration>,
}

/// Generates a random 128-bit `jti`, hex-encoded.
fn random_jti() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Signs `input` into a compact-JWS receipt using `signing_key`, with
/// protected header `{alg: ES256, typ: "JWT", kid}`.
///
/// # Errors
///
/// Returns [`GenerateError::Sign`] if signing fails.
pub fn generate(
    signing_key: &EncodingKey,
    kid: &str,
    input: GenerateInput,
) -> Result<String, GenerateError> {
    let mut header = Header::new(ALLOWED_ALGORITHM);
    header.kid = Some(kid.to_string());
    header.typ = Some("JWT".to_string());

    let now = Utc::now();
    let not_before = input.not_before.unwrap_or(DEFAULT_NOT_BEFORE);
    let expires_in = input.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);

    let claims = ReceiptClaims {
        proof_digest: input.proof_digest,
        policy_hash: input.policy_hash,
        constraint_hash: input.constraint_hash,
        status_ref: input.status_ref,
        jti: random_jti(),
        aud: input.audience,
        iat: now.timestamp(),
        nbf: (now - chrono_from_std(not_before)).timestamp(),
        exp: (now + chrono_from_std(expires_in)).timestamp(),
        iss: input.issuer,
        sub: input.subject,
        nonce: input.nonce,
    };

    Ok(jsonwebtoken::encode(&header, &claims, signing_key)?)
}

fn chrono_from_std(d: Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or(ChronoDuration::zero())
}

/// Why a [`verify`] call did not produce a successful verdict.
///
/// `Display` renders the stable reason strings used by both tests and HTTP
/// problem-detail responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The token was not three base64url segments joined by `.`.
    InvalidJwtFormat,
    /// The header's `alg` was not in the allow-list (including `none`).
    AlgorithmNotAllowed,
    /// The header's `typ` was present and not `"JWT"`.
    InvalidTyp,
    /// The header carried a non-empty `crit` member.
    UnsupportedCritHeaders,
    /// Signature verification failed.
    SignatureInvalid,
    /// A required claim was absent or `null`.
    MissingOrNullClaim(&'static str),
    /// `aud` did not equal the expected audience.
    AudienceMismatch,
    /// `now < nbf - skew`.
    TokenNotYetValid,
    /// `now > exp + skew`.
    TokenExpired,
    /// The `jti` had already been consumed within its TTL window.
    ReplayDetected,
    /// `nonce` did not equal the expected nonce.
    NonceMismatch,
    /// The verifying key could not be resolved (JWKS fetch failure, unknown
    /// `kid`, or a header with no `kid` against a JWKS key source).
    KeyUnresolved,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidJwtFormat => write!(f, "invalid_jwt_format"),
            Self::AlgorithmNotAllowed => write!(f, "algorithm_not_allowed"),
            Self::InvalidTyp => write!(f, "invalid_typ"),
            Self::UnsupportedCritHeaders => write!(f, "unsupported_crit_headers"),
            Self::SignatureInvalid => write!(f, "signature_invalid"),
            Self::MissingOrNullClaim(name) => write!(f, "missing_or_null_claim_{name}"),
            Self::AudienceMismatch => write!(f, "audience_mismatch"),
            Self::TokenNotYetValid => write!(f, "token_not_yet_valid"),
            Self::TokenExpired => write!(f, "token_expired"),
            Self::ReplayDetected => write!(f, "replay_detected"),
            Self::NonceMismatch => write!(f, "nonce_mismatch"),
            Self::KeyUnresolved => write!(f, "key_unresolved"),
        }
    }
}

impl std::error::Error for Rejection {}

/// A successful verification result.
#[derive(Debug, Clone)]
pub struct Verified {
    /// The decoded, fully-typed claim set.
    pub claims: ReceiptClaims,
    /// The protected header's `kid`, if present.
    pub header_kid: Option<String>,
    /// The protected header's `alg`, as a string.
    pub header_alg: String,
}

/// Where [`verify`] resolves the verifying key from.
pub enum KeySource<'a> {
    /// A single static key, used regardless of the token's `kid`.
    Static(&'a DecodingKey),
    /// Resolved per-`kid` through a [`JwksResolver`], for issuers that
    /// distribute key material via a JWKS endpoint.
    Jwks(&'a dyn JwksResolver),
}

/// Inputs to [`verify`].
pub struct VerifyParams<'a> {
    /// Where to resolve the verifying key from.
    pub key_source: KeySource<'a>,
    /// The audience every receipt must carry.
    pub expected_audience: &'a str,
    /// An optional nonce the receipt's `nonce` claim must match.
    pub expected_nonce: Option<&'a str>,
    /// Overrides "now" for deterministic tests; defaults to [`Utc::now`].
    pub clock_now: Option<DateTime<Utc>>,
}

const REQUIRED_CLAIMS: &[&str] = &[
    "proof_digest",
    "policy_hash",
    "constraint_hash",
    "status_ref",
    "jti",
    "aud",
    "exp",
    "nbf",
];

fn decode_segment(segment: &str) -> Result<Value, Rejection> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(segment.as_bytes())
        .map_err(|_| Rejection::InvalidJwtFormat)?;
    serde_json::from_slice(&bytes).map_err(|_| Rejection::InvalidJwtFormat)
}

/// Verifies a compact-JWS receipt, in order: header shape, signature,
/// required claims, audience, time bounds, replay, and optional nonce.
///
/// # Errors
///
/// Returns `Ok(Err(reason))` (not a Rust `Err`) for every rejection that is
/// a normal verification outcome; a Rust-level `Err` is never produced by
/// this function today; it returns `Rejection` values directly in an `Ok`
/// wrapper via [`Result<Verified, Rejection>`] for ergonomic `?`-based
/// caller code.
pub async fn verify(
    compact_jws: &str,
    params: VerifyParams<'_>,
    replay: &dyn ReplayStore,
) -> Result<Verified, Rejection> {
    let parts: Vec<&str> = compact_jws.split('.').collect();
    if parts.len() != 3 {
        return Err(Rejection::InvalidJwtFormat);
    }

    let header_json = decode_segment(parts[0])?;
    let alg = header_json
        .get("alg")
        .and_then(Value::as_str)
        .ok_or(Rejection::InvalidJwtFormat)?;
    if alg != "ES256" {
        return Err(Rejection::AlgorithmNotAllowed);
    }
    if let Some(typ) = header_json.get("typ").and_then(Value::as_str) {
        if typ != "JWT" {
            return Err(Rejection::InvalidTyp);
        }
    }
    if header_json
        .get("crit")
        .map(|v| !matches!(v, Value::Array(a) if a.is_empty()))
        .unwrap_or(false)
    {
        return Err(Rejection::UnsupportedCritHeaders);
    }

    let mut validation = Validation::new(ALLOWED_ALGORITHM);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let decoding_key = match params.key_source {
        KeySource::Static(key) => key.clone(),
        KeySource::Jwks(resolver) => {
            let kid = header_json
                .get("kid")
                .and_then(Value::as_str)
                .ok_or(Rejection::KeyUnresolved)?;
            resolver.resolve(kid).await.map_err(|_| Rejection::KeyUnresolved)?
        }
    };

    let token_data = jsonwebtoken::decode::<Value>(compact_jws, &decoding_key, &validation)
        .map_err(|_| Rejection::SignatureInvalid)?;
    let claims_json = token_data.claims;

    for name in REQUIRED_CLAIMS {
        match claims_json.get(*name) {
            None | Some(Value::Null) => return Err(Rejection::MissingOrNullClaim(name)),
            _ => {}
        }
    }

    let claims: ReceiptClaims =
        serde_json::from_value(claims_json).map_err(|_| Rejection::InvalidJwtFormat)?;

    if claims.aud != params.expected_audience {
        return Err(Rejection::AudienceMismatch);
    }

    let now = params.clock_now.unwrap_or_else(Utc::now).timestamp();
    let skew = CLOCK_SKEW.as_secs() as i64;
    if now < claims.nbf - skew {
        return Err(Rejection::TokenNotYetValid);
    }
    if now > claims.exp + skew {
        return Err(Rejection::TokenExpired);
    }

    if !replay.try_insert(&claims.jti, REPLAY_TTL).await {
        return Err(Rejection::ReplayDetected);
    }

    if let Some(expected_nonce) = params.expected_nonce {
        if claims.nonce.as_deref() != Some(expected_nonce) {
            return Err(Rejection::NonceMismatch);
        }
    }

    Ok(Verified {
        claims,
        header_kid: header_json
            .get("kid")
            .and_then(Value::as_str)
            .map(str::to_string),
        header_alg: alg.to_string(),
    })
}
