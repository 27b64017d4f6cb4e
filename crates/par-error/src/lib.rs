// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable error codes for the Proof-Asset Registry.
//!
//! Every registry error carries an [`ErrorCode`] (a machine-readable, stable
//! string tag), a human-readable message, an optional cause chain, and
//! arbitrary key-value context. Use the builder returned by [`ParError::new`]
//! to construct errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
///
/// Handlers map category to an HTTP status class rather than matching every
/// [`ErrorCode`] individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Request body or field validation failures (400).
    Validation,
    /// Missing credential or insufficient scope (401/403).
    Auth,
    /// Requested resource does not exist (404).
    NotFound,
    /// Signature, receipt, or proof verification failures (400).
    Crypto,
    /// An authoritative collaborator could not be consulted in time; the
    /// verdict must fail closed (503).
    Unavailable,
    /// Optimistic-concurrency or uniqueness conflicts (409).
    Conflict,
    /// Resource limits exceeded (413/504).
    Resource,
    /// Catch-all for unexpected internal errors (500).
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Auth => "auth",
            Self::NotFound => "not_found",
            Self::Crypto => "crypto",
            Self::Unavailable => "unavailable",
            Self::Conflict => "conflict",
            Self::Resource => "resource",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases; these are the `code`
/// values surfaced in RFC 7807 problem responses and receipt verification
/// reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Validation --
    /// `proofDigest` does not match the expected encoding for `digestAlg`.
    InvalidDigest,
    /// General request validation failure.
    ValidationFailed,
    /// A status list URL failed to parse or normalize.
    InvalidStatusUrl,
    /// A CID failed to parse.
    InvalidCid,

    // -- Auth --
    /// No credential, or the credential could not be authenticated.
    Unauthorized,
    /// Credential authenticated but lacks the required scope.
    Forbidden,

    // -- Not found --
    /// No `ProofAsset` exists with the given id.
    AssetNotFound,
    /// No `StatusList` exists at the given URL.
    StatusListNotFound,
    /// The asset has no stored receipt to return.
    NoReceipt,

    // -- Crypto --
    /// Fresh-proof verification failed.
    ProofVerificationFailed,
    /// Receipt verification failed; see the carried reason string.
    ReceiptInvalid,
    /// Fresh-proof dispatcher rejected the bytes.
    FreshProofInvalid,
    /// SRI fetch digest did not match the expected value.
    SriDigestMismatch,
    /// SRI fetch failed for a reason other than a digest mismatch.
    ProofFetchFailed,
    /// Receipt `proof_digest` does not match the asset's stored digest.
    DigestMismatch,
    /// Receipt `policy_hash` does not match the asset's stored policy hash.
    PolicyMismatch,
    /// Receipt `constraint_hash` does not match the asset's stored constraint hash.
    ConstraintMismatch,
    /// Receipt `status_ref` does not match the asset's status-list binding.
    StatusRefMismatch,

    // -- Unavailable / fail-closed --
    /// The status list could not be consulted within bounded staleness.
    StatusUnavailable,

    // -- Conflict --
    /// A status-list update's `If-Match` precondition failed.
    EtagMismatch,
    /// A commitment collided with an already-registered asset.
    CommitmentConflict,

    // -- Resource --
    /// A fetched payload exceeded the configured size cap.
    PayloadTooLarge,
    /// An operation exceeded its deadline.
    Timeout,

    // -- Internal --
    /// Verification pipeline raised an unexpected error.
    VerificationError,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidDigest
            | Self::ValidationFailed
            | Self::InvalidStatusUrl
            | Self::InvalidCid => ErrorCategory::Validation,

            Self::Unauthorized => ErrorCategory::Auth,
            Self::Forbidden => ErrorCategory::Auth,

            Self::AssetNotFound | Self::StatusListNotFound | Self::NoReceipt => {
                ErrorCategory::NotFound
            }

            Self::ProofVerificationFailed
            | Self::ReceiptInvalid
            | Self::FreshProofInvalid
            | Self::SriDigestMismatch
            | Self::ProofFetchFailed
            | Self::DigestMismatch
            | Self::PolicyMismatch
            | Self::ConstraintMismatch
            | Self::StatusRefMismatch => ErrorCategory::Crypto,

            Self::StatusUnavailable => ErrorCategory::Unavailable,

            Self::EtagMismatch | Self::CommitmentConflict => ErrorCategory::Conflict,

            Self::PayloadTooLarge | Self::Timeout => ErrorCategory::Resource,

            Self::VerificationError | Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"STATUS_UNAVAILABLE"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidDigest => "INVALID_DIGEST",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::InvalidStatusUrl => "INVALID_STATUS_URL",
            Self::InvalidCid => "INVALID_CID",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::AssetNotFound => "ASSET_NOT_FOUND",
            Self::StatusListNotFound => "STATUS_LIST_NOT_FOUND",
            Self::NoReceipt => "NO_RECEIPT",
            Self::ProofVerificationFailed => "PROOF_VERIFICATION_FAILED",
            Self::ReceiptInvalid => "RECEIPT_INVALID",
            Self::FreshProofInvalid => "FRESH_PROOF_INVALID",
            Self::SriDigestMismatch => "SRI_DIGEST_MISMATCH",
            Self::ProofFetchFailed => "PROOF_FETCH_FAILED",
            Self::DigestMismatch => "DIGEST_MISMATCH",
            Self::PolicyMismatch => "POLICY_MISMATCH",
            Self::ConstraintMismatch => "CONSTRAINT_MISMATCH",
            Self::StatusRefMismatch => "STATUS_REF_MISMATCH",
            Self::StatusUnavailable => "STATUS_UNAVAILABLE",
            Self::EtagMismatch => "ETAG_MISMATCH",
            Self::CommitmentConflict => "COMMITMENT_CONFLICT",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::Timeout => "TIMEOUT",
            Self::VerificationError => "VERIFICATION_ERROR",
            Self::Internal => "INTERNAL",
        }
    }

    /// The conventional HTTP status class for this code's category.
    pub fn http_status(&self) -> u16 {
        match self.category() {
            ErrorCategory::Validation | ErrorCategory::Crypto => 400,
            ErrorCategory::Auth => match self {
                Self::Forbidden => 403,
                _ => 401,
            },
            ErrorCategory::NotFound => 404,
            ErrorCategory::Conflict => 409,
            ErrorCategory::Resource => match self {
                Self::PayloadTooLarge => 413,
                _ => 504,
            },
            ErrorCategory::Unavailable => 503,
            ErrorCategory::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ParError
// ---------------------------------------------------------------------------

/// Unified registry error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// underlying cause, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use par_error::{ParError, ErrorCode};
///
/// let err = ParError::new(ErrorCode::StatusUnavailable, "status list unreachable")
///     .with_context("url", "https://status.example/list")
///     .with_context("fail_closed", true);
/// ```
pub struct ParError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl ParError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Debug for ParError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("ParError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for ParError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ParError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support (RFC 7807 friendly)
// ---------------------------------------------------------------------------

/// Serialisable snapshot of a [`ParError`] (without the opaque source).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&ParError> for ParErrorDto {
    fn from(err: &ParError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<ParErrorDto> for ParError {
    fn from(dto: ParErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io;

    const ALL_CODES: &[ErrorCode] = &[
        ErrorCode::InvalidDigest,
        ErrorCode::ValidationFailed,
        ErrorCode::InvalidStatusUrl,
        ErrorCode::InvalidCid,
        ErrorCode::Unauthorized,
        ErrorCode::Forbidden,
        ErrorCode::AssetNotFound,
        ErrorCode::StatusListNotFound,
        ErrorCode::NoReceipt,
        ErrorCode::ProofVerificationFailed,
        ErrorCode::ReceiptInvalid,
        ErrorCode::FreshProofInvalid,
        ErrorCode::SriDigestMismatch,
        ErrorCode::ProofFetchFailed,
        ErrorCode::DigestMismatch,
        ErrorCode::PolicyMismatch,
        ErrorCode::ConstraintMismatch,
        ErrorCode::StatusRefMismatch,
        ErrorCode::StatusUnavailable,
        ErrorCode::EtagMismatch,
        ErrorCode::CommitmentConflict,
        ErrorCode::PayloadTooLarge,
        ErrorCode::Timeout,
        ErrorCode::VerificationError,
        ErrorCode::Internal,
    ];

    #[test]
    fn basic_construction() {
        let err = ParError::new(ErrorCode::Internal, "boom");
        assert_eq!(err.code, ErrorCode::Internal);
        assert_eq!(err.message, "boom");
        assert!(err.source.is_none());
        assert!(err.context.is_empty());
    }

    #[test]
    fn display_without_context() {
        let err = ParError::new(ErrorCode::AssetNotFound, "no such asset");
        assert_eq!(err.to_string(), "[ASSET_NOT_FOUND] no such asset");
    }

    #[test]
    fn display_with_context() {
        let err = ParError::new(ErrorCode::StatusUnavailable, "unreachable")
            .with_context("fail_closed", true);
        let s = err.to_string();
        assert!(s.starts_with("[STATUS_UNAVAILABLE] unreachable"));
        assert!(s.contains("fail_closed"));
    }

    #[test]
    fn debug_with_source() {
        let src = io::Error::new(io::ErrorKind::NotFound, "file missing");
        let err = ParError::new(ErrorCode::Internal, "init failed").with_source(src);
        let dbg = format!("{err:?}");
        assert!(dbg.contains("source"));
        assert!(dbg.contains("file missing"));
    }

    #[test]
    fn crypto_codes_categorised() {
        for code in [
            ErrorCode::ProofVerificationFailed,
            ErrorCode::ReceiptInvalid,
            ErrorCode::FreshProofInvalid,
            ErrorCode::SriDigestMismatch,
            ErrorCode::ProofFetchFailed,
            ErrorCode::DigestMismatch,
            ErrorCode::PolicyMismatch,
            ErrorCode::ConstraintMismatch,
            ErrorCode::StatusRefMismatch,
        ] {
            assert_eq!(code.category(), ErrorCategory::Crypto);
        }
    }

    #[test]
    fn status_unavailable_is_503() {
        assert_eq!(ErrorCode::StatusUnavailable.category(), ErrorCategory::Unavailable);
        assert_eq!(ErrorCode::StatusUnavailable.http_status(), 503);
    }

    #[test]
    fn conflict_codes_are_409() {
        assert_eq!(ErrorCode::EtagMismatch.http_status(), 409);
        assert_eq!(ErrorCode::CommitmentConflict.http_status(), 409);
    }

    #[test]
    fn payload_too_large_is_413() {
        assert_eq!(ErrorCode::PayloadTooLarge.http_status(), 413);
    }

    #[test]
    fn all_codes_have_unique_as_str() {
        let mut seen = HashSet::new();
        for code in ALL_CODES {
            let s = code.as_str();
            assert!(seen.insert(s), "duplicate as_str value: {s}");
        }
        assert_eq!(seen.len(), ALL_CODES.len());
    }

    #[test]
    fn all_codes_display_matches_as_str() {
        for code in ALL_CODES {
            assert_eq!(code.to_string(), code.as_str());
        }
    }

    #[test]
    fn all_codes_serialize_to_as_str() {
        for code in ALL_CODES {
            let json = serde_json::to_string(code).unwrap();
            let expected = format!(r#""{}""#, code.as_str());
            assert_eq!(json, expected, "mismatch for {code:?}");
        }
    }

    #[test]
    fn dto_roundtrip_with_source() {
        let src = io::Error::new(io::ErrorKind::BrokenPipe, "pipe broke");
        let err = ParError::new(ErrorCode::Internal, "crash").with_source(src);
        let dto: ParErrorDto = (&err).into();
        assert_eq!(dto.source_message.as_deref(), Some("pipe broke"));
        let json = serde_json::to_string(&dto).unwrap();
        assert!(json.contains("pipe broke"));
    }

    #[test]
    fn std_error_source_chain() {
        let inner = io::Error::new(io::ErrorKind::NotFound, "not found");
        let err = ParError::new(ErrorCode::Internal, "staging").with_source(inner);
        let src = std::error::Error::source(&err).unwrap();
        assert_eq!(src.to_string(), "not found");
    }
}
