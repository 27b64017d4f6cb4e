//! Digest-encoding validation.
//!
//! Kept dependency-free (no `par-error` import) so that `par-core` stays a
//! leaf crate every other crate in the workspace can depend on without a
//! cycle; callers map [`DigestValidationError`] onto their own error type.

use crate::DigestAlg;

/// A digest string failed to match the encoding its [`DigestAlg`] requires.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DigestValidationError {
    /// Expected 64 lowercase hex characters, got something else.
    #[error("expected 64 lowercase hex characters for {alg:?}, got {len} chars")]
    NotHex {
        /// The algorithm that required hex.
        alg: DigestAlg,
        /// The actual length of the offending string.
        len: usize,
    },
    /// Expected base64url (no padding), got something else.
    #[error("expected base64url-encoded multihash, got invalid characters")]
    NotBase64Url,
    /// The digest string was empty.
    #[error("digest must not be empty")]
    Empty,
}

/// Validates that `digest` matches the canonical text encoding required by
/// `alg`: 64 lowercase hex characters for `sha2-256` / `sha3-256` /
/// `blake3`, or base64url (unpadded) for `multihash`.
pub fn validate_digest_encoding(digest: &str, alg: DigestAlg) -> Result<(), DigestValidationError> {
    if digest.is_empty() {
        return Err(DigestValidationError::Empty);
    }
    if alg.is_hex_encoded() {
        if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return Err(DigestValidationError::NotHex {
                alg,
                len: digest.len(),
            });
        }
        Ok(())
    } else {
        let valid = digest
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !valid {
            return Err(DigestValidationError::NotBase64Url);
        }
        Ok(())
    }
}
