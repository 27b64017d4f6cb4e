// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "W3C Bitstring Status List codec: gzip+base64 transport, LSB-first bit operations."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Encode/decode the gzip+base64 wire form of a W3C Bitstring Status List
//! and perform LSB-first bit get/set/flip on the decoded bytes.

use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Errors raised by the bitstring codec.
#[derive(Debug, thiserror::Error)]
pub enum BitstringError {
    /// The input was not valid (standard, padded) base64.
    #[error("invalid base64 bitstring: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    /// The base64-decoded bytes were not a valid gzip stream.
    #[error("invalid gzip bitstring: {0}")]
    InvalidGzip(std::io::Error),
    /// A referenced bit index was outside the declared list size.
    #[error("bit index {index} is out of range for a list of size {size}")]
    IndexOutOfRange {
        /// The offending index.
        index: u64,
        /// The list's declared size, in bits.
        size: u64,
    },
}

/// Decodes a base64+gzip W3C Bitstring Status List payload into raw bytes.
///
/// # Errors
///
/// Returns [`BitstringError::InvalidBase64`] or
/// [`BitstringError::InvalidGzip`] if the input is malformed.
pub fn decode_gzip_b64(s: &str) -> Result<Vec<u8>, BitstringError> {
    let compressed = base64::engine::general_purpose::STANDARD.decode(s.as_bytes())?;
    let mut decoder = GzDecoder::new(&compressed[..]);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(BitstringError::InvalidGzip)?;
    Ok(out)
}

/// Gzip-compresses `bytes` (RFC 1952, default compression level) and
/// base64-encodes the result, producing the W3C Bitstring Status List wire
/// form.
///
/// # Errors
///
/// Returns [`BitstringError::InvalidGzip`] only if the underlying writer
/// fails, which does not happen for an in-memory `Vec<u8>` sink.
pub fn encode_gzip_b64(bytes: &[u8]) -> Result<String, BitstringError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(BitstringError::InvalidGzip)?;
    let compressed = encoder.finish().map_err(BitstringError::InvalidGzip)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(compressed))
}

/// Returns the bit at `index` within `bytes`, counted LSB-first within each
/// byte. Returns `0` if `index / 8 >= bytes.len()` rather than erroring —
/// matching the out-of-range-read semantics of the status-list contract.
pub fn bit_at(bytes: &[u8], index: u64) -> u8 {
    let byte_index = (index / 8) as usize;
    match bytes.get(byte_index) {
        Some(byte) => (byte >> (index % 8)) & 1,
        None => 0,
    }
}

/// A single mutation applied by [`apply_ops`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum BitOp {
    /// Set the bit at `index` to 1.
    Set {
        /// The bit index to mutate.
        index: u64,
    },
    /// Clear the bit at `index` to 0.
    Clear {
        /// The bit index to mutate.
        index: u64,
    },
    /// Flip the bit at `index`.
    Flip {
        /// The bit index to mutate.
        index: u64,
    },
}

impl BitOp {
    fn index(&self) -> u64 {
        match self {
            Self::Set { index } | Self::Clear { index } | Self::Flip { index } => *index,
        }
    }
}

fn set_bit(bytes: &mut [u8], index: u64) {
    let byte_index = (index / 8) as usize;
    bytes[byte_index] |= 1 << (index % 8);
}

fn clear_bit(bytes: &mut [u8], index: u64) {
    let byte_index = (index / 8) as usize;
    bytes[byte_index] &= !(1 << (index % 8));
}

fn flip_bit(bytes: &mut [u8], index: u64) {
    let byte_index = (index / 8) as usize;
    bytes[byte_index] ^= 1 << (index % 8);
}

/// Applies `ops` to `bytes` in order, bounds-checked against `size` (the
/// list's declared bit count).
///
/// # Errors
///
/// Returns [`BitstringError::IndexOutOfRange`] on the first op whose index
/// is `>= size`; no later ops are applied, and any earlier ops in the same
/// call remain applied (callers that need atomicity should clone `bytes`
/// first and swap it in only on success).
pub fn apply_ops(bytes: &mut [u8], size: u64, ops: &[BitOp]) -> Result<(), BitstringError> {
    for op in ops {
        let index = op.index();
        if index >= size {
            return Err(BitstringError::IndexOutOfRange { index, size });
        }
        match op {
            BitOp::Set { .. } => set_bit(bytes, index),
            BitOp::Clear { .. } => clear_bit(bytes, index),
            BitOp::Flip { .. } => flip_bit(bytes, index),
        }
    }
    Ok(())
}

/// The effective credential status at a given bit index, per the W3C
/// Bitstring Status List purpose semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    /// The bit is clear: the credential is valid for this purpose.
    Valid,
    /// The bit is set and the purpose is revocation.
    Revoked,
    /// The bit is set and the purpose is suspension.
    Suspended,
}

/// The purpose a status-list bit is interpreted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusPurposeTag {
    /// A set bit means revoked.
    Revocation,
    /// A set bit means suspended.
    Suspension,
}

/// Decodes a base64+gzip bitstring and returns `(status, bit)` at `index`
/// under `purpose`.
///
/// # Errors
///
/// Propagates [`decode_gzip_b64`]'s errors.
pub fn get_credential_status(
    b64_bitstring: &str,
    index: u64,
    purpose: StatusPurposeTag,
) -> Result<(CredentialStatus, u8), BitstringError> {
    let bytes = decode_gzip_b64(b64_bitstring)?;
    let bit = bit_at(&bytes, index);
    let status = match (bit, purpose) {
        (0, _) => CredentialStatus::Valid,
        (_, StatusPurposeTag::Revocation) => CredentialStatus::Revoked,
        (_, StatusPurposeTag::Suspension) => CredentialStatus::Suspended,
    };
    Ok((status, bit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_b64_roundtrip() {
        let original = vec![0u8, 1, 2, 3, 255, 254, 0, 0, 17];
        let encoded = encode_gzip_b64(&original).unwrap();
        let decoded = decode_gzip_b64(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn decode_gzip_b64_rejects_bad_base64() {
        assert!(matches!(
            decode_gzip_b64("not base64!!"),
            Err(BitstringError::InvalidBase64(_))
        ));
    }

    #[test]
    fn decode_gzip_b64_rejects_valid_base64_non_gzip() {
        let not_gzip = base64::engine::general_purpose::STANDARD.encode(b"plain bytes, not gzip");
        assert!(matches!(
            decode_gzip_b64(&not_gzip),
            Err(BitstringError::InvalidGzip(_))
        ));
    }

    #[test]
    fn bit_at_is_lsb_first() {
        // byte 0b0000_0010 -> bit 1 set, bit 0 clear.
        let bytes = [0b0000_0010u8];
        assert_eq!(bit_at(&bytes, 0), 0);
        assert_eq!(bit_at(&bytes, 1), 1);
    }

    #[test]
    fn bit_at_out_of_range_returns_zero() {
        let bytes = [0u8; 2];
        assert_eq!(bit_at(&bytes, 100), 0);
    }

    #[test]
    fn apply_ops_set_clear_flip() {
        let mut bytes = vec![0u8; 2];
        apply_ops(&mut bytes, 16, &[BitOp::Set { index: 3 }]).unwrap();
        assert_eq!(bit_at(&bytes, 3), 1);
        apply_ops(&mut bytes, 16, &[BitOp::Flip { index: 3 }]).unwrap();
        assert_eq!(bit_at(&bytes, 3), 0);
        apply_ops(&mut bytes, 16, &[BitOp::Set { index: 3 }]).unwrap();
        apply_ops(&mut bytes, 16, &[BitOp::Clear { index: 3 }]).unwrap();
        assert_eq!(bit_at(&bytes, 3), 0);
    }

    #[test]
    fn apply_ops_rejects_index_at_or_past_size() {
        let mut bytes = vec![0u8; 2];
        let err = apply_ops(&mut bytes, 16, &[BitOp::Set { index: 16 }]).unwrap_err();
        assert!(matches!(
            err,
            BitstringError::IndexOutOfRange { index: 16, size: 16 }
        ));
    }

    #[test]
    fn get_credential_status_revocation() {
        let mut bytes = vec![0u8; 4];
        set_bit(&mut bytes, 10);
        let encoded = encode_gzip_b64(&bytes).unwrap();
        let (status, bit) =
            get_credential_status(&encoded, 10, StatusPurposeTag::Revocation).unwrap();
        assert_eq!(status, CredentialStatus::Revoked);
        assert_eq!(bit, 1);
    }

    #[test]
    fn get_credential_status_valid_when_bit_clear() {
        let bytes = vec![0u8; 4];
        let encoded = encode_gzip_b64(&bytes).unwrap();
        let (status, bit) =
            get_credential_status(&encoded, 10, StatusPurposeTag::Suspension).unwrap();
        assert_eq!(status, CredentialStatus::Valid);
        assert_eq!(bit, 0);
    }
}
