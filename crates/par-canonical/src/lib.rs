// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "JSON canonicalization, digests, and CIDv1 commitment construction."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Canonical JSON serialization (keys recursively sorted, RFC 8785-style),
//! SHA-256 hex/base64url digests, and CIDv1 content-addressed commitments.
//!
//! Canonicalization never fails on a value that serializes to valid JSON;
//! only CID construction over a non-serializable input can fail.

use base64::Engine;
use multihash_codetable::{Code, MultihashDigest};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// The CIDv1 codec tag used for canonical-JSON commitments (`json`, 0x0200).
pub const JSON_CODEC: u64 = 0x0200;

/// Errors raised while canonicalizing or content-addressing a value.
#[derive(Debug, thiserror::Error)]
pub enum CanonicalizationError {
    /// The value could not be serialized to JSON.
    #[error("failed to serialize value to JSON: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Recursively sorts every object's keys lexicographically, leaving arrays
/// and scalars untouched. Used internally so canonical output does not
/// depend on `serde_json`'s `preserve_order` feature flag.
fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: BTreeMap<&str, &Value> = BTreeMap::new();
            for (k, v) in map {
                sorted.insert(k.as_str(), v);
            }
            let mut out = Map::with_capacity(map.len());
            for (k, v) in sorted {
                out.insert(k.to_string(), sort_keys(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Produces the canonical JSON string of `value`: keys recursively sorted
/// lexicographically, no insignificant whitespace, UTF-8 output.
///
/// # Errors
///
/// Returns [`CanonicalizationError::Serialize`] if `value` cannot be
/// serialized to JSON at all (it does not fail on valid-JSON shapes).
///
/// # Examples
///
/// ```
/// use par_canonical::canonicalize;
/// use serde_json::json;
///
/// let a = canonicalize(&json!({"b": 1, "a": 2})).unwrap();
/// let b = canonicalize(&json!({"a": 2, "b": 1})).unwrap();
/// assert_eq!(a, b);
/// ```
pub fn canonicalize<T: Serialize>(value: &T) -> Result<String, CanonicalizationError> {
    let raw = serde_json::to_value(value)?;
    let sorted = sort_keys(&raw);
    Ok(serde_json::to_string(&sorted)?)
}

/// Returns the lowercase hex-encoded SHA-256 digest of `bytes`.
pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes.as_ref());
    format!("{:x}", hasher.finalize())
}

/// Returns the base64url-encoded (unpadded) SHA-256 digest of `bytes`.
pub fn sha256_base64url(bytes: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes.as_ref());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Canonicalizes `value`, hashes it with SHA-256 (multihash code `0x12`),
/// and wraps the result in a CIDv1 with the `json` codec (`0x0200`). The
/// returned string is the CID's default (base32, lowercase) text encoding.
///
/// # Errors
///
/// Returns [`CanonicalizationError::Serialize`] if `value` cannot be
/// serialized.
pub fn cid_v1_json<T: Serialize>(value: &T) -> Result<String, CanonicalizationError> {
    let canonical = canonicalize(value)?;
    let hash = Code::Sha2_256.digest(canonical.as_bytes());
    let cid = cid::Cid::new_v1(JSON_CODEC, hash);
    Ok(cid.to_string())
}

/// The inputs bound into a proof asset's commitment CID.
///
/// Field order here is irrelevant to the resulting CID — [`canonicalize`]
/// sorts keys regardless — but is kept matching the canonical key order for
/// readability. Missing optional fields serialize as JSON `null`.
#[derive(Debug, Clone, Serialize)]
pub struct CommitmentInputs {
    /// CID of the policy document.
    pub policy_cid: String,
    /// Hash of the policy document.
    pub policy_hash: String,
    /// CID of the constraint document, if any.
    pub constraint_cid: Option<String>,
    /// Hash of the constraint document, if any.
    pub constraint_hash: Option<String>,
    /// CID of the circuit definition, if any.
    pub circuit_cid: Option<String>,
    /// CID of the schema definition, if any.
    pub schema_cid: Option<String>,
    /// Opaque license metadata, if any.
    pub license: Option<Value>,
    /// The caller-supplied proof identifier bound into the commitment.
    pub proof_id: String,
}

/// Computes a proof asset's commitment CID over
/// `{policy_cid, policy_hash, constraint_cid, constraint_hash, circuit_cid,
/// schema_cid, license, proof_id}`, with missing fields serialized as
/// `null`.
///
/// # Errors
///
/// Returns [`CanonicalizationError::Serialize`] if `inputs` cannot be
/// serialized (practically unreachable given its concrete field types).
pub fn proof_commitment(inputs: &CommitmentInputs) -> Result<String, CanonicalizationError> {
    cid_v1_json(inputs)
}
