// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Stable contract types for the Proof-Asset Registry."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! The stable data model shared by every Proof-Asset Registry component:
//! [`ProofAsset`], [`AuditEvent`], [`StatusList`], and the receipt claim set.
//!
//! None of these types hold proof bytes or PII — only hashes, CIDs, opaque
//! identifiers, and timestamps.

/// Digest-encoding validation for [`ProofAsset`].
pub mod validate;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current contract version string embedded in telemetry and `/health`.
///
/// # Examples
///
/// ```
/// assert_eq!(par_core::CONTRACT_VERSION, "par/v1");
/// ```
pub const CONTRACT_VERSION: &str = "par/v1";

/// Default bitstring size (in bits) for a newly created [`StatusList`].
pub const DEFAULT_STATUS_LIST_SIZE: u64 = 131_072;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The format of a registered proof.
///
/// Only [`ProofFormat::Jws`] has a fully implemented fresh-proof verifier;
/// the rest are dispatched to a provisional "accept" stub (see
/// `par-verify-dispatch`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProofFormat {
    /// A zero-knowledge proof (e.g. Groth16).
    ZkProof,
    /// A compact-JWS proof (fully supported).
    Jws,
    /// A Linked-Data proof.
    LdProof,
    /// A hardware attestation (e.g. TPM quote).
    HwAttestation,
    /// A Merkle inclusion proof.
    MerkleProof,
    /// A blockchain transaction proof.
    BlockchainTxProof,
    /// Any other format.
    Other,
}

/// The hash algorithm used to compute [`ProofAsset::proof_digest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum DigestAlg {
    /// SHA2-256, encoded as 64 lowercase hex chars.
    Sha2_256,
    /// SHA3-256, encoded as 64 lowercase hex chars.
    Sha3_256,
    /// BLAKE3, encoded as 64 lowercase hex chars.
    Blake3,
    /// A multihash, encoded as base64url.
    Multihash,
}

impl DigestAlg {
    /// Returns `true` if this algorithm's canonical text encoding is hex
    /// (64 lowercase characters), as opposed to base64url.
    pub fn is_hex_encoded(&self) -> bool {
        matches!(self, Self::Sha2_256 | Self::Sha3_256 | Self::Blake3)
    }
}

/// The W3C Bitstring Status List purpose a slot is allocated under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StatusPurpose {
    /// The bit indicates revocation when set.
    Revocation,
    /// The bit indicates suspension when set.
    Suspension,
}

impl StatusPurpose {
    /// The [`VerificationStatus`] that corresponds to this purpose's bit
    /// being set.
    pub fn set_status(&self) -> VerificationStatus {
        match self {
            Self::Revocation => VerificationStatus::Revoked,
            Self::Suspension => VerificationStatus::Suspended,
        }
    }
}

/// Lifecycle state of a [`ProofAsset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// Registered but not yet verified (should not be observable externally
    /// once register() completes successfully).
    Pending,
    /// The asset's proof and status bit are both currently valid.
    Verified,
    /// The asset's status-list bit (purpose = revocation) is set.
    Revoked,
    /// The asset's status-list bit (purpose = suspension) is set.
    Suspended,
}

impl VerificationStatus {
    /// Returns `true` if `next` is a legal transition from `self` under the
    /// state machine in SPEC_FULL.md §4.7.
    pub fn can_transition_to(&self, next: VerificationStatus) -> bool {
        use VerificationStatus::*;
        matches!(
            (self, next),
            (Pending, Verified)
                | (Pending, Revoked)
                | (Pending, Suspended)
                | (Verified, Revoked)
                | (Verified, Suspended)
                | (Verified, Verified)
                | (Revoked, Verified)
                | (Revoked, Revoked)
                | (Suspended, Verified)
                | (Suspended, Suspended)
        )
    }
}

// ---------------------------------------------------------------------------
// StatusRef
// ---------------------------------------------------------------------------

/// The status-list slot a receipt or asset is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StatusRef {
    /// Normalized status-list URL.
    pub status_list_url: String,
    /// Bit index within the list, stored as a string per the data model.
    pub status_list_index: String,
    /// Purpose the index is allocated under.
    pub status_purpose: StatusPurpose,
}

// ---------------------------------------------------------------------------
// ProofAsset
// ---------------------------------------------------------------------------

/// The registered proof-asset record.
///
/// Never holds proof bytes or PII: only hashes, CIDs, opaque identifiers,
/// and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProofAsset {
    /// Primary key.
    pub asset_id: Uuid,
    /// CIDv1 commitment over the policy/constraint/circuit/schema tuple.
    /// Unique across the registry.
    pub commitment: String,
    /// Opaque, stable issuer identifier (a DID string).
    pub issuer_did: String,
    /// Owning partner, if registered through an authenticated API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_id: Option<Uuid>,
    /// Opaque subject binding (never PII — e.g. a hash of a subject id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_binding: Option<String>,
    /// Proof format tag.
    pub proof_format: ProofFormat,
    /// Digest of the proof bytes, encoded per `digest_alg`.
    pub proof_digest: String,
    /// Algorithm `proof_digest` was computed with.
    pub digest_alg: DigestAlg,
    /// URI where fresh proof bytes can be fetched. Never the bytes
    /// themselves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_uri: Option<String>,
    /// Hash of the constraint document.
    pub constraint_hash: String,
    /// CID of the constraint document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint_cid: Option<String>,
    /// Hash of the policy document.
    pub policy_hash: String,
    /// CID of the policy document.
    pub policy_cid: String,
    /// Circuit or schema identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_or_schema_id: Option<String>,
    /// CID of the circuit definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_cid: Option<String>,
    /// CID of the schema definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_cid: Option<String>,
    /// Additional content CIDs referenced by the proof.
    #[serde(default)]
    pub content_cids: Vec<String>,
    /// Opaque license metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<serde_json::Value>,
    /// Normalized status-list URL this asset's bit lives on.
    pub status_list_url: String,
    /// Bit index within the status list (decimal string).
    pub status_list_index: String,
    /// Purpose the bit index is allocated under.
    pub status_purpose: StatusPurpose,
    /// Opaque attestations blob.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestations: Option<serde_json::Value>,
    /// CID of this asset's audit trail head, if exported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_cid: Option<String>,
    /// Current lifecycle state.
    pub verification_status: VerificationStatus,
    /// Algorithm used for the most recent verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_algorithm: Option<String>,
    /// Digest of the public key used for the most recent verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_public_key_digest: Option<String>,
    /// Timestamp of the most recent verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_timestamp: Option<DateTime<Utc>>,
    /// Opaque derived claims from the most recent verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_metadata: Option<serde_json::Value>,
    /// The signed receipt (compact-JWS), if one has been issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifier_proof_ref: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl ProofAsset {
    /// Returns this asset's `(status_list_url, status_list_index, status_purpose)`
    /// triple, as used for receipt status-ref binding checks.
    pub fn status_ref(&self) -> StatusRef {
        StatusRef {
            status_list_url: self.status_list_url.clone(),
            status_list_index: self.status_list_index.clone(),
            status_purpose: self.status_purpose,
        }
    }

    /// Parses [`Self::status_list_index`] as a `u64` bit index.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored index string is not a valid
    /// non-negative integer.
    pub fn status_index_as_u64(&self) -> Result<u64, std::num::ParseIntError> {
        self.status_list_index.parse()
    }
}

// ---------------------------------------------------------------------------
// AuditEvent
// ---------------------------------------------------------------------------

/// The kind of an [`AuditEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    /// A new asset was registered.
    Mint,
    /// An asset was re-verified (receipt- or fresh-proof-based).
    Use,
    /// An asset's ownership/partner binding changed.
    Transfer,
    /// A status list's bitstring was updated.
    StatusUpdate,
    /// Generic creation marker, kept for parity with the source schema.
    AssetCreated,
}

/// An append-only, hash-chained audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AuditEvent {
    /// Primary key.
    pub event_id: Uuid,
    /// The kind of event.
    pub event_type: AuditEventType,
    /// The asset this event concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<Uuid>,
    /// Opaque event-specific payload (e.g. old/new status).
    pub payload: serde_json::Value,
    /// Correlation id for distributed tracing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Hex SHA-256 of the previous event's `event_hash`; `None` for the
    /// first event in the chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_hash: Option<String>,
    /// Hex SHA-256 of this event's canonical form, computed over every
    /// other field including `previous_hash` and `timestamp`.
    pub event_hash: String,
    /// Event timestamp (ISO-8601 / RFC-3339).
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// StatusList
// ---------------------------------------------------------------------------

/// A W3C Bitstring Status List snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StatusList {
    /// Primary key.
    pub list_id: Uuid,
    /// Purpose this list tracks.
    pub purpose: StatusPurpose,
    /// Normalized, unique URL this list is served from.
    pub url: String,
    /// Raw (ungzipped) bitstring bytes, `⌈size/8⌉` bytes or more.
    #[serde(with = "bitstring_base64")]
    pub bitstring: Vec<u8>,
    /// Total number of bits tracked by this list.
    pub size: u64,
    /// Current ETag, bumped on every update.
    pub etag: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl StatusList {
    /// Create a new, all-zero status list of `size` bits for `purpose` at
    /// `url`.
    pub fn new_empty(url: impl Into<String>, purpose: StatusPurpose, size: u64) -> Self {
        let now = Utc::now();
        let byte_len = size.div_ceil(8) as usize;
        Self {
            list_id: Uuid::new_v4(),
            purpose,
            url: url.into(),
            bitstring: vec![0u8; byte_len],
            size,
            etag: format!("W/\"{}\"", Uuid::new_v4()),
            created_at: now,
            updated_at: now,
        }
    }
}

mod bitstring_base64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        use base64::Engine;
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        use base64::Engine;
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Receipt claims
// ---------------------------------------------------------------------------

/// The JWT claim set carried by a compact-JWS receipt.
///
/// Mirrors §3/§4.3: `proof_digest`, `policy_hash`, and `constraint_hash` are
/// all base64url-encoded (the canonical encoding this implementation
/// settles on — see SPEC_FULL.md Open Questions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReceiptClaims {
    /// base64url(sha256(proof bytes)) (or the asset's native digest,
    /// re-encoded to base64url).
    pub proof_digest: String,
    /// The asset's policy hash.
    pub policy_hash: String,
    /// The asset's constraint hash.
    pub constraint_hash: String,
    /// The status-list slot this receipt is bound to.
    pub status_ref: StatusRef,
    /// Unique identifier for replay detection.
    pub jti: String,
    /// Audience; must equal the registry's configured audience.
    pub aud: String,
    /// Issued-at, Unix seconds.
    pub iat: i64,
    /// Not-before, Unix seconds.
    pub nbf: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
    /// Verifier DID, if configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Bound asset id, if supplied at generation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Anti-replay nonce, if supplied at generation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

// ---------------------------------------------------------------------------
// JtiReplayEntry
// ---------------------------------------------------------------------------

/// A single row in the JTI replay cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JtiReplayEntry {
    /// The JWT id this row guards.
    pub jti: String,
    /// When this row may be garbage-collected.
    pub exp_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_alg_hex_vs_b64u() {
        assert!(DigestAlg::Sha2_256.is_hex_encoded());
        assert!(DigestAlg::Sha3_256.is_hex_encoded());
        assert!(DigestAlg::Blake3.is_hex_encoded());
        assert!(!DigestAlg::Multihash.is_hex_encoded());
    }

    #[test]
    fn status_purpose_maps_to_status() {
        assert_eq!(
            StatusPurpose::Revocation.set_status(),
            VerificationStatus::Revoked
        );
        assert_eq!(
            StatusPurpose::Suspension.set_status(),
            VerificationStatus::Suspended
        );
    }

    #[test]
    fn verification_status_transitions() {
        use VerificationStatus::*;
        assert!(Pending.can_transition_to(Verified));
        assert!(Verified.can_transition_to(Revoked));
        assert!(Revoked.can_transition_to(Verified));
        assert!(!Pending.can_transition_to(Pending));
        assert!(Verified.can_transition_to(Verified));
    }

    #[test]
    fn status_list_new_empty_has_enough_bytes() {
        let list = StatusList::new_empty("https://status.example/list", StatusPurpose::Revocation, 131_072);
        assert_eq!(list.bitstring.len(), 131_072 / 8);
        assert!(list.bitstring.iter().all(|&b| b == 0));
    }

    #[test]
    fn status_list_rounds_up_partial_byte() {
        let list = StatusList::new_empty("https://status.example/list", StatusPurpose::Revocation, 17);
        assert_eq!(list.bitstring.len(), 3); // ceil(17/8) = 3
    }

    #[test]
    fn status_list_serde_roundtrip_base64() {
        let mut list = StatusList::new_empty("https://status.example/list", StatusPurpose::Suspension, 16);
        list.bitstring[0] = 0xFF;
        let json = serde_json::to_string(&list).unwrap();
        let back: StatusList = serde_json::from_str(&json).unwrap();
        assert_eq!(back.bitstring, list.bitstring);
    }

    #[test]
    fn asset_status_index_parses() {
        let asset = sample_asset();
        assert_eq!(asset.status_index_as_u64().unwrap(), 42);
    }

    fn sample_asset() -> ProofAsset {
        let now = Utc::now();
        ProofAsset {
            asset_id: Uuid::new_v4(),
            commitment: "bafybeigdemo".into(),
            issuer_did: "did:example:issuer".into(),
            partner_id: None,
            subject_binding: None,
            proof_format: ProofFormat::Jws,
            proof_digest: "a".repeat(64),
            digest_alg: DigestAlg::Sha2_256,
            proof_uri: None,
            constraint_hash: "b".repeat(64),
            constraint_cid: None,
            policy_hash: "c".repeat(64),
            policy_cid: "bafybeigpolicy".into(),
            circuit_or_schema_id: None,
            circuit_cid: None,
            schema_cid: None,
            content_cids: vec![],
            license: None,
            status_list_url: "https://status.example/list".into(),
            status_list_index: "42".into(),
            status_purpose: StatusPurpose::Revocation,
            attestations: None,
            audit_cid: None,
            verification_status: VerificationStatus::Verified,
            verification_algorithm: None,
            verification_public_key_digest: None,
            verification_timestamp: None,
            verification_metadata: None,
            verifier_proof_ref: None,
            created_at: now,
            updated_at: now,
        }
    }
}
