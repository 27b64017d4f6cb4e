//! The `register` operation: validates, verifies, commits, allocates a
//! status-list slot, issues a receipt, and persists a new [`ProofAsset`].

use crate::{Registry, RegistryError};
use chrono::Utc;
use par_canonical::CommitmentInputs;
use par_core::validate::validate_digest_encoding;
use par_core::{
    AuditEventType, DigestAlg, ProofAsset, ProofFormat, StatusList, StatusPurpose,
    VerificationStatus, DEFAULT_STATUS_LIST_SIZE,
};
use rand::Rng;
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

/// The audience bound into a freshly generated receipt when
/// `ParConfig.receipt.audience` is not configured.
const DEFAULT_AUDIENCE: &str = "par-registry";

/// Timeout applied to issuer DID resolution.
const ISSUER_RESOLUTION_TIMEOUT: Duration = Duration::from_secs(3);

/// Inputs to [`Registry::register`].
#[derive(Debug, Clone)]
pub struct RegisterRequest {
    /// The proof's declared format.
    pub proof_format: ProofFormat,
    /// The digest of the proof bytes, encoded per `digest_alg`.
    pub proof_digest: String,
    /// Algorithm `proof_digest` was computed with.
    pub digest_alg: DigestAlg,
    /// The supplied proof reference: for [`ProofFormat::Jws`] this is the
    /// compact JWS itself; other formats are dispatched provisionally.
    pub proof_ref: Vec<u8>,
    /// URI where fresh proof bytes can be fetched, if any.
    pub proof_uri: Option<String>,
    /// Stable issuer identifier (a DID string).
    pub issuer_did: String,
    /// Opaque subject binding (never PII).
    pub subject_binding: Option<String>,
    /// CID of the policy document.
    pub policy_cid: String,
    /// Hash of the policy document.
    pub policy_hash: String,
    /// CID of the constraint document, if any.
    pub constraint_cid: Option<String>,
    /// Hash of the constraint document.
    pub constraint_hash: String,
    /// Circuit or schema identifier.
    pub circuit_or_schema_id: Option<String>,
    /// CID of the circuit definition, if any.
    pub circuit_cid: Option<String>,
    /// CID of the schema definition, if any.
    pub schema_cid: Option<String>,
    /// Additional content CIDs referenced by the proof.
    pub content_cids: Vec<String>,
    /// Opaque license metadata.
    pub license: Option<Value>,
    /// Caller-supplied proof identifier, bound into the commitment.
    pub proof_id: String,
    /// Opaque attestations blob.
    pub attestations: Option<Value>,
    /// The status-list purpose this asset's bit is allocated under.
    pub status_purpose: StatusPurpose,
    /// The authenticated partner registering this asset, if any.
    pub partner_id: Option<Uuid>,
}

/// The result of a successful [`Registry::register`] call.
#[derive(Debug, Clone)]
pub struct RegisterOutcome {
    /// The newly persisted asset.
    pub asset: ProofAsset,
    /// The signed receipt bound to this asset.
    pub receipt: String,
}

impl Registry {
    /// Registers a new proof asset: validates the digest encoding,
    /// optionally resolves the issuer DID, verifies the fresh proof,
    /// computes and commits the content-addressed commitment, allocates a
    /// status-list slot, issues a receipt, persists the asset, and appends a
    /// `MINT` audit event.
    ///
    /// # Errors
    ///
    /// See [`RegistryError`] for the full set of rejection reasons.
    pub async fn register(&self, req: RegisterRequest) -> Result<RegisterOutcome, RegistryError> {
        let result = self.register_inner(req).await;
        self.telemetry.record_operation(
            par_telemetry::Operation::RegisterAsset,
            if result.is_ok() {
                par_telemetry::Outcome::Success
            } else {
                par_telemetry::Outcome::Rejected
            },
        );
        result
    }

    async fn register_inner(&self, req: RegisterRequest) -> Result<RegisterOutcome, RegistryError> {
        validate_digest_encoding(&req.proof_digest, req.digest_alg)?;

        if self.config.did_validation_enabled {
            let methods = self
                .issuer_directory
                .resolve_did(&req.issuer_did, ISSUER_RESOLUTION_TIMEOUT)
                .await?;
            if methods.is_empty() {
                return Err(RegistryError::NoVerificationMethod);
            }
        }

        let outcome = par_verify_dispatch::verify_fresh(req.proof_format, &req.proof_ref);
        if !outcome.ok {
            return Err(RegistryError::ProofVerificationFailed {
                reason: outcome.reason.unwrap_or_else(|| "rejected".to_string()),
            });
        }

        let commitment_inputs = CommitmentInputs {
            policy_cid: req.policy_cid.clone(),
            policy_hash: req.policy_hash.clone(),
            constraint_cid: req.constraint_cid.clone(),
            constraint_hash: Some(req.constraint_hash.clone()),
            circuit_cid: req.circuit_cid.clone(),
            schema_cid: req.schema_cid.clone(),
            license: req.license.clone(),
            proof_id: req.proof_id.clone(),
        };
        let commitment = par_canonical::proof_commitment(&commitment_inputs)
            .map_err(|e| RegistryError::ValidationFailed { reason: e.to_string() })?;

        if self.store.get_asset_by_commitment(&commitment).await?.is_some() {
            return Err(RegistryError::CommitmentConflict);
        }

        let status_list_url = self.allocate_status_list_url(req.status_purpose);
        let status_list_index = rand::thread_rng().gen_range(0..DEFAULT_STATUS_LIST_SIZE);

        if self.store.get_status_list(&status_list_url).await?.is_none() {
            let list = StatusList::new_empty(status_list_url.clone(), req.status_purpose, DEFAULT_STATUS_LIST_SIZE);
            self.store.upsert_status_list(list).await?;
        }

        let status_ref = par_core::StatusRef {
            status_list_url: status_list_url.clone(),
            status_list_index: status_list_index.to_string(),
            status_purpose: req.status_purpose,
        };

        let audience = self
            .config
            .receipt
            .audience
            .clone()
            .unwrap_or_else(|| DEFAULT_AUDIENCE.to_string());
        let receipt = par_receipt::generate(
            self.key_provider.encoding_key(),
            self.key_provider.kid(),
            par_receipt::GenerateInput {
                proof_digest: crate::util::digest_to_base64url(&req.proof_digest, req.digest_alg),
                policy_hash: req.policy_hash.clone(),
                constraint_hash: req.constraint_hash.clone(),
                status_ref: status_ref.clone(),
                audience,
                issuer: Some(self.key_provider.kid().to_string()),
                subject: None,
                nonce: None,
                not_before: None,
                expires_in: None,
            },
        )?;

        if !VerificationStatus::Pending.can_transition_to(VerificationStatus::Verified) {
            return Err(RegistryError::InvalidTransition {
                from: VerificationStatus::Pending,
                to: VerificationStatus::Verified,
            });
        }

        let now = Utc::now();
        let asset = ProofAsset {
            asset_id: Uuid::new_v4(),
            commitment: commitment.clone(),
            issuer_did: req.issuer_did.clone(),
            partner_id: req.partner_id,
            subject_binding: req.subject_binding,
            proof_format: req.proof_format,
            proof_digest: req.proof_digest,
            digest_alg: req.digest_alg,
            proof_uri: req.proof_uri,
            constraint_hash: req.constraint_hash,
            constraint_cid: req.constraint_cid,
            policy_hash: req.policy_hash,
            policy_cid: req.policy_cid,
            circuit_or_schema_id: req.circuit_or_schema_id,
            circuit_cid: req.circuit_cid,
            schema_cid: req.schema_cid,
            content_cids: req.content_cids,
            license: req.license,
            status_list_url,
            status_list_index: status_list_index.to_string(),
            status_purpose: req.status_purpose,
            attestations: req.attestations,
            audit_cid: None,
            verification_status: VerificationStatus::Verified,
            verification_algorithm: outcome.metadata.as_ref().and_then(|m| m.get("alg")).and_then(Value::as_str).map(str::to_string),
            verification_public_key_digest: Some(par_canonical::sha256_hex(
                self.key_provider.public_jwk().to_string(),
            )),
            verification_timestamp: Some(now),
            verification_metadata: outcome.metadata,
            verifier_proof_ref: Some(receipt.clone()),
            created_at: now,
            updated_at: now,
        };

        self.store.insert_asset(asset.clone()).await?;

        self.store
            .insert_audit_event(
                AuditEventType::Mint,
                Some(asset.asset_id),
                json!({
                    "commitment": asset.commitment,
                    "issuer_did": asset.issuer_did,
                    "proof_format": asset.proof_format,
                    "status_ref": status_ref,
                }),
                None,
            )
            .await?;

        Ok(RegisterOutcome { asset, receipt })
    }

    fn allocate_status_list_url(&self, purpose: StatusPurpose) -> String {
        let suffix = match purpose {
            StatusPurpose::Revocation => "revocation",
            StatusPurpose::Suspension => "suspension",
        };
        let base = self.config.status.base_url.as_deref().unwrap_or("https://status.local");
        format!("{}/{suffix}", base.trim_end_matches('/'))
    }
}
