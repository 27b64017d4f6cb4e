//! The `re-verify` operation: confirms an already-registered asset is still
//! valid, either from its receipt plus a status-list check, or additionally
//! against a freshly fetched proof.

use crate::{Registry, RegistryError};
use chrono::Utc;
use par_core::{AuditEventType, ProofAsset, VerificationStatus};
use par_status_client::Verdict;
use serde_json::json;
use uuid::Uuid;

/// Which evidence a [`ReVerifyOutcome`] was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    /// The caller's receipt plus a live status-list check.
    ReceiptBased,
    /// A freshly fetched and dispatched proof.
    FreshProof,
}

/// Inputs to [`Registry::re_verify`].
#[derive(Debug, Clone, Default)]
pub struct ReVerifyRequest {
    /// The asset to re-verify.
    pub asset_id: Uuid,
    /// A previously issued compact-JWS receipt, required unless
    /// `require_fresh_proof` bypasses receipt-based verification entirely.
    pub receipt: Option<String>,
    /// Raw fresh-proof bytes, base64url-encoded (mutually exclusive with
    /// `proof_uri`).
    pub proof_bytes: Option<String>,
    /// A URI to fetch fresh proof bytes from via SRI-validated fetch
    /// (mutually exclusive with `proof_bytes`).
    pub proof_uri: Option<String>,
    /// An optional nonce the receipt's `nonce` claim must match.
    pub expected_nonce: Option<String>,
    /// Whether a fresh proof must additionally be verified.
    pub require_fresh_proof: bool,
}

/// The result of a successful [`Registry::re_verify`] call.
#[derive(Debug, Clone)]
pub struct ReVerifyOutcome {
    /// The asset after its status transition was applied.
    pub asset: ProofAsset,
    /// The lifecycle state prior to this call.
    pub old_status: VerificationStatus,
    /// Which evidence this outcome is based on.
    pub method: VerificationMethod,
    /// Whether a fresh proof was fetched and verified during this call.
    pub fresh_proof_verified: bool,
}

impl Registry {
    /// Re-verifies a previously registered asset per the state machine in
    /// §4.7: optional receipt verification and commitment-binding check,
    /// then a live status-list check (fail-closed on `Unknown`), and
    /// optionally a fresh-proof fetch and dispatch.
    ///
    /// # Errors
    ///
    /// See [`RegistryError`] for the full set of rejection reasons.
    pub async fn re_verify(&self, req: ReVerifyRequest) -> Result<ReVerifyOutcome, RegistryError> {
        let result = self.re_verify_inner(req).await;
        self.telemetry.record_operation(
            par_telemetry::Operation::ReVerify,
            if result.is_ok() {
                par_telemetry::Outcome::Success
            } else {
                par_telemetry::Outcome::Rejected
            },
        );
        result
    }

    async fn re_verify_inner(&self, req: ReVerifyRequest) -> Result<ReVerifyOutcome, RegistryError> {
        let mut asset = self
            .store
            .get_asset(req.asset_id)
            .await?
            .ok_or(RegistryError::AssetNotFound)?;
        let old_status = asset.verification_status;

        if !req.require_fresh_proof {
            self.verify_receipt_binding(&asset, &req).await?;
        }

        let verdict = self
            .status_client
            .verify_status(&asset.status_list_url, asset.status_index_as_u64().unwrap_or_default(), asset.status_purpose)
            .await;
        let next_status = match verdict {
            Verdict::Valid => VerificationStatus::Verified,
            Verdict::Revoked => VerificationStatus::Revoked,
            Verdict::Suspended => VerificationStatus::Suspended,
            Verdict::Unknown { reason } => {
                self.telemetry.record_status_fetch_failure();
                return Err(RegistryError::StatusUnavailable { reason });
            }
        };

        let mut fresh_proof_verified = false;
        if req.require_fresh_proof {
            let bytes = self.obtain_fresh_proof_bytes(&asset, &req).await?;
            let outcome = par_verify_dispatch::verify_fresh(asset.proof_format, &bytes);
            if !outcome.ok {
                return Err(RegistryError::ProofVerificationFailed {
                    reason: outcome.reason.unwrap_or_else(|| "rejected".to_string()),
                });
            }
            fresh_proof_verified = true;
        }

        let method = if req.require_fresh_proof {
            VerificationMethod::FreshProof
        } else {
            VerificationMethod::ReceiptBased
        };

        if !old_status.can_transition_to(next_status) {
            return Err(RegistryError::InvalidTransition { from: old_status, to: next_status });
        }

        asset.verification_status = next_status;
        asset.verification_timestamp = Some(Utc::now());
        asset.updated_at = Utc::now();
        self.store.update_asset(asset.clone()).await?;

        self.store
            .insert_audit_event(
                AuditEventType::Use,
                Some(asset.asset_id),
                json!({
                    "old_status": old_status,
                    "new_status": next_status,
                    "verification_method": method,
                    "fresh_proof_verified": fresh_proof_verified,
                }),
                None,
            )
            .await?;

        Ok(ReVerifyOutcome {
            asset,
            old_status,
            method,
            fresh_proof_verified,
        })
    }

    async fn verify_receipt_binding(&self, asset: &ProofAsset, req: &ReVerifyRequest) -> Result<(), RegistryError> {
        let receipt = req.receipt.as_deref().ok_or(RegistryError::ReceiptInvalid(
            par_receipt::Rejection::MissingOrNullClaim("receipt"),
        ))?;
        let audience = self
            .config
            .receipt
            .audience
            .clone()
            .unwrap_or_else(|| "par-registry".to_string());

        let verified = par_receipt::verify(
            receipt,
            par_receipt::VerifyParams {
                key_source: par_receipt::KeySource::Static(self.key_provider.decoding_key()),
                expected_audience: &audience,
                expected_nonce: req.expected_nonce.as_deref(),
                clock_now: None,
            },
            self.replay.as_ref(),
        )
        .await
        .map_err(RegistryError::ReceiptInvalid)?;

        let expected_digest = crate::util::digest_to_base64url(&asset.proof_digest, asset.digest_alg);
        if verified.claims.proof_digest != expected_digest {
            return Err(RegistryError::DigestMismatch);
        }
        if verified.claims.policy_hash != asset.policy_hash {
            return Err(RegistryError::PolicyMismatch);
        }
        if verified.claims.constraint_hash != asset.constraint_hash {
            return Err(RegistryError::ConstraintMismatch);
        }
        if verified.claims.status_ref != asset.status_ref() {
            return Err(RegistryError::StatusRefMismatch);
        }
        Ok(())
    }

    async fn obtain_fresh_proof_bytes(&self, asset: &ProofAsset, req: &ReVerifyRequest) -> Result<Vec<u8>, RegistryError> {
        if let Some(encoded) = &req.proof_bytes {
            use base64::Engine;
            return base64::engine::general_purpose::URL_SAFE_NO_PAD
                .decode(encoded)
                .map_err(|_| RegistryError::InvalidProofBytesEncoding);
        }
        if let Some(uri) = req.proof_uri.as_deref().or(asset.proof_uri.as_deref()) {
            let expected_digest = crate::util::digest_to_base64url(&asset.proof_digest, asset.digest_alg);
            let policy = par_sri_fetch::SriFetchPolicy {
                allowed_hosts: self.config.proof_fetch.allowed_hosts.iter().cloned().collect(),
                max_bytes: self.config.proof_fetch.max_size_bytes,
                timeout: std::time::Duration::from_millis(self.config.proof_fetch.fetch_timeout_ms),
                local_http: par_sri_fetch::LocalHttpPolicy::Denied,
            };
            let bytes = par_sri_fetch::fetch_with_sri(&self.http, uri, &expected_digest, &policy)
                .await
                .inspect_err(|_| self.telemetry.record_sri_fetch_failure())?;
            return Ok(bytes);
        }
        Err(RegistryError::MissingProofSource)
    }
}
