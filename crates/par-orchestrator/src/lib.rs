// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Verification state machine: register, re-verify, and status-update operations."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Owns the verification state machine for each [`par_core::ProofAsset`] and
//! the append-only audit log. Ties together every collaborator crate
//! (persistence, receipts, status lists, SRI fetch, fresh-proof dispatch,
//! authentication, issuer resolution, and key material) into the three
//! operations a registry exposes: register, re-verify, and status-update.

mod register;
mod reverify;
mod status_update;
mod util;

pub use register::{RegisterOutcome, RegisterRequest};
pub use reverify::{ReVerifyOutcome, ReVerifyRequest, VerificationMethod};
pub use status_update::{StatusUpdateOutcome, StatusUpdateRequest};

use par_config::ParConfig;
use par_error::ErrorCode;
use par_receipt::ReplayStore;
use par_status_client::StatusListClient;
use par_store::{Authenticator, IssuerDirectory, KeyProvider, PersistenceAdapter, StoreError};
use par_telemetry::RegistryTelemetry;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by the registry operations, each mapping onto a stable
/// [`ErrorCode`] for the HTTP control plane to translate into a problem
/// response.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// `proofDigest` did not match the encoding required by `digestAlg`.
    #[error("invalid digest: {0}")]
    InvalidDigest(#[from] par_core::validate::DigestValidationError),
    /// Generic request validation failure, with a short machine-stable reason.
    #[error("validation failed: {reason}")]
    ValidationFailed {
        /// Stable reason string.
        reason: String,
    },
    /// Issuer DID resolution failed.
    #[error("issuer resolution failed: {0}")]
    IssuerResolution(#[from] par_store::IssuerDirectoryError),
    /// The resolved issuer DID has no verification methods.
    #[error("issuer has no verification methods")]
    NoVerificationMethod,
    /// Fresh-proof verification rejected the supplied bytes.
    #[error("fresh proof verification failed: {reason}")]
    ProofVerificationFailed {
        /// The dispatcher's rejection reason.
        reason: String,
    },
    /// The commitment computed for a new asset collides with an existing one.
    #[error("commitment already registered")]
    CommitmentConflict,
    /// Receipt generation failed.
    #[error("receipt generation failed: {0}")]
    ReceiptGeneration(#[from] par_receipt::GenerateError),
    /// The referenced asset does not exist.
    #[error("asset not found")]
    AssetNotFound,
    /// Receipt verification was rejected, with a specific stable reason.
    #[error("receipt invalid: {0}")]
    ReceiptInvalid(par_receipt::Rejection),
    /// The receipt's bound digest does not match the asset's stored digest.
    #[error("receipt proof_digest does not match the asset's stored digest")]
    DigestMismatch,
    /// The receipt's bound policy hash does not match the asset's.
    #[error("receipt policy_hash does not match the asset's stored policy hash")]
    PolicyMismatch,
    /// The receipt's bound constraint hash does not match the asset's.
    #[error("receipt constraint_hash does not match the asset's stored constraint hash")]
    ConstraintMismatch,
    /// The receipt's bound status ref does not match the asset's.
    #[error("receipt status_ref does not match the asset's status-list binding")]
    StatusRefMismatch,
    /// The status list could not be consulted; callers must fail closed.
    #[error("status list unavailable: {reason}")]
    StatusUnavailable {
        /// The underlying fetch failure reason.
        reason: String,
    },
    /// Fresh-proof bytes could not be obtained or failed SRI validation.
    #[error("proof fetch failed: {0}")]
    ProofFetch(#[from] par_sri_fetch::SriError),
    /// A caller supplied neither `proof_bytes` nor `proof_uri` while
    /// requesting a fresh-proof re-verify.
    #[error("fresh proof requested but neither proof_bytes nor proof_uri was supplied")]
    MissingProofSource,
    /// A caller-supplied `proof_bytes` value was not valid base64url.
    #[error("proof_bytes was not valid base64url")]
    InvalidProofBytesEncoding,
    /// A status-list update's `If-Match` precondition did not hold.
    #[error("etag precondition failed")]
    EtagMismatch,
    /// Applying a bitstring operation failed.
    #[error("bitstring operation failed: {0}")]
    Bitstring(#[from] par_bitstring::BitstringError),
    /// A canonicalization or audit-chain step failed.
    #[error("audit chain error: {0}")]
    Audit(#[from] par_audit::AuditError),
    /// The persistence layer raised an unexpected error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// No credential was supplied, or the credential matched no API key.
    #[error("unauthorized")]
    Unauthorized,
    /// The credential's key is inactive, outside its validity window, or
    /// lacks the scope the operation requires.
    #[error("forbidden")]
    Forbidden,
    /// The requested lifecycle transition is not legal from the asset's
    /// current [`par_core::VerificationStatus`].
    #[error("invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// The asset's status before this operation.
        from: par_core::VerificationStatus,
        /// The status this operation attempted to assign.
        to: par_core::VerificationStatus,
    },
}

impl From<par_store::AuthError> for RegistryError {
    fn from(err: par_store::AuthError) -> Self {
        match err {
            par_store::AuthError::Unauthorized => Self::Unauthorized,
            par_store::AuthError::Forbidden => Self::Forbidden,
        }
    }
}

impl RegistryError {
    /// Maps this error onto the stable [`ErrorCode`] the HTTP layer reports.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidDigest(_) => ErrorCode::InvalidDigest,
            Self::ValidationFailed { .. } | Self::IssuerResolution(_) | Self::NoVerificationMethod => {
                ErrorCode::ValidationFailed
            }
            Self::ProofVerificationFailed { .. } => ErrorCode::ProofVerificationFailed,
            Self::CommitmentConflict => ErrorCode::CommitmentConflict,
            Self::ReceiptGeneration(_) => ErrorCode::Internal,
            Self::AssetNotFound => ErrorCode::AssetNotFound,
            Self::ReceiptInvalid(_) => ErrorCode::ReceiptInvalid,
            Self::DigestMismatch => ErrorCode::DigestMismatch,
            Self::PolicyMismatch => ErrorCode::PolicyMismatch,
            Self::ConstraintMismatch => ErrorCode::ConstraintMismatch,
            Self::StatusRefMismatch => ErrorCode::StatusRefMismatch,
            Self::StatusUnavailable { .. } => ErrorCode::StatusUnavailable,
            Self::ProofFetch(par_sri_fetch::SriError::SriDigestMismatch) => ErrorCode::SriDigestMismatch,
            Self::ProofFetch(par_sri_fetch::SriError::PayloadTooLarge(_)) => ErrorCode::PayloadTooLarge,
            Self::ProofFetch(_) => ErrorCode::ProofFetchFailed,
            Self::MissingProofSource | Self::InvalidProofBytesEncoding => ErrorCode::ValidationFailed,
            Self::EtagMismatch => ErrorCode::EtagMismatch,
            Self::Bitstring(_) => ErrorCode::ValidationFailed,
            Self::Audit(_) => ErrorCode::Internal,
            Self::Store(StoreError::CommitmentConflict) => ErrorCode::CommitmentConflict,
            Self::Store(StoreError::AssetNotFound) => ErrorCode::AssetNotFound,
            Self::Store(_) => ErrorCode::Internal,
            Self::Unauthorized => ErrorCode::Unauthorized,
            Self::Forbidden => ErrorCode::Forbidden,
            Self::InvalidTransition { .. } => ErrorCode::ValidationFailed,
        }
    }

    /// Converts this error into a [`par_error::ParError`] carrying its code.
    pub fn into_par_error(self) -> par_error::ParError {
        let code = self.code();
        par_error::ParError::new(code, self.to_string())
    }
}

/// The collaborators a [`Registry`] operates against, grouped so
/// construction sites do not need nine positional arguments.
pub struct Registry {
    pub(crate) store: Arc<dyn PersistenceAdapter>,
    pub(crate) authenticator: Arc<dyn Authenticator>,
    pub(crate) issuer_directory: Arc<dyn IssuerDirectory>,
    pub(crate) key_provider: Arc<dyn KeyProvider>,
    pub(crate) status_client: Arc<StatusListClient>,
    pub(crate) replay: Arc<dyn ReplayStore>,
    pub(crate) telemetry: Arc<RegistryTelemetry>,
    pub(crate) http: reqwest::Client,
    pub(crate) config: ParConfig,
}

impl Registry {
    /// Constructs a registry from its required collaborators and
    /// configuration, with a default [`reqwest::Client`] for SRI fetches.
    pub fn new(
        store: Arc<dyn PersistenceAdapter>,
        authenticator: Arc<dyn Authenticator>,
        issuer_directory: Arc<dyn IssuerDirectory>,
        key_provider: Arc<dyn KeyProvider>,
        status_client: Arc<StatusListClient>,
        replay: Arc<dyn ReplayStore>,
        telemetry: Arc<RegistryTelemetry>,
        config: ParConfig,
    ) -> Self {
        Self {
            store,
            authenticator,
            issuer_directory,
            key_provider,
            status_client,
            replay,
            telemetry,
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Overrides the HTTP client used for fresh-proof SRI fetches (tests
    /// typically point this at a mock server with relaxed TLS).
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// The authenticator this registry validates bearer credentials against.
    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    /// The telemetry sink this registry records operation outcomes to.
    pub fn telemetry(&self) -> &RegistryTelemetry {
        &self.telemetry
    }

    /// The persistence adapter backing this registry, for read-only
    /// endpoints (list/get asset, list audit events, Merkle export) that do
    /// not belong to the register/re-verify/status-update state machine.
    pub fn store(&self) -> &dyn PersistenceAdapter {
        self.store.as_ref()
    }

    /// This registry's effective configuration.
    pub fn config(&self) -> &ParConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::RegisterRequest;
    use crate::reverify::ReVerifyRequest;
    use crate::status_update::StatusUpdateRequest;
    use par_bitstring::BitOp;
    use par_core::{DigestAlg, ProofFormat, StatusPurpose};
    use par_receipt::InMemoryReplayStore;
    use par_store::{DevKeyProvider, InMemoryAuthenticator, MemoryStore, StubIssuerDirectory};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sha256_hex(data: &[u8]) -> String {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(data);
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    fn test_registry(status_base_url: &str) -> Registry {
        let mut config = ParConfig::default();
        config.status.base_url = Some(status_base_url.to_string());
        config.did_validation_enabled = false;
        Registry::new(
            Arc::new(MemoryStore::new()),
            Arc::new(InMemoryAuthenticator::new()),
            Arc::new(StubIssuerDirectory::new()),
            Arc::new(DevKeyProvider::generate().unwrap()),
            Arc::new(StatusListClient::new()),
            Arc::new(InMemoryReplayStore::new()),
            Arc::new(RegistryTelemetry::new()),
            config,
        )
    }

    fn base_register_request() -> RegisterRequest {
        let proof_bytes = b"opaque proof bytes".to_vec();
        RegisterRequest {
            proof_format: ProofFormat::Other,
            proof_digest: sha256_hex(&proof_bytes),
            digest_alg: DigestAlg::Sha2_256,
            proof_ref: proof_bytes,
            proof_uri: None,
            issuer_did: "did:example:issuer".to_string(),
            subject_binding: None,
            policy_cid: "bafy-policy".to_string(),
            policy_hash: sha256_hex(b"policy"),
            constraint_cid: None,
            constraint_hash: sha256_hex(b"constraint"),
            circuit_or_schema_id: None,
            circuit_cid: None,
            schema_cid: None,
            content_cids: Vec::new(),
            license: None,
            proof_id: "proof-1".to_string(),
            attestations: None,
            status_purpose: StatusPurpose::Revocation,
            partner_id: None,
        }
    }

    #[tokio::test]
    async fn register_then_status_list_is_created_and_asset_persisted() {
        let registry = test_registry("https://status.example");
        let outcome = registry.register(base_register_request()).await.unwrap();
        assert_eq!(outcome.asset.verification_status, VerificationStatus::Verified);
        assert!(!outcome.receipt.is_empty());

        let list = registry
            .store()
            .get_status_list(&outcome.asset.status_list_url)
            .await
            .unwrap()
            .expect("status list should be created on first allocation");
        assert_eq!(list.size, par_core::DEFAULT_STATUS_LIST_SIZE);
    }

    #[tokio::test]
    async fn register_rejects_a_duplicate_commitment() {
        let registry = test_registry("https://status.example");
        registry.register(base_register_request()).await.unwrap();
        let err = registry.register(base_register_request()).await.unwrap_err();
        assert!(matches!(err, RegistryError::CommitmentConflict));
        assert_eq!(err.code(), ErrorCode::CommitmentConflict);
    }

    #[tokio::test]
    async fn reverify_with_receipt_binding_fails_closed_when_status_list_unreachable() {
        let registry = test_registry("https://127.0.0.1:9");
        let outcome = registry.register(base_register_request()).await.unwrap();

        let err = registry
            .re_verify(ReVerifyRequest {
                asset_id: outcome.asset.asset_id,
                receipt: Some(outcome.receipt.clone()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::StatusUnavailable { .. }));
        assert_eq!(err.code(), ErrorCode::StatusUnavailable);
    }

    #[tokio::test]
    async fn reverify_with_receipt_binding_succeeds_against_a_live_status_list() {
        let server = MockServer::start().await;
        let bytes = vec![0u8; par_core::DEFAULT_STATUS_LIST_SIZE as usize / 8];
        let encoded = par_bitstring::encode_gzip_b64(&bytes).unwrap();
        Mock::given(method("GET"))
            .and(path("/revocation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "credentialSubject": { "encodedList": encoded }
            })))
            .mount(&server)
            .await;

        let registry = test_registry(&server.uri());
        let outcome = registry.register(base_register_request()).await.unwrap();

        let reverified = registry
            .re_verify(ReVerifyRequest {
                asset_id: outcome.asset.asset_id,
                receipt: Some(outcome.receipt.clone()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(reverified.old_status, VerificationStatus::Verified);
        assert_eq!(reverified.asset.verification_status, VerificationStatus::Verified);
        assert_eq!(reverified.method, VerificationMethod::ReceiptBased);
        assert!(!reverified.fresh_proof_verified);
    }

    #[tokio::test]
    async fn reverify_rejects_a_receipt_with_mismatched_proof_digest() {
        let server = MockServer::start().await;
        let bytes = vec![0u8; par_core::DEFAULT_STATUS_LIST_SIZE as usize / 8];
        let encoded = par_bitstring::encode_gzip_b64(&bytes).unwrap();
        Mock::given(method("GET"))
            .and(path("/revocation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "credentialSubject": { "encodedList": encoded }
            })))
            .mount(&server)
            .await;

        let registry = test_registry(&server.uri());
        let outcome = registry.register(base_register_request()).await.unwrap();

        let mut tampered = registry.store().get_asset(outcome.asset.asset_id).await.unwrap().unwrap();
        tampered.proof_digest = sha256_hex(b"different proof bytes entirely");
        registry.store().update_asset(tampered).await.unwrap();

        let err = registry
            .re_verify(ReVerifyRequest {
                asset_id: outcome.asset.asset_id,
                receipt: Some(outcome.receipt.clone()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::DigestMismatch));
    }

    #[tokio::test]
    async fn status_update_sets_a_bit_and_rejects_a_stale_etag() {
        let registry = test_registry("https://status.example");
        let outcome = registry.register(base_register_request()).await.unwrap();
        let asset = outcome.asset;
        let list = registry
            .store()
            .get_status_list(&asset.status_list_url)
            .await
            .unwrap()
            .unwrap();

        let index: u64 = asset.status_list_index.parse().unwrap();
        let updated = registry
            .status_update(StatusUpdateRequest {
                status_list_url: asset.status_list_url.clone(),
                operations: vec![BitOp::Set { index }],
                if_match: Some(list.etag.clone()),
            })
            .await
            .unwrap();
        assert_ne!(updated.etag, list.etag);

        let err = registry
            .status_update(StatusUpdateRequest {
                status_list_url: asset.status_list_url.clone(),
                operations: vec![BitOp::Clear { index }],
                if_match: Some(list.etag),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::EtagMismatch));

        let after = registry.store().get_status_list(&asset.status_list_url).await.unwrap().unwrap();
        assert_eq!(par_bitstring::bit_at(&after.bitstring, index), 1);
    }
}
