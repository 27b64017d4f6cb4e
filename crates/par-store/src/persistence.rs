//! In-memory and file-backed `PersistenceAdapter` implementations.

use async_trait::async_trait;
use par_audit::merkle::ProofStep;
use par_audit::AuditChain;
use par_core::{AuditEvent, AuditEventType, ProofAsset, StatusList};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Errors raised by a [`PersistenceAdapter`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An asset with the same commitment already exists.
    #[error("commitment conflict: an asset with this commitment already exists")]
    CommitmentConflict,
    /// The referenced asset does not exist.
    #[error("asset not found")]
    AssetNotFound,
    /// Disk I/O failed for a file-backed operation.
    #[error("persistence I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A stored record could not be (de)serialized.
    #[error("persistence serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Audit-chain computation failed.
    #[error("audit chain error: {0}")]
    Audit(#[from] par_audit::AuditError),
}

/// Transactional CRUD for [`ProofAsset`], [`AuditEvent`], and [`StatusList`].
///
/// `insert_audit_event` is serializable with every prior insert (§5's
/// linearizability requirement for the hash chain). `update_status_list_with_etag`
/// reports whether the `If-Match` precondition held rather than silently
/// overwriting a concurrently updated list.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Looks up an asset by primary key.
    async fn get_asset(&self, id: Uuid) -> Result<Option<ProofAsset>, StoreError>;

    /// Looks up an asset by its unique commitment CID.
    async fn get_asset_by_commitment(&self, commitment: &str) -> Result<Option<ProofAsset>, StoreError>;

    /// Inserts a new asset.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CommitmentConflict`] if `asset.commitment`
    /// already exists.
    async fn insert_asset(&self, asset: ProofAsset) -> Result<(), StoreError>;

    /// Replaces a previously inserted asset in place.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AssetNotFound`] if no asset with this id
    /// exists yet.
    async fn update_asset(&self, asset: ProofAsset) -> Result<(), StoreError>;

    /// Returns up to `limit` most-recently-created assets, newest first.
    async fn list_recent_assets(&self, limit: usize) -> Result<Vec<ProofAsset>, StoreError>;

    /// Looks up a status list by its normalized URL.
    async fn get_status_list(&self, url: &str) -> Result<Option<StatusList>, StoreError>;

    /// Inserts or replaces a status list wholesale (used at creation time).
    async fn upsert_status_list(&self, list: StatusList) -> Result<(), StoreError>;

    /// Updates a status list's bitstring, honoring an optional `If-Match`
    /// precondition.
    ///
    /// Returns `true` if the update was applied (the precondition held, or
    /// none was supplied), `false` if `if_match` did not equal the stored
    /// etag (a `409`-class caller response).
    async fn update_status_list_with_etag(
        &self,
        url: &str,
        new_bitstring: Vec<u8>,
        new_etag: String,
        if_match: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Appends a new audit event, serialized with respect to every prior
    /// append against the same store.
    async fn insert_audit_event(
        &self,
        event_type: AuditEventType,
        asset_id: Option<Uuid>,
        payload: Value,
        trace_id: Option<String>,
    ) -> Result<AuditEvent, StoreError>;

    /// Returns up to `limit` most-recent audit events, newest first.
    async fn list_audit_events(&self, limit: usize) -> Result<Vec<AuditEvent>, StoreError>;

    /// Computes the Merkle root over the most recent `window` audit
    /// events.
    async fn merkle_root(&self, window: usize) -> Result<Option<String>, StoreError>;

    /// Computes the inclusion proof for the audit event at full-chain
    /// `index`, within the most recent `window` events.
    async fn merkle_proof(&self, index: usize, window: usize) -> Result<Option<Vec<ProofStep>>, StoreError>;
}

/// An in-memory [`PersistenceAdapter`] backed by `tokio::sync::RwLock`-guarded
/// maps. The audit chain is serialized behind its own [`Mutex`] to satisfy
/// the single-writer linearizability requirement.
#[derive(Default)]
pub struct MemoryStore {
    assets: RwLock<HashMap<Uuid, ProofAsset>>,
    commitments: RwLock<HashMap<String, Uuid>>,
    status_lists: RwLock<HashMap<String, StatusList>>,
    audit: Mutex<AuditChain>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryStore {
    async fn get_asset(&self, id: Uuid) -> Result<Option<ProofAsset>, StoreError> {
        Ok(self.assets.read().await.get(&id).cloned())
    }

    async fn get_asset_by_commitment(&self, commitment: &str) -> Result<Option<ProofAsset>, StoreError> {
        let commitments = self.commitments.read().await;
        match commitments.get(commitment) {
            Some(id) => Ok(self.assets.read().await.get(id).cloned()),
            None => Ok(None),
        }
    }

    async fn insert_asset(&self, asset: ProofAsset) -> Result<(), StoreError> {
        let mut commitments = self.commitments.write().await;
        if commitments.contains_key(&asset.commitment) {
            return Err(StoreError::CommitmentConflict);
        }
        commitments.insert(asset.commitment.clone(), asset.asset_id);
        self.assets.write().await.insert(asset.asset_id, asset);
        Ok(())
    }

    async fn update_asset(&self, asset: ProofAsset) -> Result<(), StoreError> {
        let mut assets = self.assets.write().await;
        if !assets.contains_key(&asset.asset_id) {
            return Err(StoreError::AssetNotFound);
        }
        assets.insert(asset.asset_id, asset);
        Ok(())
    }

    async fn list_recent_assets(&self, limit: usize) -> Result<Vec<ProofAsset>, StoreError> {
        let assets = self.assets.read().await;
        let mut all: Vec<ProofAsset> = assets.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        Ok(all)
    }

    async fn get_status_list(&self, url: &str) -> Result<Option<StatusList>, StoreError> {
        Ok(self.status_lists.read().await.get(url).cloned())
    }

    async fn upsert_status_list(&self, list: StatusList) -> Result<(), StoreError> {
        self.status_lists.write().await.insert(list.url.clone(), list);
        Ok(())
    }

    async fn update_status_list_with_etag(
        &self,
        url: &str,
        new_bitstring: Vec<u8>,
        new_etag: String,
        if_match: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut lists = self.status_lists.write().await;
        let Some(existing) = lists.get_mut(url) else {
            return Ok(false);
        };
        if let Some(expected) = if_match {
            if existing.etag != expected {
                return Ok(false);
            }
        }
        existing.bitstring = new_bitstring;
        existing.etag = new_etag;
        existing.updated_at = chrono::Utc::now();
        Ok(true)
    }

    async fn insert_audit_event(
        &self,
        event_type: AuditEventType,
        asset_id: Option<Uuid>,
        payload: Value,
        trace_id: Option<String>,
    ) -> Result<AuditEvent, StoreError> {
        let mut chain = self.audit.lock().await;
        let event = chain.append(event_type, asset_id, payload, trace_id)?;
        Ok(event.clone())
    }

    async fn list_audit_events(&self, limit: usize) -> Result<Vec<AuditEvent>, StoreError> {
        let chain = self.audit.lock().await;
        let events = chain.events();
        let start = events.len().saturating_sub(limit);
        Ok(events[start..].iter().rev().cloned().collect())
    }

    async fn merkle_root(&self, window: usize) -> Result<Option<String>, StoreError> {
        Ok(self.audit.lock().await.merkle_root(window)?)
    }

    async fn merkle_proof(&self, index: usize, window: usize) -> Result<Option<Vec<ProofStep>>, StoreError> {
        Ok(self.audit.lock().await.merkle_proof(index, window)?)
    }
}

fn asset_path(root: &Path, id: Uuid) -> PathBuf {
    root.join(format!("{id}.json"))
}

/// Persists `asset` to `<root>/<asset_id>.json`, mirroring the receipt
/// persistence helper this store's in-process cache defers to for
/// process-restart recovery in the demo deployment.
///
/// # Errors
///
/// Returns [`StoreError::Io`] or [`StoreError::Serde`] on failure.
pub async fn persist_asset(root: &Path, asset: &ProofAsset) -> Result<(), StoreError> {
    tokio::fs::create_dir_all(root).await?;
    let path = asset_path(root, asset.asset_id);
    let bytes = serde_json::to_vec_pretty(asset)?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

/// Loads every `<root>/*.json` asset file into `store`, logging and
/// skipping (rather than failing) any file that cannot be parsed.
///
/// # Errors
///
/// Returns [`StoreError::Io`] only if `root` itself cannot be read; a
/// missing directory is treated as "nothing to hydrate".
pub async fn hydrate_assets_from_disk(root: &Path, store: &MemoryStore) -> Result<usize, StoreError> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut loaded = 0usize;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(err) => {
                tracing::error!(path = %path.display(), error = ?err, "failed to read asset file");
                continue;
            }
        };
        let asset: ProofAsset = match serde_json::from_slice(&bytes) {
            Ok(a) => a,
            Err(err) => {
                tracing::error!(path = %path.display(), error = ?err, "failed to parse asset file");
                continue;
            }
        };
        let _ = store.insert_asset(asset).await;
        loaded += 1;
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use par_core::{DigestAlg, ProofFormat, StatusPurpose, VerificationStatus};
    use serde_json::json;

    fn sample_asset(commitment: &str) -> ProofAsset {
        let now = Utc::now();
        ProofAsset {
            asset_id: Uuid::new_v4(),
            commitment: commitment.into(),
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
            policy_cid: "bafypolicy".into(),
            circuit_or_schema_id: None,
            circuit_cid: None,
            schema_cid: None,
            content_cids: vec![],
            license: None,
            status_list_url: "https://status.example/list".into(),
            status_list_index: "1".into(),
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

    #[tokio::test]
    async fn insert_then_get_roundtrips() {
        let store = MemoryStore::new();
        let asset = sample_asset("bafy1");
        let id = asset.asset_id;
        store.insert_asset(asset).await.unwrap();
        let fetched = store.get_asset(id).await.unwrap().unwrap();
        assert_eq!(fetched.commitment, "bafy1");
    }

    #[tokio::test]
    async fn duplicate_commitment_is_rejected() {
        let store = MemoryStore::new();
        store.insert_asset(sample_asset("bafy1")).await.unwrap();
        let err = store.insert_asset(sample_asset("bafy1")).await.unwrap_err();
        assert!(matches!(err, StoreError::CommitmentConflict));
    }

    #[tokio::test]
    async fn update_status_list_honors_etag_precondition() {
        let store = MemoryStore::new();
        let list = StatusList::new_empty("https://status.example/list", StatusPurpose::Revocation, 16);
        let etag = list.etag.clone();
        store.upsert_status_list(list).await.unwrap();

        let rejected = store
            .update_status_list_with_etag(
                "https://status.example/list",
                vec![1, 2],
                "new-etag".into(),
                Some("wrong-etag"),
            )
            .await
            .unwrap();
        assert!(!rejected);

        let applied = store
            .update_status_list_with_etag(
                "https://status.example/list",
                vec![1, 2],
                "new-etag".into(),
                Some(&etag),
            )
            .await
            .unwrap();
        assert!(applied);
    }

    #[tokio::test]
    async fn audit_events_chain_and_merkle_root_are_consistent() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .insert_audit_event(AuditEventType::Use, None, json!({"i": i}), None)
                .await
                .unwrap();
        }
        let root = store.merkle_root(100).await.unwrap();
        assert!(root.is_some());
        let proof = store.merkle_proof(2, 100).await.unwrap();
        assert!(proof.is_some());
    }

    #[tokio::test]
    async fn persist_and_hydrate_asset_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let asset = sample_asset("bafy-persisted");
        persist_asset(dir.path(), &asset).await.unwrap();

        let store = MemoryStore::new();
        let loaded = hydrate_assets_from_disk(dir.path(), &store).await.unwrap();
        assert_eq!(loaded, 1);
        assert!(store.get_asset(asset.asset_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn hydrate_missing_directory_is_a_noop() {
        let store = MemoryStore::new();
        let loaded = hydrate_assets_from_disk(Path::new("/nonexistent/dir/for/par"), &store)
            .await
            .unwrap();
        assert_eq!(loaded, 0);
    }
}
