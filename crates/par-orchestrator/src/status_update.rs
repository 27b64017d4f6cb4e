//! The `status-update` operation: applies bit mutations to a status list
//! under an optimistic-concurrency `If-Match` precondition.

use crate::{Registry, RegistryError};
use par_bitstring::{apply_ops, BitOp};
use par_core::AuditEventType;
use serde_json::json;
use uuid::Uuid;

/// Inputs to [`Registry::status_update`].
#[derive(Debug, Clone)]
pub struct StatusUpdateRequest {
    /// The normalized status-list URL to update.
    pub status_list_url: String,
    /// The bit mutations to apply, in order.
    pub operations: Vec<BitOp>,
    /// An optional `If-Match` precondition; if present, must equal the
    /// list's stored etag or the update is rejected.
    pub if_match: Option<String>,
}

/// The result of a successful [`Registry::status_update`] call.
#[derive(Debug, Clone)]
pub struct StatusUpdateOutcome {
    /// The list's etag after the update was applied.
    pub etag: String,
}

impl Registry {
    /// Applies `req.operations` to the status list at `req.status_list_url`,
    /// honoring an optional `If-Match` precondition, and appends a
    /// `STATUS_UPDATE` audit event.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::EtagMismatch`] if `if_match` does not equal
    /// the list's stored etag, or [`RegistryError::Bitstring`] if an
    /// operation's index is out of range.
    pub async fn status_update(&self, req: StatusUpdateRequest) -> Result<StatusUpdateOutcome, RegistryError> {
        let result = self.status_update_inner(req).await;
        self.telemetry.record_operation(
            par_telemetry::Operation::StatusUpdate,
            if result.is_ok() {
                par_telemetry::Outcome::Success
            } else {
                par_telemetry::Outcome::Rejected
            },
        );
        result
    }

    async fn status_update_inner(&self, req: StatusUpdateRequest) -> Result<StatusUpdateOutcome, RegistryError> {
        let list = self
            .store
            .get_status_list(&req.status_list_url)
            .await?
            .ok_or(RegistryError::Store(par_store::StoreError::AssetNotFound))?;

        if let Some(expected) = &req.if_match {
            if &list.etag != expected {
                return Err(RegistryError::EtagMismatch);
            }
        }

        let mut bitstring = list.bitstring.clone();
        apply_ops(&mut bitstring, list.size, &req.operations)?;
        let new_etag = format!("W/\"{}\"", Uuid::new_v4());

        let applied = self
            .store
            .update_status_list_with_etag(&req.status_list_url, bitstring, new_etag.clone(), req.if_match.as_deref())
            .await?;
        if !applied {
            return Err(RegistryError::EtagMismatch);
        }

        self.store
            .insert_audit_event(
                AuditEventType::StatusUpdate,
                None,
                json!({
                    "status_list_url": req.status_list_url,
                    "operations": req.operations,
                    "new_etag": new_etag,
                }),
                None,
            )
            .await?;

        Ok(StatusUpdateOutcome { etag: new_etag })
    }
}
