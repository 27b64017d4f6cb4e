//! `Authenticator`: maps a request credential to a partner/key/scope
//! context.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use uuid::Uuid;

/// A scope an API key may be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Scope {
    /// Permits `POST /proof-assets`.
    RegisterAsset,
    /// Permits `POST /proof-assets/:id/verify`.
    VerifyAsset,
    /// Permits `POST /status-lists/:purpose/update`.
    UpdateStatus,
    /// Permits the `/audit-*` read endpoints.
    ReadAudit,
}

impl Scope {
    fn parse(token: &str) -> Option<Self> {
        match token.trim() {
            "register_asset" => Some(Self::RegisterAsset),
            "verify_asset" => Some(Self::VerifyAsset),
            "update_status" => Some(Self::UpdateStatus),
            "read_audit" => Some(Self::ReadAudit),
            _ => None,
        }
    }
}

/// Parses a CSV `scopes` column into a [`BTreeSet<Scope>`] once, at
/// authentication time, rather than on every authorization check.
/// Unrecognized tokens are skipped.
pub fn parse_scopes_csv(csv: &str) -> BTreeSet<Scope> {
    csv.split(',').filter_map(Scope::parse).collect()
}

/// Errors raised while authenticating a request credential.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No key matches the supplied credential.
    #[error("unauthorized")]
    Unauthorized,
    /// The key exists but is inactive or outside its validity window.
    #[error("forbidden")]
    Forbidden,
}

/// The authenticated context the orchestrator consumes for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// The authenticated partner.
    pub partner_id: Uuid,
    /// The specific API key used.
    pub key_id: Uuid,
    /// The key's parsed scopes.
    pub scopes: BTreeSet<Scope>,
}

/// Maps a request credential header to an [`AuthContext`].
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authenticates `credential` (the raw bearer token).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthorized`] if no key matches, or
    /// [`AuthError::Forbidden`] if the matching key is inactive or outside
    /// its validity window.
    async fn authenticate(&self, credential: &str) -> Result<AuthContext, AuthError>;
}

#[derive(Debug, Clone)]
struct ApiKeyRecord {
    partner_id: Uuid,
    key_id: Uuid,
    scopes: BTreeSet<Scope>,
    active: bool,
    not_before: Option<DateTime<Utc>>,
    not_after: Option<DateTime<Utc>>,
}

/// An in-memory [`Authenticator`] sufficient for tests and single-process
/// deployments. Keys are registered by plaintext bearer token (a
/// production deployment would index by a hash of the token plus a
/// pepper).
#[derive(Default)]
pub struct InMemoryAuthenticator {
    keys: BTreeMap<String, ApiKeyRecord>,
}

impl InMemoryAuthenticator {
    /// Creates an authenticator with no registered keys.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a key under `bearer_token`, parsing `scopes_csv` into a
    /// [`BTreeSet<Scope>`] immediately.
    pub fn register_key(
        &mut self,
        bearer_token: impl Into<String>,
        partner_id: Uuid,
        key_id: Uuid,
        scopes_csv: &str,
        not_before: Option<DateTime<Utc>>,
        not_after: Option<DateTime<Utc>>,
    ) {
        self.keys.insert(
            bearer_token.into(),
            ApiKeyRecord {
                partner_id,
                key_id,
                scopes: parse_scopes_csv(scopes_csv),
                active: true,
                not_before,
                not_after,
            },
        );
    }

    /// Deactivates a previously registered key.
    pub fn deactivate(&mut self, bearer_token: &str) {
        if let Some(record) = self.keys.get_mut(bearer_token) {
            record.active = false;
        }
    }
}

#[async_trait]
impl Authenticator for InMemoryAuthenticator {
    async fn authenticate(&self, credential: &str) -> Result<AuthContext, AuthError> {
        let record = self.keys.get(credential).ok_or(AuthError::Unauthorized)?;
        let now = Utc::now();
        let within_window = record.not_before.is_none_or(|nb| now >= nb)
            && record.not_after.is_none_or(|na| now <= na);
        if !record.active || !within_window {
            return Err(AuthError::Forbidden);
        }
        Ok(AuthContext {
            partner_id: record.partner_id,
            key_id: record.key_id,
            scopes: record.scopes.clone(),
        })
    }
}
