//! `IssuerDirectory`: resolves an issuer DID to its verification methods.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// A stable error code for a failed DID resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IssuerDirectoryError {
    /// The DID string did not match `did:<method>:<method-specific-id>`.
    #[error("invalid-format")]
    InvalidFormat,
    /// The DID method has no configured resolver.
    #[error("method-not-supported")]
    MethodNotSupported,
    /// Resolution did not complete within the caller's deadline.
    #[error("timeout")]
    Timeout,
    /// No record exists for this DID.
    #[error("not-found")]
    NotFound,
}

/// Resolves an issuer DID to its verification methods.
///
/// Bypassed entirely when `DID_VALIDATION_ENABLED=false` — that check is
/// the orchestrator's responsibility, not this trait's.
#[async_trait]
pub trait IssuerDirectory: Send + Sync {
    /// Resolves `did`, aborting after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an [`IssuerDirectoryError`] with a stable code.
    async fn resolve_did(&self, did: &str, timeout: Duration) -> Result<Vec<String>, IssuerDirectoryError>;
}

const SUPPORTED_METHODS: &[&str] = &["key", "web", "example"];

fn split_did(did: &str) -> Option<(&str, &str)> {
    let rest = did.strip_prefix("did:")?;
    let (method, id) = rest.split_once(':')?;
    if method.is_empty() || id.is_empty() {
        return None;
    }
    Some((method, id))
}

/// A stub [`IssuerDirectory`] returning `not-found` for every DID unless a
/// fixed table was supplied at construction — sufficient for tests and
/// demos; a production deployment would resolve against a real DID
/// method.
#[derive(Debug, Clone, Default)]
pub struct StubIssuerDirectory {
    table: HashMap<String, Vec<String>>,
}

impl StubIssuerDirectory {
    /// Creates a directory with no entries (every DID resolves
    /// `not-found`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a directory pre-populated with `did -> verification_methods`.
    pub fn with_table(table: HashMap<String, Vec<String>>) -> Self {
        Self { table }
    }
}

#[async_trait]
impl IssuerDirectory for StubIssuerDirectory {
    async fn resolve_did(&self, did: &str, _timeout: Duration) -> Result<Vec<String>, IssuerDirectoryError> {
        let (method, _) = split_did(did).ok_or(IssuerDirectoryError::InvalidFormat)?;
        if !SUPPORTED_METHODS.contains(&method) {
            return Err(IssuerDirectoryError::MethodNotSupported);
        }
        self.table.get(did).cloned().ok_or(IssuerDirectoryError::NotFound)
    }
}
