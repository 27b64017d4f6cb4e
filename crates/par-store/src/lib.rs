// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "PersistenceAdapter, KeyProvider, Authenticator, and IssuerDirectory collaborators."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! In-process and file-backed implementations of the collaborator traits
//! the orchestrator depends on, sufficient to run the whole registry
//! without an external database.

mod auth;
mod issuer;
mod keys;
mod persistence;

pub use auth::{AuthContext, AuthError, Authenticator, InMemoryAuthenticator, Scope, parse_scopes_csv};
pub use issuer::{IssuerDirectory, IssuerDirectoryError, StubIssuerDirectory};
pub use keys::{ConfigKeyProvider, DevKeyProvider, JwksKeyProvider, KeyProvider, KeyProviderError};
pub use persistence::{MemoryStore, PersistenceAdapter, StoreError, hydrate_assets_from_disk, persist_asset};
