// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "HTTPS-allowlisted, size-capped, streaming SRI-validated fresh-proof fetcher."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Fetches fresh proof bytes over HTTPS, enforcing a host allowlist, a
//! response-size cap, a timeout, and a streaming Subresource-Integrity
//! check. Bytes are never persisted by this crate; callers are expected to
//! use and drop them immediately.

use base64::Engine;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

/// Default maximum response body size: 128 KiB.
pub const DEFAULT_MAX_BYTES: u64 = 128 * 1024;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Errors raised while fetching and validating fresh proof bytes.
#[derive(Debug, Error)]
pub enum SriError {
    /// The URI could not be parsed.
    #[error("invalid proof uri: {0}")]
    InvalidUri(#[from] url::ParseError),
    /// The URI's scheme was not `https` (and not an allowed local
    /// `http://localhost` / `http://127.0.0.1` exception).
    #[error("scheme must be https (got {0})")]
    SchemeNotAllowed(String),
    /// The URI's host was not in the configured allowlist.
    #[error("host {0} is not in the configured allowlist")]
    HostNotAllowed(String),
    /// No allowlist was configured; closed by default.
    #[error("no host allowlist configured; refusing to fetch")]
    AllowlistEmpty,
    /// The request timed out or the connection failed.
    #[error("proof fetch failed: {0}")]
    FetchFailed(String),
    /// The response body exceeded `max_bytes`.
    #[error("payload too large: exceeded {0} bytes")]
    PayloadTooLarge(u64),
    /// The computed digest did not match the expected digest.
    #[error("sri digest mismatch")]
    SriDigestMismatch,
}

/// Whether `http://localhost` / `http://127.0.0.1` are permitted in place
/// of `https`, for local development and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalHttpPolicy {
    /// Only `https` is accepted.
    Denied,
    /// `http://localhost` and `http://127.0.0.1` are accepted in addition
    /// to `https`.
    AllowedForLocalhost,
}

/// Policy inputs for [`fetch_with_sri`].
#[derive(Debug, Clone)]
pub struct SriFetchPolicy {
    /// Hosts permitted as fetch targets. Empty means "closed by default":
    /// every fetch is rejected.
    pub allowed_hosts: HashSet<String>,
    /// Maximum response size, in bytes.
    pub max_bytes: u64,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Whether plain-`http` localhost exceptions are permitted.
    pub local_http: LocalHttpPolicy,
}

impl Default for SriFetchPolicy {
    fn default() -> Self {
        Self {
            allowed_hosts: HashSet::new(),
            max_bytes: DEFAULT_MAX_BYTES,
            timeout: DEFAULT_TIMEOUT,
            local_http: LocalHttpPolicy::Denied,
        }
    }
}

fn is_local_host(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost") || host == "127.0.0.1"
}

/// Validates `uri` against `policy`'s scheme and host-allowlist rules
/// without performing any network I/O.
///
/// # Errors
///
/// Returns [`SriError::InvalidUri`], [`SriError::SchemeNotAllowed`],
/// [`SriError::AllowlistEmpty`], or [`SriError::HostNotAllowed`].
pub fn validate_uri(uri: &str, policy: &SriFetchPolicy) -> Result<url::Url, SriError> {
    let parsed = url::Url::parse(uri)?;
    let scheme = parsed.scheme();
    let host = parsed.host_str().unwrap_or_default();

    let scheme_ok = scheme == "https"
        || (scheme == "http" && policy.local_http == LocalHttpPolicy::AllowedForLocalhost && is_local_host(host));
    if !scheme_ok {
        return Err(SriError::SchemeNotAllowed(scheme.to_string()));
    }

    if policy.allowed_hosts.is_empty() {
        return Err(SriError::AllowlistEmpty);
    }
    if !policy.allowed_hosts.contains(host) {
        return Err(SriError::HostNotAllowed(host.to_string()));
    }

    Ok(parsed)
}

/// Fetches `uri`, streaming the response body while tracking a running
/// SHA-256 and byte count, and validates the result against
/// `expected_digest_b64u` (base64url-encoded SHA-256).
///
/// On success returns the fetched bytes. On any failure (including a
/// digest mismatch), no prefix of the body is returned to the caller.
///
/// # Errors
///
/// See [`SriError`] variants. [`SriError::PayloadTooLarge`] is raised as
/// soon as the cumulative size crosses `policy.max_bytes`, without waiting
/// for the rest of the body.
pub async fn fetch_with_sri(
    client: &reqwest::Client,
    uri: &str,
    expected_digest_b64u: &str,
    policy: &SriFetchPolicy,
) -> Result<Vec<u8>, SriError> {
    let url = validate_uri(uri, policy)?;

    let response = tokio::time::timeout(policy.timeout, client.get(url).send())
        .await
        .map_err(|_| SriError::FetchFailed("timed out".to_string()))?
        .map_err(|e| SriError::FetchFailed(e.to_string()))?;

    if !response.status().is_success() {
        return Err(SriError::FetchFailed(format!("status {}", response.status())));
    }

    let mut hasher = Sha256::new();
    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| SriError::FetchFailed(e.to_string()))?;
        bytes.extend_from_slice(&chunk);
        if bytes.len() as u64 > policy.max_bytes {
            return Err(SriError::PayloadTooLarge(policy.max_bytes));
        }
        hasher.update(&chunk);
    }

    let digest = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize());
    if digest != expected_digest_b64u {
        return Err(SriError::SriDigestMismatch);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn policy_for(host: &str) -> SriFetchPolicy {
        let mut allowed = HashSet::new();
        allowed.insert(host.to_string());
        SriFetchPolicy {
            allowed_hosts: allowed,
            local_http: LocalHttpPolicy::AllowedForLocalhost,
            ..Default::default()
        }
    }

    #[test]
    fn validate_uri_rejects_https_required() {
        let policy = policy_for("proof.example");
        let err = validate_uri("http://proof.example/p", &policy).unwrap_err();
        assert!(matches!(err, SriError::SchemeNotAllowed(_)));
    }

    #[test]
    fn validate_uri_allows_http_localhost_when_policy_permits() {
        let policy = policy_for("localhost");
        assert!(validate_uri("http://localhost:8080/p", &policy).is_ok());
    }

    #[test]
    fn validate_uri_rejects_empty_allowlist() {
        let policy = SriFetchPolicy::default();
        let err = validate_uri("https://proof.example/p", &policy).unwrap_err();
        assert!(matches!(err, SriError::AllowlistEmpty));
    }

    #[test]
    fn validate_uri_rejects_host_not_on_allowlist() {
        let policy = policy_for("proof.example");
        let err = validate_uri("https://other.example/p", &policy).unwrap_err();
        assert!(matches!(err, SriError::HostNotAllowed(_)));
    }

    #[tokio::test]
    async fn fetch_with_sri_returns_bytes_on_digest_match() {
        let server = MockServer::start().await;
        let body = b"fresh proof bytes".to_vec();
        let digest = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(Sha256::digest(&body));
        Mock::given(method("GET"))
            .and(path("/p"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let host = server.address().ip().to_string();
        let mut allowed = HashSet::new();
        allowed.insert(host);
        let policy = SriFetchPolicy {
            allowed_hosts: allowed,
            local_http: LocalHttpPolicy::AllowedForLocalhost,
            ..Default::default()
        };

        let uri = format!("{}/p", server.uri());
        let client = reqwest::Client::new();
        let fetched = fetch_with_sri(&client, &uri, &digest, &policy).await.unwrap();
        assert_eq!(fetched, body);
    }

    #[tokio::test]
    async fn fetch_with_sri_rejects_on_digest_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/p"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fresh proof bytes".to_vec()))
            .mount(&server)
            .await;

        let host = server.address().ip().to_string();
        let mut allowed = HashSet::new();
        allowed.insert(host);
        let policy = SriFetchPolicy {
            allowed_hosts: allowed,
            local_http: LocalHttpPolicy::AllowedForLocalhost,
            ..Default::default()
        };

        let uri = format!("{}/p", server.uri());
        let client = reqwest::Client::new();
        let result = fetch_with_sri(&client, &uri, "wrong-digest", &policy).await;
        assert!(matches!(result, Err(SriError::SriDigestMismatch)));
    }

    #[tokio::test]
    async fn fetch_with_sri_rejects_oversized_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/p"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
            .mount(&server)
            .await;

        let host = server.address().ip().to_string();
        let mut allowed = HashSet::new();
        allowed.insert(host);
        let policy = SriFetchPolicy {
            allowed_hosts: allowed,
            max_bytes: 1024,
            local_http: LocalHttpPolicy::AllowedForLocalhost,
            ..Default::default()
        };

        let uri = format!("{}/p", server.uri());
        let client = reqwest::Client::new();
        let result = fetch_with_sri(&client, &uri, "irrelevant", &policy).await;
        assert!(matches!(result, Err(SriError::PayloadTooLarge(1024))));
    }
}
