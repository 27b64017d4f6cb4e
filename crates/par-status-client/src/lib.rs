// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "ETag-cached, fail-closed W3C Bitstring Status List HTTP client."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Fetches, normalizes, and caches W3C Bitstring Status Lists. Never serves
//! data staler than the caller's configured bound: unreachable endpoints
//! and expired cache entries both fail closed rather than returning a
//! possibly-wrong verdict.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use par_bitstring::{get_credential_status, CredentialStatus, StatusPurposeTag};
use par_core::StatusPurpose;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors that prevent a usable status-list fetch.
#[derive(Debug, Error)]
pub enum StatusError {
    /// The URL could not be parsed.
    #[error("invalid status list url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// No cache entry exists and the endpoint could not be reached in time.
    #[error("status list unreachable and no cache available")]
    Unreachable,
    /// A cache entry exists but is older than the allowed staleness bound,
    /// and the endpoint could not be freshly fetched.
    #[error("status list endpoint unreachable and cache is stale")]
    Stale,
    /// The response body was not a valid status-list payload.
    #[error("invalid status list payload: {0}")]
    InvalidPayload(String),
}

/// The verdict for a single status-list bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The bit is clear.
    Valid,
    /// The bit is set and purpose is revocation.
    Revoked,
    /// The bit is set and purpose is suspension.
    Suspended,
    /// The status could not be determined; callers must treat this as
    /// fail-closed.
    Unknown {
        /// A short, stable reason string.
        reason: String,
    },
}

/// Options controlling a single [`StatusListClient::fetch`] call.
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    /// Maximum age of a cache entry before it is evicted and treated as
    /// absent.
    pub max_staleness: Duration,
    /// Per-request network timeout.
    pub timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_staleness: Duration::from_secs(24 * 60 * 60),
            timeout: Duration::from_secs(3),
        }
    }
}

/// The result of a successful [`StatusListClient::fetch`].
#[derive(Debug, Clone)]
pub struct Fetched {
    /// The decoded (ungzipped) bitstring bytes.
    pub bitstring: Vec<u8>,
    /// The list's current ETag.
    pub etag: String,
    /// Whether this result came from the cache (304 or cache-only serve).
    pub from_cache: bool,
    /// Age of the cache entry used, or zero for a fresh fetch.
    pub age: Duration,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    bitstring: Vec<u8>,
    etag: String,
    fetched_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CredentialSubject {
    #[serde(rename = "encodedList")]
    encoded_list: String,
}

#[derive(Debug, Deserialize)]
struct StatusListPayload {
    #[serde(rename = "credentialSubject")]
    credential_subject: CredentialSubject,
}

/// Normalizes `url`: lowercases scheme and host, strips default ports
/// (80 for `http`, 443 for `https`), and strips a trailing slash from any
/// non-root path.
///
/// # Errors
///
/// Returns [`StatusError::InvalidUrl`] if `url` cannot be parsed.
pub fn normalize(raw_url: &str) -> Result<String, StatusError> {
    let mut parsed = url::Url::parse(raw_url)?;
    let scheme_lc = parsed.scheme().to_ascii_lowercase();
    let _ = parsed.set_scheme(&scheme_lc);

    if let Some(host) = parsed.host_str() {
        let host_lc = host.to_ascii_lowercase();
        let _ = parsed.set_host(Some(&host_lc));
    }

    let default_port = match parsed.scheme() {
        "https" => Some(443),
        "http" => Some(80),
        _ => None,
    };
    if parsed.port() == default_port {
        let _ = parsed.set_port(None);
    }

    let path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        parsed.set_path(path.trim_end_matches('/'));
    }

    Ok(parsed.to_string())
}

/// A cached, ETag-aware W3C Bitstring Status List HTTP client.
pub struct StatusListClient {
    http: reqwest::Client,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl Default for StatusListClient {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusListClient {
    /// Creates a client with a fresh, empty cache.
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Fetches (or serves from cache) the status list at `raw_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StatusError::Unreachable`] or [`StatusError::Stale`] if
    /// the endpoint cannot be reached and no usably-fresh cache entry
    /// exists; never silently serves data older than
    /// `opts.max_staleness`.
    pub async fn fetch(&self, raw_url: &str, opts: FetchOptions) -> Result<Fetched, StatusError> {
        let normalized = normalize(raw_url)?;
        let now = Utc::now();
        let max_staleness = ChronoDuration::from_std(opts.max_staleness).unwrap_or(ChronoDuration::zero());

        let mut cached = {
            let guard = self.cache.read().await;
            guard.get(&normalized).cloned()
        };
        if let Some(entry) = &cached {
            if now - entry.fetched_at > max_staleness {
                self.cache.write().await.remove(&normalized);
                cached = None;
            }
        }

        let mut request = self.http.get(&normalized);
        if let Some(entry) = &cached {
            request = request.header(reqwest::header::IF_NONE_MATCH, entry.etag.clone());
        }

        let response = match tokio::time::timeout(opts.timeout, request.send()).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) | Err(_) => {
                return if cached.is_some() {
                    Err(StatusError::Stale)
                } else {
                    Err(StatusError::Unreachable)
                };
            }
        };

        if response.status() == StatusCode::NOT_MODIFIED {
            return match cached {
                Some(entry) => {
                    self.cache.write().await.insert(
                        normalized.clone(),
                        CacheEntry {
                            bitstring: entry.bitstring.clone(),
                            etag: entry.etag.clone(),
                            fetched_at: now,
                        },
                    );
                    Ok(Fetched {
                        bitstring: entry.bitstring,
                        etag: entry.etag,
                        from_cache: true,
                        age: Duration::from_secs(0),
                    })
                }
                None => Err(StatusError::Unreachable),
            };
        }

        if !response.status().is_success() {
            return if cached.is_some() {
                Err(StatusError::Stale)
            } else {
                Err(StatusError::Unreachable)
            };
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| format!("W/\"{now}\""));

        let body: StatusListPayload = response
            .json()
            .await
            .map_err(|e| StatusError::InvalidPayload(e.to_string()))?;

        let bitstring = par_bitstring::decode_gzip_b64(&body.credential_subject.encoded_list)
            .map_err(|e| StatusError::InvalidPayload(e.to_string()))?;

        self.cache.write().await.insert(
            normalized,
            CacheEntry {
                bitstring: bitstring.clone(),
                etag: etag.clone(),
                fetched_at: now,
            },
        );

        Ok(Fetched {
            bitstring,
            etag,
            from_cache: false,
            age: Duration::from_secs(0),
        })
    }

    /// Fetches the list at `raw_url` and returns the [`Verdict`] for `index`
    /// under `purpose`. Any fetch failure maps to [`Verdict::Unknown`]
    /// rather than propagating an error — callers must treat `Unknown` as
    /// fail-closed.
    pub async fn verify_status(&self, raw_url: &str, index: u64, purpose: StatusPurpose) -> Verdict {
        let tag = match purpose {
            StatusPurpose::Revocation => StatusPurposeTag::Revocation,
            StatusPurpose::Suspension => StatusPurposeTag::Suspension,
        };
        let fetched = match self.fetch(raw_url, FetchOptions::default()).await {
            Ok(f) => f,
            Err(e) => return Verdict::Unknown { reason: e.to_string() },
        };

        let encoded = match par_bitstring::encode_gzip_b64(&fetched.bitstring) {
            Ok(e) => e,
            Err(e) => return Verdict::Unknown { reason: e.to_string() },
        };

        match get_credential_status(&encoded, index, tag) {
            Ok((CredentialStatus::Valid, _)) => Verdict::Valid,
            Ok((CredentialStatus::Revoked, _)) => Verdict::Revoked,
            Ok((CredentialStatus::Suspended, _)) => Verdict::Suspended,
            Err(e) => Verdict::Unknown { reason: e.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn normalize_lowercases_and_strips_default_port_and_trailing_slash() {
        assert_eq!(
            normalize("HTTPS://Status.Example:443/list/").unwrap(),
            "https://status.example/list"
        );
        assert_eq!(
            normalize("http://status.example:8080/list").unwrap(),
            "http://status.example:8080/list"
        );
        assert_eq!(normalize("https://status.example/").unwrap(), "https://status.example/");
    }

    fn gzip_b64_list(size_bits: usize, set_bit: Option<u64>) -> String {
        let mut bytes = vec![0u8; size_bits / 8];
        if let Some(idx) = set_bit {
            bytes[(idx / 8) as usize] |= 1 << (idx % 8);
        }
        par_bitstring::encode_gzip_b64(&bytes).unwrap()
    }

    #[tokio::test]
    async fn fetch_parses_and_caches_a_fresh_list() {
        let server = MockServer::start().await;
        let encoded = gzip_b64_list(64, None);
        Mock::given(method("GET"))
            .and(path("/list"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "\"v1\"")
                    .set_body_json(serde_json::json!({
                        "credentialSubject": { "encodedList": encoded }
                    })),
            )
            .mount(&server)
            .await;

        let client = StatusListClient::new();
        let url = format!("{}/list", server.uri());
        let fetched = client.fetch(&url, FetchOptions::default()).await.unwrap();
        assert_eq!(fetched.etag, "\"v1\"");
        assert!(!fetched.from_cache);
    }

    #[tokio::test]
    async fn verify_status_reports_revoked_bit() {
        let server = MockServer::start().await;
        let encoded = gzip_b64_list(64, Some(5));
        Mock::given(method("GET"))
            .and(path("/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "credentialSubject": { "encodedList": encoded }
            })))
            .mount(&server)
            .await;

        let client = StatusListClient::new();
        let url = format!("{}/list", server.uri());
        let verdict = client.verify_status(&url, 5, StatusPurpose::Revocation).await;
        assert_eq!(verdict, Verdict::Revoked);
    }

    #[tokio::test]
    async fn verify_status_unknown_when_unreachable_and_no_cache() {
        let client = StatusListClient::new();
        let verdict = client
            .verify_status("https://127.0.0.1:9/list", 0, StatusPurpose::Revocation)
            .await;
        assert!(matches!(verdict, Verdict::Unknown { .. }));
    }

    #[tokio::test]
    async fn fetch_fails_closed_on_server_error_with_no_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/list"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = StatusListClient::new();
        let url = format!("{}/list", server.uri());
        let result = client.fetch(&url, FetchOptions::default()).await;
        assert!(matches!(result, Err(StatusError::Unreachable)));
    }
}
