// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and environment overlay for the
//! registry daemon.
//!
//! [`ParConfig`] is the top-level runtime configuration; [`load_config`]
//! loads an optional TOML file and applies environment variable overrides on
//! top, and [`validate_config`] separates hard errors from advisory
//! [`ConfigWarning`]s.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent startup but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A recommended field is missing in a production environment.
    MissingInProduction {
        /// Name of the missing field.
        field: String,
        /// Why it matters.
        hint: String,
    },
    /// A timeout or size value is unusually large.
    UnusuallyLarge {
        /// Field name.
        field: String,
        /// The configured value, formatted for display.
        value: String,
    },
    /// DID validation is disabled, which weakens issuer authenticity checks.
    DidValidationDisabled,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::MissingInProduction { field, hint } => {
                write!(f, "missing '{field}' in production: {hint}")
            }
            ConfigWarning::UnusuallyLarge { field, value } => {
                write!(f, "'{field}' is unusually large ({value})")
            }
            ConfigWarning::DidValidationDisabled => {
                write!(f, "DID_VALIDATION_ENABLED=false: issuer DIDs are not resolved")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Deployment environment, affecting which [`ConfigWarning`]s are raised.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development; missing allowlists and ephemeral keys are fine.
    Development,
    /// Production; missing allowlists and ephemeral keys are flagged.
    Production,
}

impl Default for Environment {
    fn default() -> Self {
        Self::Development
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, for local development.
    Plain,
    /// Newline-delimited JSON, for log aggregation.
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Plain
    }
}

/// Status list fetch settings (see `par-status-client`).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct StatusConfig {
    /// Base URL prefix for resolving relative status list references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Maximum cache staleness before a fetch is forced, in milliseconds.
    #[serde(default = "default_max_staleness_ms")]
    pub max_staleness_ms: u64,
    /// Fetch timeout, in milliseconds.
    #[serde(default = "default_status_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

fn default_max_staleness_ms() -> u64 {
    86_400_000
}

fn default_status_timeout_ms() -> u64 {
    3_000
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            max_staleness_ms: default_max_staleness_ms(),
            fetch_timeout_ms: default_status_timeout_ms(),
        }
    }
}

/// Fresh-proof (SRI) fetch settings (see `par-sri-fetch`).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ProofFetchConfig {
    /// Maximum proof byte size accepted from an external URI.
    #[serde(default = "default_proof_max_bytes")]
    pub max_size_bytes: u64,
    /// Fetch timeout, in milliseconds.
    #[serde(default = "default_proof_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// Hosts external proof URIs may be fetched from. Required (non-empty)
    /// in production.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
}

fn default_proof_max_bytes() -> u64 {
    131_072
}

fn default_proof_timeout_ms() -> u64 {
    3_000
}

impl Default for ProofFetchConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: default_proof_max_bytes(),
            fetch_timeout_ms: default_proof_timeout_ms(),
            allowed_hosts: Vec::new(),
        }
    }
}

/// Receipt signing/verification settings (see `par-receipt`, `par-store`).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ReceiptConfig {
    /// The ES256 private key, as a JWK JSON string. Required in production;
    /// when absent, an ephemeral development key is generated at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifier_private_jwk: Option<String>,
    /// The ES256 public key, as a JWK JSON string, matching
    /// `verifier_private_jwk`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifier_public_jwk: Option<String>,
    /// The `aud` claim value expected on receipts issued by this instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
}

impl Default for ReceiptConfig {
    fn default() -> Self {
        Self {
            verifier_private_jwk: None,
            verifier_public_jwk: None,
            audience: None,
        }
    }
}

/// API key identifier generation settings.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ApiKeyConfig {
    /// Prefix prepended to generated key identifiers (e.g. `"park"`).
    #[serde(default = "default_apikey_prefix")]
    pub id_prefix: String,
    /// Number of random bytes in a generated API key secret.
    #[serde(default = "default_apikey_secret_bytes")]
    pub secret_bytes: u32,
}

fn default_apikey_prefix() -> String {
    "park".to_string()
}

fn default_apikey_secret_bytes() -> u32 {
    32
}

impl Default for ApiKeyConfig {
    fn default() -> Self {
        Self {
            id_prefix: default_apikey_prefix(),
            secret_bytes: default_apikey_secret_bytes(),
        }
    }
}

/// Top-level runtime configuration for the registry daemon.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ParConfig {
    /// Deployment environment.
    #[serde(default)]
    pub env: Environment,
    /// Address the HTTP control plane binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Whether issuer DIDs are resolved and checked against
    /// `ProofAsset.issuerDid` (see `par-store`'s `IssuerDirectory`).
    #[serde(default = "default_true")]
    pub did_validation_enabled: bool,
    /// Maximum number of leaves included in an exported Merkle proof
    /// window (see `par-audit`).
    #[serde(default = "default_merkle_window")]
    pub audit_merkle_window: usize,
    /// Status list fetch settings.
    #[serde(default)]
    pub status: StatusConfig,
    /// Fresh-proof fetch settings.
    #[serde(default)]
    pub proof_fetch: ProofFetchConfig,
    /// Receipt signing settings.
    #[serde(default)]
    pub receipt: ReceiptConfig,
    /// API key generation settings.
    #[serde(default)]
    pub api_key: ApiKeyConfig,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8088".to_string()
}

fn default_true() -> bool {
    true
}

fn default_merkle_window() -> usize {
    10_000
}

impl Default for ParConfig {
    fn default() -> Self {
        Self {
            env: Environment::default(),
            bind_addr: default_bind_addr(),
            log_format: LogFormat::default(),
            did_validation_enabled: default_true(),
            audit_merkle_window: default_merkle_window(),
            status: StatusConfig::default(),
            proof_fetch: ProofFetchConfig::default(),
            receipt: ReceiptConfig::default(),
            api_key: ApiKeyConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Loads a [`ParConfig`] from an optional TOML file path, then applies
/// environment variable overrides on top.
///
/// # Errors
///
/// Returns [`ConfigError::FileNotFound`] if `path` is `Some` and the file
/// does not exist, or [`ConfigError::ParseError`] if its contents are not
/// valid TOML for this shape.
pub fn load_config(path: Option<&Path>) -> Result<ParConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => ParConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parses a TOML string into a [`ParConfig`].
///
/// # Errors
///
/// Returns [`ConfigError::ParseError`] if `content` is not valid TOML for
/// this shape.
pub fn parse_toml(content: &str) -> Result<ParConfig, ConfigError> {
    toml::from_str::<ParConfig>(content).map_err(|e| ConfigError::ParseError { reason: e.to_string() })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Applies environment variable overrides.
///
/// Recognised variables: `PAR_ENV`, `PAR_BIND_ADDR`, `PAR_LOG_FORMAT`,
/// `DID_VALIDATION_ENABLED`, `PAR_AUDIT_MERKLE_WINDOW`,
/// `STATUS_BASE_URL`, `STATUS_MAX_STALENESS_MS`, `STATUS_FETCH_TIMEOUT_MS`,
/// `PROOF_MAX_SIZE_BYTES`, `PROOF_FETCH_TIMEOUT_MS`, `PROOF_ALLOWED_HOSTS`
/// (comma-separated), `RECEIPT_VERIFIER_PRIVATE_JWK`,
/// `RECEIPT_VERIFIER_PUBLIC_JWK`, `RECEIPT_AUDIENCE`, `APIKEY_ID_PREFIX`,
/// `APIKEY_SECRET_BYTES`.
pub fn apply_env_overrides(config: &mut ParConfig) {
    if let Ok(val) = std::env::var("PAR_ENV") {
        config.env = match val.to_lowercase().as_str() {
            "production" => Environment::Production,
            _ => Environment::Development,
        };
    }
    if let Ok(val) = std::env::var("PAR_BIND_ADDR") {
        config.bind_addr = val;
    }
    if let Ok(val) = std::env::var("PAR_LOG_FORMAT") {
        config.log_format = match val.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Plain,
        };
    }
    if let Ok(val) = std::env::var("DID_VALIDATION_ENABLED") {
        config.did_validation_enabled = parse_bool(&val).unwrap_or(config.did_validation_enabled);
    }
    if let Ok(val) = std::env::var("PAR_AUDIT_MERKLE_WINDOW")
        && let Ok(n) = val.parse()
    {
        config.audit_merkle_window = n;
    }
    if let Ok(val) = std::env::var("STATUS_BASE_URL") {
        config.status.base_url = Some(val);
    }
    if let Ok(val) = std::env::var("STATUS_MAX_STALENESS_MS")
        && let Ok(n) = val.parse()
    {
        config.status.max_staleness_ms = n;
    }
    if let Ok(val) = std::env::var("STATUS_FETCH_TIMEOUT_MS")
        && let Ok(n) = val.parse()
    {
        config.status.fetch_timeout_ms = n;
    }
    if let Ok(val) = std::env::var("PROOF_MAX_SIZE_BYTES")
        && let Ok(n) = val.parse()
    {
        config.proof_fetch.max_size_bytes = n;
    }
    if let Ok(val) = std::env::var("PROOF_FETCH_TIMEOUT_MS")
        && let Ok(n) = val.parse()
    {
        config.proof_fetch.fetch_timeout_ms = n;
    }
    if let Ok(val) = std::env::var("PROOF_ALLOWED_HOSTS") {
        config.proof_fetch.allowed_hosts =
            val.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect();
    }
    if let Ok(val) = std::env::var("RECEIPT_VERIFIER_PRIVATE_JWK") {
        config.receipt.verifier_private_jwk = Some(val);
    }
    if let Ok(val) = std::env::var("RECEIPT_VERIFIER_PUBLIC_JWK") {
        config.receipt.verifier_public_jwk = Some(val);
    }
    if let Ok(val) = std::env::var("RECEIPT_AUDIENCE") {
        config.receipt.audience = Some(val);
    }
    if let Ok(val) = std::env::var("APIKEY_ID_PREFIX") {
        config.api_key.id_prefix = val;
    }
    if let Ok(val) = std::env::var("APIKEY_SECRET_BYTES")
        && let Ok(n) = val.parse()
    {
        config.api_key.secret_bytes = n;
    }
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

const LARGE_STALENESS_MS: u64 = 7 * 24 * 60 * 60 * 1000;
const LARGE_PROOF_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Validates a parsed configuration, returning advisory warnings.
///
/// Hard errors (a production deployment with no receipt signing key
/// configured, or a zero-sized Merkle window) are returned as a
/// [`ConfigError::ValidationError`]; soft issues come back as warnings.
///
/// # Errors
///
/// Returns [`ConfigError::ValidationError`] if one or more hard constraints
/// are violated.
pub fn validate_config(config: &ParConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if config.audit_merkle_window == 0 {
        errors.push("audit_merkle_window must be greater than zero".to_string());
    }

    let is_production = config.env == Environment::Production;

    if is_production && config.proof_fetch.allowed_hosts.is_empty() {
        errors.push("PROOF_ALLOWED_HOSTS must be non-empty in production".to_string());
    }

    if is_production && config.receipt.verifier_private_jwk.is_none() {
        warnings.push(ConfigWarning::MissingInProduction {
            field: "receipt.verifier_private_jwk".to_string(),
            hint: "an ephemeral key will be generated and lost on restart".to_string(),
        });
    }

    if is_production && config.receipt.audience.is_none() {
        warnings.push(ConfigWarning::MissingInProduction {
            field: "receipt.audience".to_string(),
            hint: "receipts will omit an enforceable audience".to_string(),
        });
    }

    if !config.did_validation_enabled {
        warnings.push(ConfigWarning::DidValidationDisabled);
    }

    if config.status.max_staleness_ms > LARGE_STALENESS_MS {
        warnings.push(ConfigWarning::UnusuallyLarge {
            field: "status.max_staleness_ms".to_string(),
            value: config.status.max_staleness_ms.to_string(),
        });
    }

    if config.proof_fetch.max_size_bytes > LARGE_PROOF_SIZE_BYTES {
        warnings.push(ConfigWarning::UnusuallyLarge {
            field: "proof_fetch.max_size_bytes".to_string(),
            value: config.proof_fetch.max_size_bytes.to_string(),
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_development_and_valid() {
        let cfg = ParConfig::default();
        assert_eq!(cfg.env, Environment::Development);
        let warnings = validate_config(&cfg).expect("default config should be valid");
        assert!(warnings.is_empty(), "development defaults should not warn: {warnings:?}");
    }

    #[test]
    fn production_without_allowed_hosts_is_rejected() {
        let mut cfg = ParConfig::default();
        cfg.env = Environment::Production;
        let err = validate_config(&cfg).unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("PROOF_ALLOWED_HOSTS")));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn production_without_receipt_key_warns_but_does_not_fail() {
        let mut cfg = ParConfig::default();
        cfg.env = Environment::Production;
        cfg.proof_fetch.allowed_hosts = vec!["status.example.com".to_string()];
        let warnings = validate_config(&cfg).expect("missing key is advisory, not fatal");
        assert!(
            warnings
                .iter()
                .any(|w| matches!(w, ConfigWarning::MissingInProduction { field, .. } if field.contains("private_jwk")))
        );
    }

    #[test]
    fn zero_merkle_window_is_rejected() {
        let mut cfg = ParConfig::default();
        cfg.audit_merkle_window = 0;
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn did_validation_disabled_warns() {
        let mut cfg = ParConfig::default();
        cfg.did_validation_enabled = false;
        let warnings = validate_config(&cfg).unwrap();
        assert!(warnings.contains(&ConfigWarning::DidValidationDisabled));
    }

    #[test]
    fn parse_valid_toml_string() {
        let toml_str = r#"
            env = "production"
            bind_addr = "0.0.0.0:9000"

            [proof_fetch]
            allowed_hosts = ["status.example.com"]

            [receipt]
            audience = "https://registry.example.com"
        "#;
        let cfg = parse_toml(toml_str).unwrap();
        assert_eq!(cfg.env, Environment::Production);
        assert_eq!(cfg.bind_addr, "0.0.0.0:9000");
        assert_eq!(cfg.proof_fetch.allowed_hosts, vec!["status.example.com".to_string()]);
        assert_eq!(cfg.receipt.audience.as_deref(), Some("https://registry.example.com"));
    }

    #[test]
    fn parse_invalid_toml_gives_parse_error() {
        let bad = "this is [not valid toml =";
        let err = parse_toml(bad).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn empty_string_toml_parses_to_defaults() {
        let cfg = parse_toml("").unwrap();
        assert_eq!(cfg, ParConfig::default());
    }

    #[test]
    fn env_overrides_apply_on_top_of_defaults() {
        // SAFETY: test runs single-threaded with respect to these vars via
        // the default test harness's process-wide env, scoped to this test.
        unsafe {
            std::env::set_var("PAR_BIND_ADDR", "10.0.0.1:1234");
            std::env::set_var("PROOF_ALLOWED_HOSTS", " a.example.com ,b.example.com,");
        }
        let mut cfg = ParConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.bind_addr, "10.0.0.1:1234");
        assert_eq!(
            cfg.proof_fetch.allowed_hosts,
            vec!["a.example.com".to_string(), "b.example.com".to_string()]
        );
        unsafe {
            std::env::remove_var("PAR_BIND_ADDR");
            std::env::remove_var("PROOF_ALLOWED_HOSTS");
        }
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("par.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "bind_addr = \"127.0.0.1:7777\"").unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.bind_addr, "127.0.0.1:7777");
    }

    #[test]
    fn load_missing_file_gives_file_not_found() {
        let err = load_config(Some(Path::new("/nonexistent/par.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn load_none_returns_default() {
        let cfg = load_config(None).unwrap();
        assert_eq!(cfg, ParConfig::default());
    }

    #[test]
    fn toml_roundtrip() {
        let mut cfg = ParConfig::default();
        cfg.env = Environment::Production;
        cfg.proof_fetch.allowed_hosts = vec!["a.example.com".to_string()];
        let serialized = toml::to_string(&cfg).unwrap();
        let deserialized: ParConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(cfg, deserialized);
    }

    #[test]
    fn large_staleness_and_proof_size_warn() {
        let mut cfg = ParConfig::default();
        cfg.status.max_staleness_ms = LARGE_STALENESS_MS + 1;
        cfg.proof_fetch.max_size_bytes = LARGE_PROOF_SIZE_BYTES + 1;
        let warnings = validate_config(&cfg).unwrap();
        assert_eq!(warnings.iter().filter(|w| matches!(w, ConfigWarning::UnusuallyLarge { .. })).count(), 2);
    }

    #[test]
    fn config_error_display() {
        let e = ConfigError::FileNotFound { path: "/foo".into() };
        assert!(e.to_string().contains("/foo"));
    }

    #[test]
    fn config_warning_display() {
        let w = ConfigWarning::MissingInProduction {
            field: "x".into(),
            hint: "y".into(),
        };
        assert!(w.to_string().contains('x'));
        assert!(ConfigWarning::DidValidationDisabled.to_string().contains("DID"));
    }
}
