// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Pure, format-tagged fresh-proof verifier dispatcher."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Dispatches fresh-proof bytes to a format-specific verifier. No network
//! I/O and no side effects: every function here is a pure transform from
//! bytes to a verdict.

use par_core::ProofFormat;
use serde_json::Value;

/// The outcome of [`verify_fresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    /// Whether the bytes were accepted for this format.
    pub ok: bool,
    /// A short machine-stable reason, present on rejection or on a
    /// provisional accept.
    pub reason: Option<String>,
    /// Derived metadata (e.g. `{"alg": "ES256", "typ": "JWT"}` for JWS).
    pub metadata: Option<Value>,
}

impl VerifyOutcome {
    fn accept(metadata: Option<Value>) -> Self {
        Self {
            ok: true,
            reason: None,
            metadata,
        }
    }

    fn accept_provisional(reason: &str) -> Self {
        Self {
            ok: true,
            reason: Some(reason.to_string()),
            metadata: None,
        }
    }

    fn reject(reason: &str) -> Self {
        Self {
            ok: false,
            reason: Some(reason.to_string()),
            metadata: None,
        }
    }
}

fn verify_jws(bytes: &[u8]) -> VerifyOutcome {
    let text = match std::str::from_utf8(bytes) {
        Ok(t) => t,
        Err(_) => return VerifyOutcome::reject("not_utf8"),
    };
    let parts: Vec<&str> = text.split('.').collect();
    if parts.len() != 3 {
        return VerifyOutcome::reject("not_compact_jws");
    }

    let header_bytes = match base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, parts[0]) {
        Ok(b) => b,
        Err(_) => return VerifyOutcome::reject("invalid_header_encoding"),
    };
    let header: Value = match serde_json::from_slice(&header_bytes) {
        Ok(v) => v,
        Err(_) => return VerifyOutcome::reject("invalid_header_json"),
    };

    let alg = header.get("alg").and_then(Value::as_str).unwrap_or("");
    if alg.eq_ignore_ascii_case("none") {
        return VerifyOutcome::reject("algorithm_not_allowed");
    }

    let typ = header.get("typ").and_then(Value::as_str);
    VerifyOutcome::accept(Some(serde_json::json!({ "alg": alg, "typ": typ })))
}

fn verify_zk_proof(bytes: &[u8]) -> VerifyOutcome {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(_)) => VerifyOutcome::accept_provisional(
            "zk_proof verification is a stub pending circuit-addressed verification keys",
        ),
        Ok(_) => VerifyOutcome::reject("zk_proof_payload_not_an_object"),
        Err(_) => VerifyOutcome::reject("zk_proof_payload_not_json"),
    }
}

/// Dispatches `bytes` to the verifier for `format`.
///
/// Only [`ProofFormat::Jws`] performs real structural validation today
/// (full signature verification against an issuer JWKS is a planned
/// extension, not implemented here). [`ProofFormat::ZkProof`] requires a
/// JSON object shape and otherwise accepts provisionally. Every other
/// format accepts provisionally with a `not_yet_implemented` reason.
pub fn verify_fresh(format: ProofFormat, bytes: &[u8]) -> VerifyOutcome {
    match format {
        ProofFormat::Jws => verify_jws(bytes),
        ProofFormat::ZkProof => verify_zk_proof(bytes),
        ProofFormat::LdProof
        | ProofFormat::HwAttestation
        | ProofFormat::MerkleProof
        | ProofFormat::BlockchainTxProof
        | ProofFormat::Other => VerifyOutcome::accept_provisional("not_yet_implemented"),
    }
}
