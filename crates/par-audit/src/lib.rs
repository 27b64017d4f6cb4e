// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Append-only, hash-chained audit log with Merkle root and inclusion-proof export."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! An in-process, linear audit chain: each [`par_core::AuditEvent`]'s hash
//! binds the previous event's hash and its own canonicalized payload and
//! timestamp. [`merkle`] exports a capped-window Merkle root and per-event
//! inclusion proofs over the chain.

pub mod merkle;

use chrono::Utc;
use par_core::{AuditEvent, AuditEventType};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// The default cap on how many of the most recent events are included in a
/// Merkle export.
pub const DEFAULT_MERKLE_WINDOW: usize = 10_000;

/// Errors raised by [`AuditChain`] operations.
#[derive(Debug, Error)]
pub enum AuditError {
    /// An event's stored hash does not match its recomputed hash.
    #[error("hash mismatch at chain index {index}")]
    HashMismatch {
        /// The offending index.
        index: usize,
    },
    /// An event's `previous_hash` does not equal its predecessor's
    /// `event_hash`.
    #[error("broken link at chain index {index}")]
    BrokenLink {
        /// The offending index.
        index: usize,
    },
    /// The chain is empty when a non-empty chain was expected.
    #[error("audit chain is empty")]
    EmptyChain,
    /// The event payload could not be canonicalized.
    #[error("failed to canonicalize audit payload: {0}")]
    Canonicalize(#[from] par_canonical::CanonicalizationError),
}

fn compute_event_hash(
    event_type: AuditEventType,
    asset_id: Option<Uuid>,
    payload: &Value,
    previous_hash: Option<&str>,
    timestamp: chrono::DateTime<Utc>,
) -> Result<String, AuditError> {
    let payload_canonical = par_canonical::canonicalize(payload)?;
    let envelope = serde_json::json!({
        "eventType": event_type,
        "assetId": asset_id,
        "payload": payload_canonical,
        "previousHash": previous_hash,
        "timestamp": timestamp.to_rfc3339(),
    });
    let canonical_envelope = par_canonical::canonicalize(&envelope)?;
    Ok(par_canonical::sha256_hex(canonical_envelope.as_bytes()))
}

/// Returns the leaf hash used by the Merkle tree for `event`: the SHA-256
/// of the event's own canonical JSON form (distinct from `event_hash`,
/// which only covers the fields named in the chain-linking contract).
pub fn leaf_hash(event: &AuditEvent) -> Result<String, AuditError> {
    let canonical = par_canonical::canonicalize(event)?;
    Ok(par_canonical::sha256_hex(canonical.as_bytes()))
}

/// An append-only, hash-chained sequence of [`AuditEvent`]s.
#[derive(Debug, Default)]
pub struct AuditChain {
    events: Vec<AuditEvent>,
}

impl AuditChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rehydrates a chain from previously persisted events, in order,
    /// without re-validating them. Use [`AuditChain::verify`] afterwards
    /// if the source is untrusted.
    pub fn from_events(events: Vec<AuditEvent>) -> Self {
        Self { events }
    }

    /// Computes, appends, and returns the newly created event.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Canonicalize`] if `payload` cannot be
    /// canonicalized.
    pub fn append(
        &mut self,
        event_type: AuditEventType,
        asset_id: Option<Uuid>,
        payload: Value,
        trace_id: Option<String>,
    ) -> Result<&AuditEvent, AuditError> {
        let timestamp = Utc::now();
        let previous_hash = self.events.last().map(|e| e.event_hash.clone());
        let event_hash = compute_event_hash(
            event_type,
            asset_id,
            &payload,
            previous_hash.as_deref(),
            timestamp,
        )?;

        let event = AuditEvent {
            event_id: Uuid::new_v4(),
            event_type,
            asset_id,
            payload,
            trace_id,
            previous_hash,
            event_hash,
            timestamp,
        };
        self.events.push(event);
        Ok(self.events.last().expect("just pushed"))
    }

    /// Returns the number of events in the chain.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if the chain has no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns the chain's events in append order.
    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    /// Recomputes every event's hash and verifies chain linking.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::EmptyChain`], [`AuditError::HashMismatch`], or
    /// [`AuditError::BrokenLink`] on the first violation found.
    pub fn verify(&self) -> Result<(), AuditError> {
        if self.events.is_empty() {
            return Err(AuditError::EmptyChain);
        }
        for (i, event) in self.events.iter().enumerate() {
            let expected_previous = if i == 0 {
                None
            } else {
                Some(self.events[i - 1].event_hash.as_str())
            };
            if event.previous_hash.as_deref() != expected_previous {
                return Err(AuditError::BrokenLink { index: i });
            }
            let recomputed = compute_event_hash(
                event.event_type,
                event.asset_id,
                &event.payload,
                event.previous_hash.as_deref(),
                event.timestamp,
            )?;
            if recomputed != event.event_hash {
                return Err(AuditError::HashMismatch { index: i });
            }
        }
        Ok(())
    }

    /// Returns the most recent `window` events (or all of them, if fewer),
    /// together with their index offset into the full chain.
    fn windowed(&self, window: usize) -> (usize, &[AuditEvent]) {
        let start = self.events.len().saturating_sub(window);
        (start, &self.events[start..])
    }

    /// Computes the Merkle root over the most recent `window` events
    /// (default [`DEFAULT_MERKLE_WINDOW`] via [`AuditChain::merkle_root_default`]).
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Canonicalize`] if any event's leaf hash cannot
    /// be computed.
    pub fn merkle_root(&self, window: usize) -> Result<Option<String>, AuditError> {
        let (_, slice) = self.windowed(window);
        let leaves: Result<Vec<String>, AuditError> = slice.iter().map(leaf_hash).collect();
        Ok(merkle::merkle_root(&leaves?))
    }

    /// [`AuditChain::merkle_root`] with [`DEFAULT_MERKLE_WINDOW`].
    ///
    /// # Errors
    ///
    /// See [`AuditChain::merkle_root`].
    pub fn merkle_root_default(&self) -> Result<Option<String>, AuditError> {
        self.merkle_root(DEFAULT_MERKLE_WINDOW)
    }

    /// Computes the inclusion proof for the event at full-chain `index`,
    /// within the most recent `window` events. Returns `None` if `index`
    /// falls outside that window (or outside the chain entirely).
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Canonicalize`] if any event's leaf hash cannot
    /// be computed.
    pub fn merkle_proof(
        &self,
        index: usize,
        window: usize,
    ) -> Result<Option<Vec<merkle::ProofStep>>, AuditError> {
        let (start, slice) = self.windowed(window);
        if index < start || index >= self.events.len() {
            return Ok(None);
        }
        let leaves: Result<Vec<String>, AuditError> = slice.iter().map(leaf_hash).collect();
        Ok(merkle::merkle_proof(&leaves?, index - start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_event_has_no_previous_hash() {
        let mut chain = AuditChain::new();
        chain
            .append(AuditEventType::Mint, Some(Uuid::nil()), json!({"a": 1}), None)
            .unwrap();
        assert!(chain.events()[0].previous_hash.is_none());
    }

    #[test]
    fn each_event_links_to_the_previous_hash() {
        let mut chain = AuditChain::new();
        chain
            .append(AuditEventType::Mint, Some(Uuid::nil()), json!({}), None)
            .unwrap();
        chain
            .append(AuditEventType::Use, Some(Uuid::nil()), json!({"x": 2}), None)
            .unwrap();
        let first_hash = chain.events()[0].event_hash.clone();
        assert_eq!(chain.events()[1].previous_hash.as_deref(), Some(first_hash.as_str()));
        chain.verify().unwrap();
    }

    #[test]
    fn verify_detects_tampered_payload() {
        let mut chain = AuditChain::new();
        chain
            .append(AuditEventType::Mint, Some(Uuid::nil()), json!({"x": 1}), None)
            .unwrap();
        let mut events = chain.events().to_vec();
        events[0].payload = json!({"x": 999});
        let tampered = AuditChain::from_events(events);
        assert!(matches!(
            tampered.verify(),
            Err(AuditError::HashMismatch { index: 0 })
        ));
    }

    #[test]
    fn verify_detects_broken_link() {
        let mut chain = AuditChain::new();
        chain.append(AuditEventType::Mint, None, json!({}), None).unwrap();
        chain.append(AuditEventType::Use, None, json!({}), None).unwrap();
        let mut events = chain.events().to_vec();
        events[1].previous_hash = Some("0".repeat(64));
        let tampered = AuditChain::from_events(events);
        assert!(matches!(
            tampered.verify(),
            Err(AuditError::BrokenLink { index: 1 })
        ));
    }

    #[test]
    fn verify_rejects_empty_chain() {
        let chain = AuditChain::new();
        assert!(matches!(chain.verify(), Err(AuditError::EmptyChain)));
    }

    #[test]
    fn merkle_root_and_proof_round_trip_for_every_event() {
        let mut chain = AuditChain::new();
        for i in 0..10 {
            chain
                .append(AuditEventType::Use, None, json!({"i": i}), None)
                .unwrap();
        }
        let root = chain.merkle_root_default().unwrap().unwrap();
        for i in 0..10 {
            let proof = chain.merkle_proof(i, DEFAULT_MERKLE_WINDOW).unwrap().unwrap();
            let leaf = leaf_hash(&chain.events()[i]).unwrap();
            assert!(merkle::verify_merkle_proof(&leaf, &proof, &root), "event {i} failed");
        }
    }

    #[test]
    fn merkle_window_caps_exported_events() {
        let mut chain = AuditChain::new();
        for i in 0..20 {
            chain
                .append(AuditEventType::Use, None, json!({"i": i}), None)
                .unwrap();
        }
        assert!(chain.merkle_proof(5, 10).unwrap().is_none()); // outside the last-10 window
        assert!(chain.merkle_proof(15, 10).unwrap().is_some());
    }
}
