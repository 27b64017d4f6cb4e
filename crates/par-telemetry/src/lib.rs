// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structured telemetry counters for the registry daemon's `/health`
//! endpoint.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// The registry operations telemetry is tracked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// `POST /proof-assets`.
    RegisterAsset,
    /// `POST /proof-assets/:id/verify`.
    ReVerify,
    /// `POST /status-lists/:purpose/update`.
    StatusUpdate,
    /// An audit event append.
    AuditAppend,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Operation::RegisterAsset => "register_asset",
            Operation::ReVerify => "re_verify",
            Operation::StatusUpdate => "status_update",
            Operation::AuditAppend => "audit_append",
        }
    }

    const ALL: [Operation; 4] = [
        Operation::RegisterAsset,
        Operation::ReVerify,
        Operation::StatusUpdate,
        Operation::AuditAppend,
    ];
}

/// Whether an operation succeeded or was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The operation completed successfully.
    Success,
    /// The operation was rejected (a `VerificationStatus` other than
    /// `verified`, or a hard validation failure).
    Rejected,
}

#[derive(Debug, Default)]
struct OperationCounters {
    success: AtomicU64,
    rejected: AtomicU64,
}

// ---------------------------------------------------------------------------
// RegistryTelemetry
// ---------------------------------------------------------------------------

/// Process-wide counters for registry operations and JTI replay hits.
///
/// Cloning is cheap: all counters live behind shared atomics, mirroring the
/// daemon's other shared-state collaborators.
pub struct RegistryTelemetry {
    counters: BTreeMap<Operation, OperationCounters>,
    replay_hits: AtomicU64,
    sri_fetch_failures: AtomicU64,
    status_fetch_failures: AtomicU64,
    last_event: Mutex<Option<String>>,
}

impl Default for RegistryTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryTelemetry {
    /// Creates a telemetry instance with every counter at zero.
    pub fn new() -> Self {
        let counters = Operation::ALL.into_iter().map(|op| (op, OperationCounters::default())).collect();
        Self {
            counters,
            replay_hits: AtomicU64::new(0),
            sri_fetch_failures: AtomicU64::new(0),
            status_fetch_failures: AtomicU64::new(0),
            last_event: Mutex::new(None),
        }
    }

    /// Records the outcome of a registry operation and emits a structured
    /// tracing event.
    pub fn record_operation(&self, op: Operation, outcome: Outcome) {
        let counters = self.counters.get(&op).expect("Operation::ALL is exhaustive");
        match outcome {
            Outcome::Success => counters.success.fetch_add(1, Ordering::Relaxed),
            Outcome::Rejected => counters.rejected.fetch_add(1, Ordering::Relaxed),
        };
        info!(operation = op.as_str(), outcome = ?outcome, "registry_operation");
        self.set_last_event(op.as_str());
    }

    /// Records a detected JTI replay attempt.
    pub fn record_replay_hit(&self) {
        self.replay_hits.fetch_add(1, Ordering::Relaxed);
        info!("jti_replay_detected");
        self.set_last_event("jti_replay_detected");
    }

    /// Records a failed SRI fetch (size cap, digest mismatch, host not
    /// allowlisted, or transport failure).
    pub fn record_sri_fetch_failure(&self) {
        self.sri_fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed status list fetch that resulted in a fail-closed
    /// `unknown` verdict.
    pub fn record_status_fetch_failure(&self) {
        self.status_fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn set_last_event(&self, name: &str) {
        let mut guard = self.last_event.lock().expect("telemetry lock poisoned");
        *guard = Some(name.to_string());
    }

    /// Takes a consistent point-in-time snapshot of all counters, suitable
    /// for serving from `/health`.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let operations = self
            .counters
            .iter()
            .map(|(op, c)| {
                (
                    op.as_str().to_string(),
                    OperationCount {
                        success: c.success.load(Ordering::Relaxed),
                        rejected: c.rejected.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();
        TelemetrySnapshot {
            operations,
            jti_replay_hits: self.replay_hits.load(Ordering::Relaxed),
            sri_fetch_failures: self.sri_fetch_failures.load(Ordering::Relaxed),
            status_fetch_failures: self.status_fetch_failures.load(Ordering::Relaxed),
            last_event: self.last_event.lock().expect("telemetry lock poisoned").clone(),
        }
    }
}

/// Success/rejection counts for a single [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationCount {
    /// Number of successful invocations.
    pub success: u64,
    /// Number of rejected invocations.
    pub rejected: u64,
}

/// A point-in-time, serializable view of [`RegistryTelemetry`]'s counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Per-operation success/rejection counts, keyed by [`Operation::as_str`].
    pub operations: BTreeMap<String, OperationCount>,
    /// Total JTI replay attempts detected.
    pub jti_replay_hits: u64,
    /// Total SRI fetches that failed validation.
    pub sri_fetch_failures: u64,
    /// Total status list fetches that fell back to a fail-closed verdict.
    pub status_fetch_failures: u64,
    /// The name of the most recently recorded event, if any.
    pub last_event: Option<String>,
}

// ---------------------------------------------------------------------------
// Health report
// ---------------------------------------------------------------------------

/// The overall liveness state reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// The process is serving requests normally.
    Ok,
    /// The process is running but degraded (e.g. status list fetches are
    /// persistently failing).
    Degraded,
}

/// The JSON body served by `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Overall liveness state.
    pub status: HealthStatus,
    /// Process uptime, in seconds.
    pub uptime_seconds: u64,
    /// The current telemetry snapshot.
    pub telemetry: TelemetrySnapshot,
}

/// Degradation threshold: if fetch failures exceed this since startup,
/// [`HealthStatus::Degraded`] is reported.
const DEGRADED_FAILURE_THRESHOLD: u64 = 50;

/// Builds a [`HealthReport`] from a telemetry snapshot and process uptime.
pub fn build_health_report(telemetry: &RegistryTelemetry, uptime_seconds: u64) -> HealthReport {
    let snapshot = telemetry.snapshot();
    let status = if snapshot.sri_fetch_failures + snapshot.status_fetch_failures > DEGRADED_FAILURE_THRESHOLD {
        HealthStatus::Degraded
    } else {
        HealthStatus::Ok
    };
    HealthReport { status, uptime_seconds, telemetry: snapshot }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn new_telemetry_has_zeroed_counters() {
        let t = RegistryTelemetry::new();
        let snap = t.snapshot();
        assert_eq!(snap.jti_replay_hits, 0);
        assert_eq!(snap.operations.len(), Operation::ALL.len());
        for count in snap.operations.values() {
            assert_eq!(count.success, 0);
            assert_eq!(count.rejected, 0);
        }
    }

    #[test]
    fn record_operation_increments_correct_bucket() {
        let t = RegistryTelemetry::new();
        t.record_operation(Operation::RegisterAsset, Outcome::Success);
        t.record_operation(Operation::RegisterAsset, Outcome::Success);
        t.record_operation(Operation::RegisterAsset, Outcome::Rejected);
        let snap = t.snapshot();
        let counts = &snap.operations["register_asset"];
        assert_eq!(counts.success, 2);
        assert_eq!(counts.rejected, 1);
        assert_eq!(snap.operations["re_verify"].success, 0);
    }

    #[test]
    fn record_replay_hit_increments_and_sets_last_event() {
        let t = RegistryTelemetry::new();
        t.record_replay_hit();
        let snap = t.snapshot();
        assert_eq!(snap.jti_replay_hits, 1);
        assert_eq!(snap.last_event.as_deref(), Some("jti_replay_detected"));
    }

    #[test]
    fn last_event_tracks_most_recent() {
        let t = RegistryTelemetry::new();
        t.record_operation(Operation::StatusUpdate, Outcome::Success);
        t.record_replay_hit();
        t.record_operation(Operation::ReVerify, Outcome::Rejected);
        let snap = t.snapshot();
        assert_eq!(snap.last_event.as_deref(), Some("re_verify"));
    }

    #[test]
    fn fetch_failure_counters_are_independent() {
        let t = RegistryTelemetry::new();
        t.record_sri_fetch_failure();
        t.record_sri_fetch_failure();
        t.record_status_fetch_failure();
        let snap = t.snapshot();
        assert_eq!(snap.sri_fetch_failures, 2);
        assert_eq!(snap.status_fetch_failures, 1);
    }

    #[test]
    fn health_report_is_ok_below_threshold() {
        let t = RegistryTelemetry::new();
        t.record_sri_fetch_failure();
        let report = build_health_report(&t, 42);
        assert_eq!(report.status, HealthStatus::Ok);
        assert_eq!(report.uptime_seconds, 42);
    }

    #[test]
    fn health_report_is_degraded_above_threshold() {
        let t = RegistryTelemetry::new();
        for _ in 0..(DEGRADED_FAILURE_THRESHOLD + 1) {
            t.record_status_fetch_failure();
        }
        let report = build_health_report(&t, 10);
        assert_eq!(report.status, HealthStatus::Degraded);
    }

    #[test]
    fn snapshot_serde_roundtrip() {
        let t = RegistryTelemetry::new();
        t.record_operation(Operation::AuditAppend, Outcome::Success);
        let snap = t.snapshot();
        let json = serde_json::to_string(&snap).unwrap();
        let snap2: TelemetrySnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snap, snap2);
    }

    #[test]
    fn concurrent_recording_is_consistent() {
        let t = std::sync::Arc::new(RegistryTelemetry::new());
        let mut handles = vec![];
        for _ in 0..10 {
            let tc = t.clone();
            handles.push(thread::spawn(move || {
                tc.record_operation(Operation::RegisterAsset, Outcome::Success);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(t.snapshot().operations["register_asset"].success, 10);
    }

    #[test]
    fn operation_as_str_is_snake_case() {
        assert_eq!(Operation::RegisterAsset.as_str(), "register_asset");
        assert_eq!(Operation::ReVerify.as_str(), "re_verify");
        assert_eq!(Operation::StatusUpdate.as_str(), "status_update");
        assert_eq!(Operation::AuditAppend.as_str(), "audit_append");
    }
}
