//! JTI replay cache: atomic "set-if-absent with TTL" semantics.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

/// A store guarding against receipt replay by JWT id.
///
/// Implementations must make [`ReplayStore::try_insert`] atomic: if two
/// callers race on the same `jti`, exactly one observes `Ok(true)`.
#[async_trait]
pub trait ReplayStore: Send + Sync {
    /// Attempts to insert `jti` with the given TTL.
    ///
    /// Returns `Ok(true)` if `jti` was not already present (and is now
    /// recorded), `Ok(false)` if `jti` was already present (a replay).
    async fn try_insert(&self, jti: &str, ttl: Duration) -> bool;

    /// Removes every entry whose expiry has passed.
    async fn gc(&self);
}

/// An in-process [`ReplayStore`] backed by a mutex-guarded hash map.
///
/// Sufficient for a single-process deployment or test harness; a
/// multi-instance deployment should back [`ReplayStore`] with a shared
/// store offering the same atomic set-if-absent primitive (e.g. Redis
/// `SET NX PX`).
#[derive(Debug, Default)]
pub struct InMemoryReplayStore {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryReplayStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries currently recorded, expired or not.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Returns `true` if no entries are currently recorded.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ReplayStore for InMemoryReplayStore {
    async fn try_insert(&self, jti: &str, ttl: Duration) -> bool {
        let now = Utc::now();
        let mut guard = self.entries.lock().await;
        if let Some(expires_at) = guard.get(jti) {
            if *expires_at > now {
                return false;
            }
        }
        let ttl_chrono = ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::zero());
        guard.insert(jti.to_string(), now + ttl_chrono);
        true
    }

    async fn gc(&self) {
        let now = Utc::now();
        let mut guard = self.entries.lock().await;
        guard.retain(|_, expires_at| *expires_at >= now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_insert_succeeds_second_is_replay() {
        let store = InMemoryReplayStore::new();
        assert!(store.try_insert("jti-1", Duration::from_secs(600)).await);
        assert!(!store.try_insert("jti-1", Duration::from_secs(600)).await);
    }

    #[tokio::test]
    async fn distinct_jtis_do_not_collide() {
        let store = InMemoryReplayStore::new();
        assert!(store.try_insert("jti-1", Duration::from_secs(600)).await);
        assert!(store.try_insert("jti-2", Duration::from_secs(600)).await);
    }

    #[tokio::test]
    async fn expired_entry_can_be_reinserted() {
        let store = InMemoryReplayStore::new();
        assert!(store.try_insert("jti-1", Duration::from_millis(0)).await);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store.try_insert("jti-1", Duration::from_secs(600)).await);
    }

    #[tokio::test]
    async fn gc_removes_only_expired_rows() {
        let store = InMemoryReplayStore::new();
        store.try_insert("expired", Duration::from_millis(0)).await;
        store.try_insert("fresh", Duration::from_secs(600)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.gc().await;
        assert_eq!(store.len().await, 1);
    }
}
