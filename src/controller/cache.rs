//! Change-detection cache.
//!
//! Holds the last successfully synchronized snapshot of each shared volume,
//! keyed by volume id. A fresh entry that matches the polled volume lets the
//! control loop skip cluster API calls entirely; expiry forces a periodic
//! full verification against out-of-band edits.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::domain::SharedVolume;

#[derive(Debug, Clone)]
struct CacheEntry {
    snapshot: SharedVolume,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Typed, TTL-based snapshot store.
#[derive(Debug, Default)]
pub struct VolumeCache {
    entries: DashMap<String, CacheEntry>,
}

impl VolumeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the snapshot for `id` if present and not expired.
    pub fn get(&self, id: &str) -> Option<SharedVolume> {
        self.entries
            .get(id)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.snapshot.clone())
    }

    /// Insert or overwrite the snapshot for `id`, restarting its TTL.
    pub fn set(&self, id: &str, snapshot: SharedVolume, ttl: Duration) {
        self.entries.insert(
            id.to_string(),
            CacheEntry {
                snapshot,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// True when a live entry exists for the volume and matches it.
    pub fn is_unchanged(&self, volume: &SharedVolume) -> bool {
        self.get(&volume.id)
            .is_some_and(|cached| cached.same_state(volume))
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let total = self.entries.len();
        let expired = self.entries.iter().filter(|e| e.is_expired()).count();

        CacheStats {
            total_entries: total,
            expired_entries: expired,
            active_entries: total - expired,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub active_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume(internal: &str) -> SharedVolume {
        SharedVolume {
            id: "1234".to_string(),
            service_name: "baz-service".to_string(),
            pvc_name: "foo".to_string(),
            namespace: "bar".to_string(),
            internal_endpoint: internal.to_string(),
            external_endpoint: "1.2.3.4:2049".to_string(),
        }
    }

    #[test]
    fn test_get_missing() {
        let cache = VolumeCache::new();
        assert!(cache.get("1234").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_set_and_get() {
        let cache = VolumeCache::new();
        cache.set("1234", volume("10.0.0.1:1234"), Duration::from_secs(60));

        assert_eq!(cache.get("1234"), Some(volume("10.0.0.1:1234")));
        assert!(cache.is_unchanged(&volume("10.0.0.1:1234")));
        assert!(!cache.is_unchanged(&volume("10.0.0.1:5678")));
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let cache = VolumeCache::new();
        cache.set("1234", volume("10.0.0.1:1234"), Duration::ZERO);

        assert!(cache.get("1234").is_none());
        assert!(!cache.is_unchanged(&volume("10.0.0.1:1234")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_set_overwrites_and_refreshes() {
        let cache = VolumeCache::new();
        cache.set("1234", volume("10.0.0.1:1234"), Duration::ZERO);
        cache.set("1234", volume("10.0.0.1:5678"), Duration::from_secs(60));

        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get("1234").map(|v| v.internal_endpoint),
            Some("10.0.0.1:5678".to_string())
        );
    }

    #[test]
    fn test_purge_expired() {
        let cache = VolumeCache::new();
        cache.set("stale", volume("10.0.0.1:1234"), Duration::ZERO);
        cache.set("live", volume("10.0.0.1:1234"), Duration::from_secs(60));

        assert_eq!(
            cache.stats(),
            CacheStats {
                total_entries: 2,
                expired_entries: 1,
                active_entries: 1,
            }
        );

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("live").is_some());
    }
}
