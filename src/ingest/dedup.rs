//! Ingestion-time deduplication by source identity.
//!
//! Redelivery of the same `(source_system, source_alert_id)` within the
//! retention window must not create a second Alert entity. An LRU cache
//! bounds memory; entries expire after the configured TTL.

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Hashed source identity of one delivered alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceKey(u64);

impl SourceKey {
    pub fn new(source_system: &str, source_alert_id: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        let mut hasher = DefaultHasher::new();
        source_system.hash(&mut hasher);
        source_alert_id.hash(&mut hasher);
        Self(hasher.finish())
    }
}

/// TTL'd LRU of recently seen source identities.
pub struct Deduplicator {
    cache: Mutex<LruCache<SourceKey, DateTime<Utc>>>,
    ttl: Duration,
}

impl Deduplicator {
    pub fn new(ttl_secs: u64, max_entries: usize) -> Self {
        let capacity =
            NonZeroUsize::new(max_entries).unwrap_or_else(|| NonZeroUsize::new(1).unwrap());
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    /// Record a delivery. Returns true for a first delivery, false for a
    /// redelivery still inside the retention window.
    pub fn first_delivery(&self, source_system: &str, source_alert_id: &str) -> bool {
        let key = SourceKey::new(source_system, source_alert_id);
        let now = Utc::now();
        let mut cache = self.cache.lock().unwrap();

        if let Some(expires_at) = cache.get_mut(&key) {
            if now > *expires_at {
                *expires_at = now + self.ttl;
                true
            } else {
                false
            }
        } else {
            cache.put(key, now + self.ttl);
            true
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries.
    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        let mut cache = self.cache.lock().unwrap();
        let expired: Vec<SourceKey> = cache
            .iter()
            .filter(|(_, expires_at)| now > **expires_at)
            .map(|(key, _)| *key)
            .collect();
        for key in expired {
            cache.pop(&key);
        }
    }
}
