//! Key/value cache with per-entry expiry.
//!
//! Entries are evicted lazily: a read past `expires_at` removes the entry and
//! reports it absent. There is no background sweeper.
//!
//! Entries live in a sharded [`DashMap`], so readers and writers of different
//! keys do not contend on a global lock, and access to one key is serialized
//! by its shard lock.

use std::hash::Hash;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// A cached value with its absolute expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Stored value.
    pub value: V,
    /// Instant after which the entry is treated as absent.
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// TTL cache.
#[derive(Debug)]
pub struct TtlCache<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, CacheEntry<V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.entries.insert(key, CacheEntry { value, expires_at });
    }

    /// Fetch a live value. Expired entries are removed and reported absent.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        {
            let entry = self.entries.get(key)?;
            if !entry.is_expired(now) {
                return Some(entry.value.clone());
            }
        }
        // A concurrent `set` may have replaced the entry since the read lock
        // was dropped; only remove it if it is still the expired one.
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        None
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
