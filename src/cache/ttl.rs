//! Generic expiring key/value store.
//!
//! Entries expire lazily: a read that finds an entry past its deadline removes
//! it and reports a miss. An optional LRU bound caps memory on top of TTL.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::time::Duration;

use lru::LruCache;
use tokio::time::Instant;

use super::lock::{rw_read, rw_write};
use super::metrics;

/// A value plus the instant after which it must not be served.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

pub struct TtlCache<K: Hash + Eq, V> {
    tier: &'static str,
    entries: RwLock<LruCache<K, CacheEntry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// `tier` labels log lines and metrics.
    pub fn new(tier: &'static str, capacity: Option<NonZeroUsize>) -> Self {
        let entries = match capacity {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };
        Self {
            tier,
            entries: RwLock::new(entries),
        }
    }

    /// Return the live value for `key`, removing it if it has expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = rw_write(&self.entries, self.tier, "get");
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.pop(key);
                metrics::evicted(self.tier, "expired", 1);
                None
            }
            None => None,
        }
    }

    /// Store `value` with a fresh TTL window starting now.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let entry = CacheEntry::new(value, ttl);
        let mut entries = rw_write(&self.entries, self.tier, "set");
        self.push(&mut entries, key, entry);
    }

    /// Replace the entry for `key` with `merge(previous)`, where `previous` is
    /// the live value if any. Runs under one lock so concurrent merges do not
    /// lose columns.
    pub fn upsert(&self, key: K, ttl: Duration, merge: impl FnOnce(Option<V>) -> V) {
        let mut entries = rw_write(&self.entries, self.tier, "upsert");
        let now = Instant::now();
        let previous = entries
            .pop(&key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value);
        let entry = CacheEntry::new(merge(previous), ttl);
        self.push(&mut entries, key, entry);
    }

    fn push(&self, entries: &mut LruCache<K, CacheEntry<V>>, key: K, entry: CacheEntry<V>) {
        let probe = key.clone();
        if let Some((evicted, _)) = entries.push(key, entry)
            && evicted != probe
        {
            metrics::evicted(self.tier, "capacity", 1);
        }
    }

    pub fn delete(&self, key: &K) -> bool {
        let removed = rw_write(&self.entries, self.tier, "delete")
            .pop(key)
            .is_some();
        if removed {
            metrics::invalidated(self.tier, 1);
        }
        removed
    }

    /// Remove every key for which `predicate` holds. Returns the count removed.
    pub fn delete_matching(&self, predicate: impl Fn(&K) -> bool) -> usize {
        let mut entries = rw_write(&self.entries, self.tier, "delete_matching");
        let doomed: Vec<K> = entries
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        metrics::invalidated(self.tier, doomed.len());
        doomed.len()
    }

    pub fn clear(&self) {
        let mut entries = rw_write(&self.entries, self.tier, "clear");
        metrics::invalidated(self.tier, entries.len());
        entries.clear();
    }

    /// Drop every expired entry. Returns the count removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = rw_write(&self.entries, self.tier, "purge_expired");
        let now = Instant::now();
        let expired: Vec<K> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        metrics::evicted(self.tier, "expired", expired.len());
        expired.len()
    }

    /// Stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, self.tier, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
