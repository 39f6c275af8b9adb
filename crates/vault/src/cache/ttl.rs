//! [`TtlLru`]: a bounded LRU map whose entries also expire.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::RwLock;

struct Stamped<V> {
    value: V,
    inserted: Instant,
}

/// LRU map with a per-entry time to live.
///
/// Lookups share a read lock and `peek` the entry; recency is bumped
/// afterwards only if the write lock is free, so concurrent readers never
/// wait on each other. Dropped values run their `Drop`, which is how
/// zeroizing values get wiped on eviction.
pub(crate) struct TtlLru<K: Hash + Eq, V> {
    /// `None` when built with capacity zero: nothing is retained.
    entries: Option<RwLock<LruCache<K, Stamped<V>>>>,
    ttl: Duration,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlLru<K, V> {
    pub(crate) fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|cap| RwLock::new(LruCache::new(cap))),
            ttl,
        }
    }

    /// The value for `key` if present and younger than the TTL.
    pub(crate) fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.as_ref()?;
        let fresh = {
            let guard = entries.read();
            let entry = guard.peek(key)?;
            (entry.inserted.elapsed() < self.ttl).then(|| entry.value.clone())
        };

        match fresh {
            Some(value) => {
                if let Some(mut guard) = entries.try_write() {
                    guard.promote(key);
                }
                Some(value)
            }
            None => {
                let mut guard = entries.write();
                if guard
                    .peek(key)
                    .is_some_and(|e| e.inserted.elapsed() >= self.ttl)
                {
                    guard.pop(key);
                }
                None
            }
        }
    }

    /// Insert or replace; the least recently used entry makes room.
    pub(crate) fn put(&self, key: K, value: V) {
        if let Some(entries) = &self.entries {
            entries.write().put(
                key,
                Stamped {
                    value,
                    inserted: Instant::now(),
                },
            );
        }
    }

    pub(crate) fn remove(&self, key: &K) -> bool {
        self.entries
            .as_ref()
            .is_some_and(|entries| entries.write().pop(key).is_some())
    }

    /// Drop every entry whose key fails `keep`. Returns how many were dropped.
    pub(crate) fn retain(&self, keep: impl Fn(&K) -> bool) -> usize {
        let Some(entries) = &self.entries else {
            return 0;
        };
        let mut guard = entries.write();
        let doomed: Vec<K> = guard
            .iter()
            .filter(|(k, _)| !keep(k))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            guard.pop(key);
        }
        doomed.len()
    }

    /// Drop entries older than the TTL. Returns how many were dropped.
    pub(crate) fn purge_expired(&self) -> usize {
        let Some(entries) = &self.entries else {
            return 0;
        };
        let mut guard = entries.write();
        let expired: Vec<K> = guard
            .iter()
            .filter(|(_, e)| e.inserted.elapsed() >= self.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            guard.pop(key);
        }
        expired.len()
    }

    pub(crate) fn clear(&self) -> usize {
        let Some(entries) = &self.entries else {
            return 0;
        };
        let mut guard = entries.write();
        let dropped = guard.len();
        guard.clear();
        dropped
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |entries| entries.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotes_on_get_and_evicts_oldest() {
        let map = TtlLru::new(2, Duration::from_secs(60));
        map.put(1, "a");
        map.put(2, "b");
        assert_eq!(map.get(&1), Some("a"));
        map.put(3, "c");
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&2), None);
        assert_eq!(map.get(&1), Some("a"));
        assert_eq!(map.get(&3), Some("c"));
    }

    #[test]
    fn expired_entry_is_dropped_on_read() {
        let map = TtlLru::new(4, Duration::ZERO);
        map.put(1, "a");
        assert_eq!(map.get(&1), None);
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn retain_filters_by_key() {
        let map = TtlLru::new(8, Duration::from_secs(60));
        for k in 0..6 {
            map.put(k, k * 10);
        }
        assert_eq!(map.retain(|k| k % 2 == 0), 3);
        assert_eq!(map.len(), 3);
        assert_eq!(map.get(&1), None);
        assert_eq!(map.get(&4), Some(40));
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let map = TtlLru::new(0, Duration::from_secs(60));
        map.put(1, "a");
        assert_eq!(map.get(&1), None);
        assert!(!map.remove(&1));
        assert_eq!(map.clear(), 0);
    }
}
