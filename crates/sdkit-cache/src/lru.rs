//! Least-recently-used cache: hash index over a recency list.
//!
//! `get` moves the entry to the front; `set` inserts at the front and
//! drops the back entry once the cache is over capacity. Every operation
//! is O(1).

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::{CacheConfig, CacheStats};
use crate::error::CacheResult;
use crate::slab::{ListHead, Slab, SlotId};
use crate::traits::Cache;

#[derive(Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
}

struct LruCore<K, V> {
    index: HashMap<K, SlotId>,
    slab: Slab<Entry<K, V>>,
    order: ListHead,
    capacity: usize,
    stats: CacheStats,
}

impl<K: Eq + Hash + Clone, V: Clone> LruCore<K, V> {
    fn get<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let Some(&id) = self.index.get(key) else {
            self.stats.misses += 1;
            return None;
        };
        self.slab.move_to_front(&mut self.order, id);
        self.stats.hits += 1;
        self.slab.get(id).map(|e| e.value.clone())
    }

    fn set(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&id) = self.index.get(&key) {
            if let Some(entry) = self.slab.get_mut(id) {
                entry.value = value;
            }
            self.slab.move_to_front(&mut self.order, id);
            return None;
        }

        let id = self.slab.push_front(
            &mut self.order,
            Entry {
                key: key.clone(),
                value,
            },
        );
        self.index.insert(key, id);
        self.stats.insertions += 1;

        if self.order.len() > self.capacity {
            let evicted = self.slab.pop_back(&mut self.order)?;
            self.index.remove(&evicted.key);
            self.stats.evictions += 1;
            return Some((evicted.key, evicted.value));
        }
        None
    }

    fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let id = self.index.remove(key)?;
        self.slab.remove(&mut self.order, id).map(|e| e.value)
    }
}

/// Thread-safe LRU cache.
pub struct LruCache<K, V> {
    inner: Mutex<LruCore<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> LruCache<K, V> {
    /// Creates a cache from a validated config.
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;
        debug!(capacity = config.capacity, "created lru cache");
        Ok(Self {
            inner: Mutex::new(LruCore {
                index: HashMap::with_capacity(config.initial_slots(1)),
                slab: Slab::with_capacity(config.initial_slots(1)),
                order: ListHead::new(),
                capacity: config.capacity,
                stats: CacheStats::default(),
            }),
        })
    }

    /// Shorthand for `new(CacheConfig::with_capacity(capacity))`.
    pub fn with_capacity(capacity: usize) -> CacheResult<Self> {
        Self::new(CacheConfig::with_capacity(capacity))
    }

    /// Returns the value for `key` and marks it most recently used.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.lock().get(key)
    }

    /// Returns the value for `key` without touching recency or stats.
    pub fn peek<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let core = self.inner.lock();
        let id = *core.index.get(key)?;
        core.slab.get(id).map(|e| e.value.clone())
    }

    /// Inserts or updates `key` at the front. Returns the evicted entry, if any.
    pub fn set(&self, key: K, value: V) -> Option<(K, V)> {
        self.inner.lock().set(key, value)
    }

    /// Removes `key`, returning its value.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.lock().remove(key)
    }

    /// True when `key` is resident. Does not count as an access.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.lock().index.contains_key(key)
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<K> {
        let core = self.inner.lock();
        core.slab.iter(&core.order).map(|e| e.key.clone()).collect()
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    /// True when nothing is resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of resident entries.
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Snapshot of the hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }

    /// Drops every entry. Stats are kept.
    pub fn clear(&self) {
        let mut core = self.inner.lock();
        core.index.clear();
        core.slab.clear();
        core.order = ListHead::new();
    }
}

impl<K, V> Cache<K, V> for LruCache<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Clone + Send,
{
    fn get(&self, key: &K) -> Option<V> {
        LruCache::get(self, key)
    }

    fn set(&self, key: K, value: V) -> Option<(K, V)> {
        LruCache::set(self, key, value)
    }

    fn remove(&self, key: &K) -> Option<V> {
        LruCache::remove(self, key)
    }

    fn len(&self) -> usize {
        LruCache::len(self)
    }

    fn capacity(&self) -> usize {
        LruCache::capacity(self)
    }

    fn stats(&self) -> CacheStats {
        LruCache::stats(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_scenario_two_slots() {
        let cache = LruCache::with_capacity(2).unwrap();
        cache.set("one".to_string(), 1);
        cache.set("two".to_string(), 2);
        assert_eq!(cache.get("one"), Some(1));
        let evicted = cache.set("three".to_string(), 3);
        assert_eq!(evicted, Some(("two".to_string(), 2)));
        assert_eq!(cache.get("two"), None);
        assert_eq!(cache.get("three"), Some(3));
        assert_eq!(cache.get("one"), Some(1));
    }

    #[test]
    fn test_update_refreshes_without_eviction() {
        let cache = LruCache::with_capacity(2).unwrap();
        cache.set(1, "a");
        cache.set(2, "b");
        assert_eq!(cache.set(1, "c"), None);
        assert_eq!(cache.len(), 2);
        cache.set(3, "d");
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&1), Some("c"));
    }

    #[test]
    fn test_peek_does_not_refresh() {
        let cache = LruCache::with_capacity(2).unwrap();
        cache.set(1, 1);
        cache.set(2, 2);
        assert_eq!(cache.peek(&1), Some(1));
        cache.set(3, 3);
        assert!(!cache.contains(&1));
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn test_keys_in_recency_order() {
        let cache = LruCache::with_capacity(3).unwrap();
        cache.set('a', 1);
        cache.set('b', 2);
        cache.set('c', 3);
        cache.get(&'a');
        assert_eq!(cache.keys(), vec!['a', 'c', 'b']);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = LruCache::with_capacity(4).unwrap();
        cache.set(1, 10);
        cache.set(2, 20);
        assert_eq!(cache.remove(&1), Some(10));
        assert_eq!(cache.remove(&1), None);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
        cache.set(5, 50);
        assert_eq!(cache.get(&5), Some(50));
    }

    #[test]
    fn test_stats_track_hits_misses_evictions() {
        let cache = LruCache::with_capacity(1).unwrap();
        cache.set(1, 1);
        cache.get(&1);
        cache.get(&2);
        cache.set(2, 2);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.insertions, 2);
        assert_eq!(stats.evictions, 1);
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(LruCache::<u32, u32>::with_capacity(0).is_err());
    }

    #[test]
    fn test_shared_across_threads() {
        use std::sync::Arc;
        let cache = Arc::new(LruCache::with_capacity(64).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..1000u32 {
                        cache.set(t * 1000 + i, i);
                        cache.get(&(t * 1000 + i / 2));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 64);
    }

    #[test]
    fn test_huge_capacity_does_not_preallocate() {
        use crate::config::MAX_CAPACITY;
        assert!(LruCache::<u32, u32>::with_capacity(usize::MAX).is_err());
        let cache = LruCache::with_capacity(MAX_CAPACITY).unwrap();
        cache.set("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));
    }
}
