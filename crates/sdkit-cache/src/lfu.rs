//! Least-frequently-used cache with O(1) eviction.
//!
//! Entries live in per-frequency recency lists. `min_freq` always names
//! the lowest populated bucket, so the victim is the back (least recent)
//! entry of `buckets[min_freq]`: minimum frequency first, LRU within it.

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
struct LfuEntry<K, V> {
    key: K,
    value: V,
    freq: u64,
}

struct LfuCore<K, V> {
    index: HashMap<K, SlotId>,
    slab: Slab<LfuEntry<K, V>>,
    buckets: HashMap<u64, ListHead>,
    min_freq: u64,
    capacity: usize,
    stats: CacheStats,
}

impl<K: Eq + Hash + Clone, V: Clone> LfuCore<K, V> {
    /// Bumps the frequency of `id` and relinks it at the front of its new bucket.
    fn touch(&mut self, id: SlotId) {
        let Some(freq) = self.slab.get(id).map(|e| e.freq) else {
            return;
        };
        if let Some(bucket) = self.buckets.get_mut(&freq) {
            self.slab.unlink(bucket, id);
            if bucket.is_empty() {
                self.buckets.remove(&freq);
                if self.min_freq == freq {
                    self.min_freq = freq + 1;
                }
            }
        }
        if let Some(entry) = self.slab.get_mut(id) {
            entry.freq = freq + 1;
        }
        let bucket = self.buckets.entry(freq + 1).or_default();
        self.slab.link_front(bucket, id);
    }

    fn evict(&mut self) -> Option<(K, V)> {
        let freq = self.min_freq;
        let bucket = self.buckets.get_mut(&freq)?;
        let victim = self.slab.pop_back(bucket)?;
        if bucket.is_empty() {
            self.buckets.remove(&freq);
        }
        self.index.remove(&victim.key);
        self.stats.evictions += 1;
        Some((victim.key, victim.value))
    }

    fn get<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let Some(&id) = self.index.get(key) else {
            self.stats.misses += 1;
            return None;
        };
        self.touch(id);
        self.stats.hits += 1;
        self.slab.get(id).map(|e| e.value.clone())
    }

    fn set(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&id) = self.index.get(&key) {
            if let Some(entry) = self.slab.get_mut(id) {
                entry.value = value;
            }
            self.touch(id);
            return None;
        }

        let evicted = if self.index.len() >= self.capacity {
            self.evict()
        } else {
            None
        };

        let bucket = self.buckets.entry(1).or_default();
        let id = self.slab.push_front(
            bucket,
            LfuEntry {
                key: key.clone(),
                value,
                freq: 1,
            },
        );
        self.index.insert(key, id);
        self.min_freq = 1;
        self.stats.insertions += 1;
        evicted
    }

    fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let id = self.index.remove(key)?;
        let freq = self.slab.get(id)?.freq;
        let bucket = self.buckets.get_mut(&freq)?;
        let entry = self.slab.remove(bucket, id)?;
        if bucket.is_empty() {
            self.buckets.remove(&freq);
            if self.min_freq == freq {
                self.min_freq = self.buckets.keys().copied().min().unwrap_or(0);
            }
        }
        Some(entry.value)
    }
}

/// Thread-safe LFU cache.
pub struct LfuCache<K, V> {
    inner: Mutex<LfuCore<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> LfuCache<K, V> {
    /// Creates a cache from a validated config.
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;
        debug!(capacity = config.capacity, "created lfu cache");
        Ok(Self {
            inner: Mutex::new(LfuCore {
                index: HashMap::with_capacity(config.initial_slots(1)),
                slab: Slab::with_capacity(config.initial_slots(1)),
                buckets: HashMap::new(),
                min_freq: 0,
                capacity: config.capacity,
                stats: CacheStats::default(),
            }),
        })
    }

    /// Shorthand for `new(CacheConfig::with_capacity(capacity))`.
    pub fn with_capacity(capacity: usize) -> CacheResult<Self> {
        Self::new(CacheConfig::with_capacity(capacity))
    }

    /// Returns the value for `key` and bumps its frequency.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.lock().get(key)
    }

    /// Returns the value for `key` without changing its frequency.
    pub fn peek<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let core = self.inner.lock();
        let id = *core.index.get(key)?;
        core.slab.get(id).map(|e| e.value.clone())
    }

    /// Inserts with frequency 1, or updates and bumps an existing key.
    /// Returns the evicted entry, if any.
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

    /// Current access frequency of `key`, if resident.
    pub fn frequency<Q>(&self, key: &Q) -> Option<u64>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let core = self.inner.lock();
        let id = *core.index.get(key)?;
        core.slab.get(id).map(|e| e.freq)
    }

    /// Smallest frequency among resident entries; 0 when empty.
    pub fn min_frequency(&self) -> u64 {
        let core = self.inner.lock();
        if core.index.is_empty() {
            0
        } else {
            core.min_freq
        }
    }

    /// True when `key` is resident. Does not count as an access.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.lock().index.contains_key(key)
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
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
        core.buckets.clear();
        core.min_freq = 0;
    }
}

impl<K, V> Cache<K, V> for LfuCache<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Clone + Send,
{
    fn get(&self, key: &K) -> Option<V> {
        LfuCache::get(self, key)
    }

    fn set(&self, key: K, value: V) -> Option<(K, V)> {
        LfuCache::set(self, key, value)
    }

    fn remove(&self, key: &K) -> Option<V> {
        LfuCache::remove(self, key)
    }

    fn len(&self) -> usize {
        LfuCache::len(self)
    }

    fn capacity(&self) -> usize {
        LfuCache::capacity(self)
    }

    fn stats(&self) -> CacheStats {
        LfuCache::stats(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lfu_scenario_two_slots() {
        let cache = LfuCache::with_capacity(2).unwrap();
        cache.set("one".to_string(), 1);
        cache.set("one".to_string(), 1);
        cache.set("two".to_string(), 2);
        let evicted = cache.set("three".to_string(), 3);
        assert_eq!(evicted, Some(("two".to_string(), 2)));
        assert_eq!(cache.get("two"), None);
        assert_eq!(cache.get("one"), Some(1));
    }

    #[test]
    fn test_ties_break_least_recent_first() {
        let cache = LfuCache::with_capacity(3).unwrap();
        cache.set('a', 1);
        cache.set('b', 2);
        cache.set('c', 3);
        // All at frequency 1; 'a' is the oldest.
        assert_eq!(cache.set('d', 4), Some(('a', 1)));
        cache.get(&'b');
        // 'c' and 'd' remain at frequency 1; 'c' is older.
        assert_eq!(cache.set('e', 5), Some(('c', 3)));
    }

    #[test]
    fn test_frequency_tracking() {
        let cache = LfuCache::with_capacity(4).unwrap();
        cache.set(1, ());
        cache.get(&1);
        cache.get(&1);
        assert_eq!(cache.frequency(&1), Some(3));
        cache.set(2, ());
        assert_eq!(cache.min_frequency(), 1);
        cache.get(&2);
        cache.get(&2);
        cache.get(&2);
        assert_eq!(cache.min_frequency(), 3);
    }

    #[test]
    fn test_remove_min_bucket_recomputes_min_freq() {
        let cache = LfuCache::with_capacity(4).unwrap();
        cache.set(1, 1);
        cache.set(2, 2);
        cache.get(&2);
        cache.get(&2);
        assert_eq!(cache.remove(&1), Some(1));
        assert_eq!(cache.min_frequency(), 3);
        cache.set(3, 3);
        cache.set(4, 4);
        cache.set(5, 5);
        assert_eq!(cache.set(6, 6), Some((3, 3)));
        assert!(cache.contains(&2));
    }

    #[test]
    fn test_peek_leaves_frequency_alone() {
        let cache = LfuCache::with_capacity(2).unwrap();
        cache.set(1, 10);
        assert_eq!(cache.peek(&1), Some(10));
        assert_eq!(cache.frequency(&1), Some(1));
    }

    #[test]
    fn test_clear_resets_state() {
        let cache = LfuCache::with_capacity(2).unwrap();
        cache.set(1, 1);
        cache.get(&1);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.min_frequency(), 0);
        cache.set(2, 2);
        cache.set(3, 3);
        assert_eq!(cache.set(4, 4), Some((2, 2)));
    }

    #[test]
    fn test_huge_capacity_does_not_preallocate() {
        use crate::config::MAX_CAPACITY;
        assert!(LfuCache::<u32, u32>::with_capacity(usize::MAX).is_err());
        let cache = LfuCache::with_capacity(MAX_CAPACITY).unwrap();
        cache.set("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));
    }
}
