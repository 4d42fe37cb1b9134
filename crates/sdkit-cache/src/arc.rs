//! Adaptive Replacement Cache (Megiddo & Modha, FAST '03).
//!
//! Four lists share one slab:
//!
//! - `T1`: resident, seen once recently (recency side).
//! - `T2`: resident, seen at least twice (frequency side).
//! - `B1`/`B2`: ghosts recently demoted from `T1`/`T2`; keys only.
//!
//! The target size `p` of `T1` moves toward whichever ghost list keeps
//! getting hit. Invariants held after every operation:
//!
//! - `|T1| + |T2| <= c`, `|T1| + |B1| <= c`, `|T2| + |B2| <= 2c`
//! - `0 <= p <= c`
//! - ghost entries carry no value
//!
//! A ghost has no payload, so ghost hits are handled by `set`; `get` on
//! a ghost key is a plain miss. `get` still mutates list order: never
//! call it expecting read-only semantics.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{CacheConfig, CacheStats};
use crate::error::CacheResult;
use crate::slab::{ListHead, Slab, SlotId};
use crate::traits::Cache;

/// Which ARC list an entry is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArcList {
    /// Resident, recency side.
    T1,
    /// Resident, frequency side.
    T2,
    /// Ghost of a `T1` entry.
    B1,
    /// Ghost of a `T2` entry.
    B2,
}

impl ArcList {
    /// True for the resident lists.
    pub fn is_resident(self) -> bool {
        matches!(self, ArcList::T1 | ArcList::T2)
    }
}

/// List sizes and the adaptation target at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArcSnapshot {
    /// Entries on `T1`.
    pub t1: usize,
    /// Entries on `T2`.
    pub t2: usize,
    /// Ghosts on `B1`.
    pub b1: usize,
    /// Ghosts on `B2`.
    pub b2: usize,
    /// Target size of `T1`.
    pub p: usize,
    /// Configured capacity `c`.
    pub capacity: usize,
}

impl ArcSnapshot {
    /// Checks the size invariants of the algorithm.
    pub fn invariants_hold(&self) -> bool {
        let c = self.capacity;
        self.t1 + self.t2 <= c
            && self.t1 + self.b1 <= c
            && self.t2 + self.b2 <= 2 * c
            && self.p <= c
    }
}

#[derive(Debug)]
struct ArcEntry<K, V> {
    key: K,
    value: Option<V>,
    list: ArcList,
}

#[derive(Debug, Default)]
struct Lists {
    t1: ListHead,
    t2: ListHead,
    b1: ListHead,
    b2: ListHead,
}

impl Lists {
    fn head_mut(&mut self, which: ArcList) -> &mut ListHead {
        match which {
            ArcList::T1 => &mut self.t1,
            ArcList::T2 => &mut self.t2,
            ArcList::B1 => &mut self.b1,
            ArcList::B2 => &mut self.b2,
        }
    }
}

struct ArcCore<K, V> {
    index: HashMap<K, SlotId>,
    slab: Slab<ArcEntry<K, V>>,
    lists: Lists,
    p: usize,
    capacity: usize,
    stats: CacheStats,
}

impl<K: Eq + Hash + Clone, V: Clone> ArcCore<K, V> {
    fn resident(&self) -> usize {
        self.lists.t1.len() + self.lists.t2.len()
    }

    /// Relinks `id` at the MRU end of `to`.
    fn relink(&mut self, id: SlotId, to: ArcList) {
        let Some(from) = self.slab.get(id).map(|e| e.list) else {
            return;
        };
        self.slab.unlink(self.lists.head_mut(from), id);
        self.slab.link_front(self.lists.head_mut(to), id);
        if let Some(entry) = self.slab.get_mut(id) {
            entry.list = to;
        }
    }

    /// Frees the LRU entry of `which` entirely.
    fn drop_lru(&mut self, which: ArcList) -> Option<ArcEntry<K, V>> {
        let entry = self.slab.pop_back(self.lists.head_mut(which))?;
        self.index.remove(&entry.key);
        Some(entry)
    }

    /// Demotes one resident entry to its ghost list and returns its payload.
    ///
    /// `T1` is the donor when it holds more than its target `p`, or exactly
    /// `p` while the request is a `B2` ghost hit. `T2` donates otherwise.
    fn replace(&mut self, hit_in_b2: bool) -> Option<(K, V)> {
        let t1 = self.lists.t1.len();
        let take_t1 =
            t1 > 0 && (t1 > self.p || (hit_in_b2 && t1 == self.p) || self.lists.t2.is_empty());
        let (from, to) = if take_t1 {
            (ArcList::T1, ArcList::B1)
        } else {
            (ArcList::T2, ArcList::B2)
        };
        let id = self.slab.back(self.lists.head_mut(from))?;
        self.relink(id, to);
        let entry = self.slab.get_mut(id)?;
        let value = entry.value.take()?;
        self.stats.evictions += 1;
        Some((entry.key.clone(), value))
    }

    fn replace_if_full(&mut self, hit_in_b2: bool) -> Option<(K, V)> {
        if self.resident() >= self.capacity {
            self.replace(hit_in_b2)
        } else {
            None
        }
    }

    fn get<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let id = match self.index.get(key) {
            Some(&id) if self.slab.get(id).is_some_and(|e| e.list.is_resident()) => id,
            _ => {
                self.stats.misses += 1;
                return None;
            }
        };
        self.relink(id, ArcList::T2);
        self.stats.hits += 1;
        self.slab.get(id).and_then(|e| e.value.clone())
    }

    fn set(&mut self, key: K, value: V) -> Option<(K, V)> {
        let c = self.capacity;

        if let Some(&id) = self.index.get(&key) {
            let list = self.slab.get(id).map(|e| e.list)?;
            let evicted = match list {
                ArcList::T1 | ArcList::T2 => None,
                ArcList::B1 => {
                    let b1 = self.lists.b1.len().max(1);
                    let delta = (self.lists.b2.len() / b1).max(1);
                    self.p = (self.p + delta).min(c);
                    self.replace_if_full(false)
                }
                ArcList::B2 => {
                    let b2 = self.lists.b2.len().max(1);
                    let delta = (self.lists.b1.len() / b2).max(1);
                    self.p = self.p.saturating_sub(delta);
                    self.replace_if_full(true)
                }
            };
            if !list.is_resident() {
                self.stats.insertions += 1;
            }
            if let Some(entry) = self.slab.get_mut(id) {
                entry.value = Some(value);
            }
            self.relink(id, ArcList::T2);
            return evicted;
        }

        let l1 = self.lists.t1.len() + self.lists.b1.len();
        let total = l1 + self.lists.t2.len() + self.lists.b2.len();
        let mut evicted = None;
        if l1 >= c {
            if self.lists.t1.len() < c {
                self.drop_lru(ArcList::B1);
                evicted = self.replace_if_full(false);
            } else if let Some(entry) = self.drop_lru(ArcList::T1) {
                self.stats.evictions += 1;
                evicted = entry.value.map(|v| (entry.key, v));
            }
        } else if total >= c {
            if total >= 2 * c {
                self.drop_lru(ArcList::B2);
            }
            evicted = self.replace_if_full(false);
        }

        let id = self.slab.push_front(
            &mut self.lists.t1,
            ArcEntry {
                key: key.clone(),
                value: Some(value),
                list: ArcList::T1,
            },
        );
        self.index.insert(key, id);
        self.stats.insertions += 1;
        evicted
    }

    fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let id = self.index.remove(key)?;
        let list = self.slab.get(id)?.list;
        self.slab
            .remove(self.lists.head_mut(list), id)
            .and_then(|e| e.value)
    }

    fn snapshot(&self) -> ArcSnapshot {
        ArcSnapshot {
            t1: self.lists.t1.len(),
            t2: self.lists.t2.len(),
            b1: self.lists.b1.len(),
            b2: self.lists.b2.len(),
            p: self.p,
            capacity: self.capacity,
        }
    }
}

/// Thread-safe adaptive replacement cache.
pub struct ArcCache<K, V> {
    inner: Mutex<ArcCore<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> ArcCache<K, V> {
    /// Creates a cache from a validated config.
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;
        debug!(capacity = config.capacity, "created arc cache");
        Ok(Self {
            inner: Mutex::new(ArcCore {
                index: HashMap::with_capacity(config.initial_slots(2)),
                slab: Slab::with_capacity(config.initial_slots(2)),
                lists: Lists::default(),
                p: 0,
                capacity: config.capacity,
                stats: CacheStats::default(),
            }),
        })
    }

    /// Shorthand for `new(CacheConfig::with_capacity(capacity))`.
    pub fn with_capacity(capacity: usize) -> CacheResult<Self> {
        Self::new(CacheConfig::with_capacity(capacity))
    }

    /// Returns the value for a resident `key` and promotes it to the MRU end of `T2`.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.lock().get(key)
    }

    /// Returns the value for a resident `key` without moving it.
    pub fn peek<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let core = self.inner.lock();
        let id = *core.index.get(key)?;
        core.slab.get(id).and_then(|e| e.value.clone())
    }

    /// Inserts or updates `key`, adapting `p` on ghost hits.
    /// Returns the resident entry demoted or dropped to make room, if any.
    pub fn set(&self, key: K, value: V) -> Option<(K, V)> {
        self.inner.lock().set(key, value)
    }

    /// Forgets `key` (resident or ghost). Returns the value if it was resident.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.lock().remove(key)
    }

    /// The list `key` currently sits on, ghosts included.
    pub fn residency<Q>(&self, key: &Q) -> Option<ArcList>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let core = self.inner.lock();
        let id = *core.index.get(key)?;
        core.slab.get(id).map(|e| e.list)
    }

    /// True when `key` is resident. Does not count as an access.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.residency(key).is_some_and(ArcList::is_resident)
    }

    /// List sizes and `p`.
    pub fn snapshot(&self) -> ArcSnapshot {
        self.inner.lock().snapshot()
    }

    /// Number of resident entries (`|T1| + |T2|`).
    pub fn len(&self) -> usize {
        self.inner.lock().resident()
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

    /// Drops every entry and ghost and resets `p`. Stats are kept.
    pub fn clear(&self) {
        let mut core = self.inner.lock();
        core.index.clear();
        core.slab.clear();
        core.lists = Lists::default();
        core.p = 0;
    }
}

impl<K, V> Cache<K, V> for ArcCache<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Clone + Send,
{
    fn get(&self, key: &K) -> Option<V> {
        ArcCache::get(self, key)
    }

    fn set(&self, key: K, value: V) -> Option<(K, V)> {
        ArcCache::set(self, key, value)
    }

    fn remove(&self, key: &K) -> Option<V> {
        ArcCache::remove(self, key)
    }

    fn len(&self) -> usize {
        ArcCache::len(self)
    }

    fn capacity(&self) -> usize {
        ArcCache::capacity(self)
    }

    fn stats(&self) -> CacheStats {
        ArcCache::stats(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arc_scenario_recency_then_frequency() {
        let cache = ArcCache::with_capacity(4).unwrap();
        for key in ["A", "B", "C", "D"] {
            cache.set(key, key.to_lowercase());
        }
        assert_eq!(cache.get("A"), Some("a".to_string()));
        cache.set("E", "e".to_string());

        assert_eq!(cache.residency("A"), Some(ArcList::T2));
        assert_eq!(cache.residency("E"), Some(ArcList::T1));
        let ghosts = ["B", "C", "D"]
            .iter()
            .filter(|k| cache.residency(*k) == Some(ArcList::B1))
            .count();
        assert_eq!(ghosts, 1);
        let snap = cache.snapshot();
        assert_eq!(snap.t1 + snap.t2, 4);
        assert!(snap.invariants_hold());
    }

    #[test]
    fn test_second_access_promotes_to_t2() {
        let cache = ArcCache::with_capacity(2).unwrap();
        cache.set(1, 1);
        assert_eq!(cache.residency(&1), Some(ArcList::T1));
        cache.set(1, 2);
        assert_eq!(cache.residency(&1), Some(ArcList::T2));
        assert_eq!(cache.get(&1), Some(2));
    }

    /// T1 = [3], T2 = [1], B1 = [2], p = 0.
    fn cache_with_b1_ghost() -> ArcCache<u32, u32> {
        let cache = ArcCache::with_capacity(2).unwrap();
        cache.set(1, 1);
        cache.set(1, 1);
        cache.set(2, 2);
        cache.set(3, 3);
        cache
    }

    #[test]
    fn test_full_t1_drops_without_ghost() {
        let cache = ArcCache::with_capacity(2).unwrap();
        cache.set(1, 1);
        cache.set(2, 2);
        assert_eq!(cache.set(3, 3), Some((1, 1)));
        assert_eq!(cache.residency(&1), None);
    }

    #[test]
    fn test_get_on_ghost_is_a_miss() {
        let cache = cache_with_b1_ghost();
        assert_eq!(cache.residency(&2), Some(ArcList::B1));
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.residency(&2), Some(ArcList::B1));
        assert!(!cache.contains(&2));
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_b1_ghost_hit_grows_p() {
        let cache = cache_with_b1_ghost();
        assert_eq!(cache.snapshot().p, 0);
        let evicted = cache.set(2, 20);
        assert_eq!(evicted, Some((1, 1)));
        let snap = cache.snapshot();
        assert_eq!(snap.p, 1);
        assert_eq!(cache.residency(&2), Some(ArcList::T2));
        assert_eq!(cache.residency(&1), Some(ArcList::B2));
        assert_eq!(cache.peek(&2), Some(20));
        assert!(snap.invariants_hold());
    }

    #[test]
    fn test_b2_ghost_hit_shrinks_p() {
        let cache = cache_with_b1_ghost();
        cache.set(2, 20);
        assert_eq!(cache.snapshot().p, 1);
        let evicted = cache.set(1, 10);
        assert_eq!(evicted, Some((3, 3)));
        let snap = cache.snapshot();
        assert_eq!(snap.p, 0);
        assert_eq!(cache.residency(&1), Some(ArcList::T2));
        assert_eq!(cache.residency(&3), Some(ArcList::B1));
        assert!(snap.invariants_hold());
    }

    #[test]
    fn test_ghost_entries_hold_no_value() {
        let cache = ArcCache::with_capacity(1).unwrap();
        cache.set("x", 1);
        let evicted = cache.set("y", 2);
        assert_eq!(evicted, Some(("x", 1)));
        assert_eq!(cache.peek("x"), None);
        assert_eq!(cache.remove("x"), None);
        assert_eq!(cache.residency("x"), None);
    }

    #[test]
    fn test_invariants_under_mixed_workload() {
        let cache = ArcCache::with_capacity(8).unwrap();
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..5_000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let key = if state % 3 == 0 { state % 6 } else { state % 40 };
            if state % 2 == 0 {
                cache.get(&key);
            } else {
                cache.set(key, key);
            }
            assert!(cache.snapshot().invariants_hold());
            assert!(cache.len() <= 8);
        }
    }

    #[test]
    fn test_clear_resets_lists() {
        let cache = ArcCache::with_capacity(2).unwrap();
        cache.set(1, 1);
        cache.set(2, 2);
        cache.set(3, 3);
        cache.clear();
        let snap = cache.snapshot();
        assert_eq!((snap.t1, snap.t2, snap.b1, snap.b2, snap.p), (0, 0, 0, 0, 0));
    }

    #[test]
    fn test_huge_capacity_does_not_preallocate() {
        use crate::config::MAX_CAPACITY;
        use crate::error::CacheError;
        assert!(matches!(
            ArcCache::<u32, u32>::with_capacity(MAX_CAPACITY + 1),
            Err(CacheError::InvalidArgument(_))
        ));
        let cache = ArcCache::with_capacity(MAX_CAPACITY).unwrap();
        for i in 0..100u32 {
            assert_eq!(cache.set(i, i), None);
        }
        assert_eq!(cache.get(&7), Some(7));
        assert_eq!(cache.len(), 100);
        assert!(cache.snapshot().invariants_hold());
    }
}
