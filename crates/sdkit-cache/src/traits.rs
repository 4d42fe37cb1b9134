//! The policy-independent cache interface.

use crate::config::CacheStats;

/// Operations every bounded cache offers.
///
/// All implementations serialize callers on an internal lock, so a shared
/// reference is enough to mutate. `get` counts as an access and may
/// reorder internal lists; it is never a read-only operation.
pub trait Cache<K, V>: Send + Sync {
    /// Looks up `key`, recording the access. Returns `None` on a miss.
    fn get(&self, key: &K) -> Option<V>;

    /// Inserts or updates `key`. Returns the resident entry evicted to make room, if any.
    fn set(&self, key: K, value: V) -> Option<(K, V)>;

    /// Removes `key`, returning its value if it was resident.
    fn remove(&self, key: &K) -> Option<V>;

    /// Number of resident entries.
    fn len(&self) -> usize;

    /// True when nothing is resident.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of resident entries.
    fn capacity(&self) -> usize;

    /// Snapshot of the hit/miss counters.
    fn stats(&self) -> CacheStats;
}
