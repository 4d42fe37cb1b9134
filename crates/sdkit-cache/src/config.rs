//! Cache configuration and hit/miss accounting.

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// Largest accepted capacity. ARC tracks up to twice this many keys.
pub const MAX_CAPACITY: usize = usize::MAX / 2;

/// Entries reserved at construction; indexes grow past this on demand.
const PREALLOCATE_LIMIT: usize = 4096;

/// Configuration shared by every cache policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of resident entries (default 1024).
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

impl CacheConfig {
    /// Config with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity }
    }

    /// Rejects configurations no cache can honour.
    pub fn validate(&self) -> CacheResult<()> {
        if self.capacity == 0 {
            return Err(CacheError::InvalidArgument(
                "cache capacity must be at least 1".to_string(),
            ));
        }
        if self.capacity > MAX_CAPACITY {
            return Err(CacheError::InvalidArgument(format!(
                "cache capacity must be at most {}, got {}",
                MAX_CAPACITY, self.capacity
            )));
        }
        Ok(())
    }

    /// Up-front reservation for an index holding `keys_per_slot` keys per
    /// unit of capacity.
    pub(crate) fn initial_slots(&self, keys_per_slot: usize) -> usize {
        self.capacity
            .saturating_mul(keys_per_slot)
            .min(PREALLOCATE_LIMIT)
    }
}

/// Statistics tracked by every cache policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups that found a resident entry.
    pub hits: u64,
    /// Lookups that found nothing (ghost entries count as misses).
    pub misses: u64,
    /// New keys admitted.
    pub insertions: u64,
    /// Resident entries dropped to make room.
    pub evictions: u64,
}

impl CacheStats {
    /// Ratio of hits to total lookups; 0.0 before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_capacity_rejected() {
        let err = CacheConfig::with_capacity(0).validate().unwrap_err();
        assert!(matches!(err, CacheError::InvalidArgument(_)));
    }

    #[test]
    fn test_oversized_capacity_rejected() {
        assert!(CacheConfig::with_capacity(MAX_CAPACITY).validate().is_ok());
        let err = CacheConfig::with_capacity(MAX_CAPACITY + 1)
            .validate()
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidArgument(_)));
        assert!(CacheConfig::with_capacity(usize::MAX).validate().is_err());
    }

    #[test]
    fn test_initial_slots_are_bounded() {
        assert_eq!(CacheConfig::with_capacity(8).initial_slots(2), 16);
        assert_eq!(CacheConfig::with_capacity(MAX_CAPACITY).initial_slots(2), 4096);
        assert_eq!(CacheConfig::with_capacity(100_000).initial_slots(1), 4096);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: CacheConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.capacity, 1024);
        let config: CacheConfig = serde_json::from_str(r#"{"capacity": 8}"#).unwrap();
        assert_eq!(config.capacity, 8);
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
