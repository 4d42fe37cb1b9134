#![warn(missing_docs)]

//! sdkit cache subsystem: bounded in-memory caches behind one interface.
//!
//! - [`LruCache`]: recency only, O(1).
//! - [`LfuCache`]: minimum frequency first, LRU among equals, O(1).
//! - [`ArcCache`]: adaptive split between recency and frequency.
//!
//! Every cache serializes callers on an internal mutex.

pub mod arc;
pub mod config;
pub mod error;
pub mod lfu;
pub mod lru;
pub mod slab;
pub mod traits;

pub use arc::{ArcCache, ArcList, ArcSnapshot};
pub use config::{CacheConfig, CacheStats, MAX_CAPACITY};
pub use error::{CacheError, CacheResult};
pub use lfu::LfuCache;
pub use lru::LruCache;
pub use traits::Cache;
