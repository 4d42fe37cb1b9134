//! Error types for the sdkit-cache subsystem

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// All errors that can occur when configuring a cache.
///
/// Lookups never fail: a miss is reported as `None`, not as an error.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A configuration value is unusable (for example a zero capacity).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
