//! Error types for the sdkit-sketch subsystem

/// Result type alias for sketch operations.
pub type SketchResult<T> = Result<T, SketchError>;

/// All errors that can occur while building or combining sketches.
#[derive(Debug, thiserror::Error)]
pub enum SketchError {
    /// Malformed input: empty Merkle data, out-of-range parameters or proof
    /// index, or two sketches whose shapes differ.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
