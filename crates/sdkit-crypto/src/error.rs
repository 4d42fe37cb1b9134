//! Error types for the sdkit-crypto subsystem

/// Result type alias for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// All errors that can occur in KEMs, AEAD framing and envelope encryption.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Malformed input: wrong-sized key, truncated frame, bad payload,
    /// or a ciphertext that fails authentication.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// The key provider does not know the referenced key id.
    #[error("Key not found: {0}")]
    NotFound(String),
    /// Underlying primitive failure or broken invariant.
    #[error("Internal error: {0}")]
    Internal(String),
    /// Failure reported by an external key provider, passed through as is.
    #[error("Key provider error: {0}")]
    Provider(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The key provider call was cancelled by its caller.
    #[error("Operation cancelled")]
    Cancelled,
}
