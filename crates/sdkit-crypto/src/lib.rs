#![warn(missing_docs)]

//! sdkit crypto subsystem: hybrid X25519 + ML-KEM-768 key encapsulation,
//! AES-256-GCM framing, and envelope encryption over pluggable key providers.

pub mod aead;
pub mod envelope;
pub mod error;
pub mod hybrid;
pub mod kem;
pub mod key_provider;

pub use aead::{derive_key, open, random_nonce, seal, AeadKey};
pub use envelope::{EnvelopeEncryptor, EnvelopePayload, ENVELOPE_ALGORITHM};
pub use error::{CryptoError, CryptoResult};
pub use hybrid::{HybridKem, HybridSealer, HYBRID_KDF_INFO};
pub use kem::{Encapsulation, Kem, KemKeyPair, MlKem768, SecretBytes, SharedSecret, X25519Kem};
pub use key_provider::{
    GeneratedDataKey, InMemoryKeyProvider, KeyProvider, KeyProviderConfig, WrappedDataKey,
};
