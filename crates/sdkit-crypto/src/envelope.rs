//! Envelope encryption over a [`KeyProvider`].
//!
//! Each message gets its own DEK. The message is sealed with AES-256-GCM
//! under the DEK, the DEK is wrapped by the provider, and both travel
//! together as an [`EnvelopePayload`].

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::aead;
use crate::error::{CryptoError, CryptoResult};
use crate::key_provider::{GeneratedDataKey, KeyProvider, WrappedDataKey};

/// The only payload algorithm currently produced or accepted.
pub const ENVELOPE_ALGORITHM: &str = "AES-256-GCM";

/// Serialized form of an encrypted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopePayload {
    /// Base64 of `nonce(12) ‖ ciphertext ‖ tag(16)`.
    pub encrypted_data: String,
    /// Base64 of the wrapped DEK.
    pub encrypted_dek: String,
    /// Provider key the DEK is wrapped under.
    pub key_id: String,
    /// Payload algorithm, `"AES-256-GCM"`.
    pub algorithm: String,
}

impl EnvelopePayload {
    /// Renders the payload as a JSON object.
    pub fn to_json(&self) -> CryptoResult<String> {
        serde_json::to_string(self).map_err(|e| CryptoError::Internal(e.to_string()))
    }

    /// Parses a JSON object produced by [`EnvelopePayload::to_json`].
    pub fn from_json(json: &str) -> CryptoResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| CryptoError::InvalidArgument(format!("malformed envelope: {}", e)))
    }

    fn decode(field: &str, value: &str) -> CryptoResult<Vec<u8>> {
        BASE64
            .decode(value)
            .map_err(|e| CryptoError::InvalidArgument(format!("{} is not base64: {}", field, e)))
    }

    fn check_algorithm(&self) -> CryptoResult<()> {
        if self.algorithm != ENVELOPE_ALGORITHM {
            return Err(CryptoError::InvalidArgument(format!(
                "unsupported envelope algorithm: {}",
                self.algorithm
            )));
        }
        Ok(())
    }
}

/// Encrypts and decrypts envelopes. Stateless apart from the provider
/// handle, so one encryptor can serve many tasks.
pub struct EnvelopeEncryptor<P: ?Sized> {
    provider: Arc<P>,
}

impl<P: ?Sized> Clone for EnvelopeEncryptor<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
        }
    }
}

impl<P: KeyProvider + ?Sized> EnvelopeEncryptor<P> {
    /// Creates an encryptor over `provider`.
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }

    /// The key provider.
    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// Encrypts `plaintext` under a fresh DEK.
    #[instrument(skip(self, plaintext), fields(bytes = plaintext.len()))]
    pub async fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<EnvelopePayload> {
        let GeneratedDataKey {
            dek,
            wrapped,
            key_id,
        } = self.provider.generate_data_key().await?;
        let sealed = aead::seal(&dek, plaintext);
        drop(dek);
        let sealed = sealed?;
        debug!(key_id = %key_id, "envelope encrypted");
        Ok(EnvelopePayload {
            encrypted_data: BASE64.encode(sealed),
            encrypted_dek: BASE64.encode(wrapped),
            key_id,
            algorithm: ENVELOPE_ALGORITHM.to_string(),
        })
    }

    /// Decrypts a payload. Provider errors are returned unchanged; a
    /// tampered ciphertext fails with `InvalidArgument`.
    #[instrument(skip(self, payload), fields(key_id = %payload.key_id))]
    pub async fn decrypt(&self, payload: &EnvelopePayload) -> CryptoResult<Vec<u8>> {
        payload.check_algorithm()?;
        let sealed = EnvelopePayload::decode("encrypted_data", &payload.encrypted_data)?;
        let wrapped = EnvelopePayload::decode("encrypted_dek", &payload.encrypted_dek)?;
        if sealed.len() < aead::NONCE_LEN + aead::TAG_LEN {
            return Err(CryptoError::InvalidArgument(format!(
                "encrypted_data too short: {} bytes",
                sealed.len()
            )));
        }
        let dek = self
            .provider
            .decrypt_data_key(&wrapped, &payload.key_id)
            .await?;
        let plaintext = aead::open(&dek, &sealed);
        drop(dek);
        plaintext
    }

    /// Re-wraps the payload's DEK under the provider's current key. The
    /// data ciphertext is left untouched.
    pub async fn rewrap(&self, payload: &EnvelopePayload) -> CryptoResult<EnvelopePayload> {
        payload.check_algorithm()?;
        let wrapped = EnvelopePayload::decode("encrypted_dek", &payload.encrypted_dek)?;
        let dek = self
            .provider
            .decrypt_data_key(&wrapped, &payload.key_id)
            .await?;
        let rewrapped = self.provider.encrypt_data_key(&dek).await;
        drop(dek);
        let WrappedDataKey { wrapped, key_id } = rewrapped?;
        debug!(from = %payload.key_id, to = %key_id, "envelope DEK rewrapped");
        Ok(EnvelopePayload {
            encrypted_data: payload.encrypted_data.clone(),
            encrypted_dek: BASE64.encode(wrapped),
            key_id,
            algorithm: payload.algorithm.clone(),
        })
    }
}
