//! AES-256-GCM sealing with HKDF-SHA256 key derivation.
//!
//! Sealed buffers are laid out as `nonce(12) ‖ ciphertext ‖ tag(16)`.

use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;
/// GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;
/// GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// 256-bit symmetric key, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AeadKey([u8; KEY_LEN]);

impl std::fmt::Debug for AeadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AeadKey([REDACTED])")
    }
}

impl AeadKey {
    /// Fresh random key from the thread RNG.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        Self(key)
    }

    /// Copies a key out of a 32-byte slice.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidArgument(format!(
                "key must be {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

/// Generate a cryptographically random 12-byte nonce
pub fn random_nonce() -> [u8; NONCE_LEN] {
    let mut bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Derives a key from input keying material using HKDF-SHA256 without salt.
pub fn derive_key(ikm: &[u8], info: &[u8]) -> CryptoResult<AeadKey> {
    let hk = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = [0u8; KEY_LEN];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::Internal(format!("HKDF expand failed: {}", e)))?;
    Ok(AeadKey(okm))
}

fn cipher(key: &AeadKey) -> CryptoResult<Aes256Gcm> {
    Aes256Gcm::new_from_slice(&key.0).map_err(|e| CryptoError::Internal(e.to_string()))
}

/// Encrypts under a fresh random nonce and prepends the nonce.
pub fn seal(key: &AeadKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let nonce = random_nonce();
    let ciphertext = cipher(key)?
        .encrypt(aes_gcm::Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::Internal(format!("encryption failed: {}", e)))?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Reverses [`seal`]. Tampering surfaces as `InvalidArgument`.
pub fn open(key: &AeadKey, sealed: &[u8]) -> CryptoResult<Vec<u8>> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::InvalidArgument(format!(
            "ciphertext too short: {} bytes",
            sealed.len()
        )));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher(key)?
        .decrypt(aes_gcm::Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::InvalidArgument("authentication failed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_key() -> AeadKey {
        AeadKey([42u8; KEY_LEN])
    }

    proptest! {
        #[test]
        fn prop_seal_open_roundtrip(data in prop::collection::vec(any::<u8>(), 0..8192)) {
            let key = test_key();
            let sealed = seal(&key, &data).unwrap();
            prop_assert_eq!(sealed.len(), NONCE_LEN + data.len() + TAG_LEN);
            prop_assert_eq!(open(&key, &sealed).unwrap(), data);
        }
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = test_key();
        let mut sealed = seal(&key, b"secret data").unwrap();
        sealed[NONCE_LEN] ^= 0xFF;
        assert!(matches!(open(&key, &sealed), Err(CryptoError::InvalidArgument(_))));
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal(&test_key(), b"secret data").unwrap();
        assert!(open(&AeadKey([7u8; KEY_LEN]), &sealed).is_err());
    }

    #[test]
    fn test_short_input_rejected() {
        let err = open(&test_key(), &[0u8; NONCE_LEN + TAG_LEN - 1]).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidArgument(msg) if msg.contains("too short")));
    }

    #[test]
    fn test_nonces_are_unique() {
        let key = test_key();
        let a = seal(&key, b"same").unwrap();
        let b = seal(&key, b"same").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }

    #[test]
    fn test_derive_key_is_deterministic_per_info() {
        let a = derive_key(b"ikm", b"one").unwrap();
        let b = derive_key(b"ikm", b"one").unwrap();
        let c = derive_key(b"ikm", b"two").unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        assert_eq!(format!("{:?}", test_key()), "AeadKey([REDACTED])");
        assert!(AeadKey::from_slice(&[1u8; 31]).is_err());
    }
}
