//! Key providers for envelope encryption.
//!
//! A provider owns key-encryption keys (KEKs) and hands out freshly
//! generated data-encryption keys (DEKs) together with their wrapped form.
//! Real deployments back this with a KMS; [`InMemoryKeyProvider`] keeps
//! versioned KEKs in process memory.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::aead::{self, AeadKey};
use crate::error::{CryptoError, CryptoResult};

/// A DEK and its wrapped form as returned by [`KeyProvider::generate_data_key`].
#[derive(Debug)]
pub struct GeneratedDataKey {
    /// Plaintext DEK. Wiped when dropped.
    pub dek: AeadKey,
    /// DEK encrypted under the provider key named by `key_id`.
    pub wrapped: Vec<u8>,
    /// Identifier of the wrapping key.
    pub key_id: String,
}

/// A DEK wrapped under a provider key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedDataKey {
    /// Encrypted DEK bytes.
    pub wrapped: Vec<u8>,
    /// Identifier of the wrapping key.
    pub key_id: String,
}

/// Source of data keys. Calls may block on remote I/O.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Generates a fresh 32-byte DEK wrapped under the current key.
    async fn generate_data_key(&self) -> CryptoResult<GeneratedDataKey>;

    /// Unwraps a DEK previously wrapped under `key_id`.
    async fn decrypt_data_key(&self, wrapped: &[u8], key_id: &str) -> CryptoResult<AeadKey>;

    /// Wraps an existing DEK under the current key.
    async fn encrypt_data_key(&self, dek: &AeadKey) -> CryptoResult<WrappedDataKey>;
}

/// Configuration for the in-memory key provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyProviderConfig {
    /// Key name; key ids are `"<name>/v<version>"`.
    pub key_name: String,
    /// Maximum number of previous KEK versions kept for unwrapping old DEKs.
    pub max_key_history: usize,
}

impl Default for KeyProviderConfig {
    fn default() -> Self {
        Self {
            key_name: "default".to_string(),
            max_key_history: 10,
        }
    }
}

impl KeyProviderConfig {
    /// Rejects key names that cannot round-trip through a key id.
    pub fn validate(&self) -> CryptoResult<()> {
        if self.key_name.is_empty() || self.key_name.contains('/') {
            return Err(CryptoError::InvalidArgument(format!(
                "key name must be non-empty and contain no '/': {:?}",
                self.key_name
            )));
        }
        Ok(())
    }
}

struct Keyring {
    current_version: u32,
    current: AeadKey,
    history: BTreeMap<u32, AeadKey>,
}

/// Versioned KEKs held in memory, with rotation.
pub struct InMemoryKeyProvider {
    config: KeyProviderConfig,
    keyring: RwLock<Keyring>,
}

impl InMemoryKeyProvider {
    /// Creates a provider with a random KEK at version 1.
    pub fn new(config: KeyProviderConfig) -> CryptoResult<Self> {
        Self::with_key(config, AeadKey::generate())
    }

    /// Creates a provider whose version-1 KEK is `kek`.
    pub fn with_key(config: KeyProviderConfig, kek: AeadKey) -> CryptoResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            keyring: RwLock::new(Keyring {
                current_version: 1,
                current: kek,
                history: BTreeMap::new(),
            }),
        })
    }

    fn key_id(&self, version: u32) -> String {
        format!("{}/v{}", self.config.key_name, version)
    }

    fn parse_key_id(&self, key_id: &str) -> CryptoResult<u32> {
        key_id
            .strip_prefix(self.config.key_name.as_str())
            .and_then(|rest| rest.strip_prefix("/v"))
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| CryptoError::NotFound(key_id.to_string()))
    }

    /// Id of the KEK new DEKs are wrapped under.
    pub fn current_key_id(&self) -> String {
        self.key_id(self.keyring.read().current_version)
    }

    /// Ids of every KEK that can still unwrap, oldest first.
    pub fn key_ids(&self) -> Vec<String> {
        let ring = self.keyring.read();
        ring.history
            .keys()
            .copied()
            .chain(std::iter::once(ring.current_version))
            .map(|v| self.key_id(v))
            .collect()
    }

    /// Installs a new random KEK and returns its id. The previous KEK moves
    /// to history; the oldest history entries beyond `max_key_history` are
    /// forgotten.
    pub fn rotate(&self) -> String {
        self.rotate_to(AeadKey::generate())
    }

    /// Like [`InMemoryKeyProvider::rotate`] with caller-supplied key material.
    pub fn rotate_to(&self, kek: AeadKey) -> String {
        let mut ring = self.keyring.write();
        let previous = std::mem::replace(&mut ring.current, kek);
        let previous_version = ring.current_version;
        ring.history.insert(previous_version, previous);
        ring.current_version += 1;
        while ring.history.len() > self.config.max_key_history {
            ring.history.pop_first();
        }
        let id = self.key_id(ring.current_version);
        debug!(key_id = %id, history = ring.history.len(), "KEK rotated");
        id
    }

    fn wrap(&self, dek: &AeadKey) -> CryptoResult<WrappedDataKey> {
        let ring = self.keyring.read();
        let wrapped = aead::seal(&ring.current, dek.as_bytes())?;
        Ok(WrappedDataKey {
            wrapped,
            key_id: self.key_id(ring.current_version),
        })
    }
}

#[async_trait]
impl KeyProvider for InMemoryKeyProvider {
    async fn generate_data_key(&self) -> CryptoResult<GeneratedDataKey> {
        let dek = AeadKey::generate();
        let WrappedDataKey { wrapped, key_id } = self.wrap(&dek)?;
        trace!(key_id = %key_id, "data key generated");
        Ok(GeneratedDataKey {
            dek,
            wrapped,
            key_id,
        })
    }

    async fn decrypt_data_key(&self, wrapped: &[u8], key_id: &str) -> CryptoResult<AeadKey> {
        let version = self.parse_key_id(key_id)?;
        let ring = self.keyring.read();
        let kek = if version == ring.current_version {
            &ring.current
        } else {
            ring.history
                .get(&version)
                .ok_or_else(|| CryptoError::NotFound(key_id.to_string()))?
        };
        let mut raw = aead::open(kek, wrapped)?;
        let dek = AeadKey::from_slice(&raw);
        zeroize::Zeroize::zeroize(&mut raw);
        dek.map_err(|_| CryptoError::Internal("unwrapped key has the wrong length".into()))
    }

    async fn encrypt_data_key(&self, dek: &AeadKey) -> CryptoResult<WrappedDataKey> {
        self.wrap(dek)
    }
}
