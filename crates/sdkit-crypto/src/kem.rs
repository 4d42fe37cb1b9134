//! Key encapsulation mechanisms.
//!
//! [`Kem`] is a byte-oriented, object-safe interface so that the hybrid
//! combiner can compose any two implementations. Keys, ciphertexts and
//! shared secrets all travel as fixed-width byte strings.

use ml_kem::kem::{Decapsulate, Encapsulate};
use ml_kem::{Ciphertext, Encoded, EncodedSizeUser, KemCore};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};

/// Secret byte string, wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    /// Takes ownership of secret material.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The secret bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for an empty secret.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes([REDACTED; {}])", self.0.len())
    }
}

/// A shared secret produced by encapsulation or decapsulation.
pub type SharedSecret = SecretBytes;

/// A public/private key pair.
#[derive(Debug, Clone)]
pub struct KemKeyPair {
    /// Encoded public (encapsulation) key.
    pub public_key: Vec<u8>,
    /// Encoded private (decapsulation) key.
    pub private_key: SecretBytes,
}

/// Result of encapsulating to a public key.
#[derive(Debug, Clone)]
pub struct Encapsulation {
    /// Ciphertext to send to the key holder.
    pub ciphertext: Vec<u8>,
    /// Secret shared with the key holder.
    pub shared_secret: SharedSecret,
}

/// A key encapsulation mechanism.
pub trait Kem: Send + Sync {
    /// Human-readable algorithm name.
    fn name(&self) -> String;
    /// Encoded public key length.
    fn public_key_size(&self) -> usize;
    /// Encoded private key length.
    fn private_key_size(&self) -> usize;
    /// Ciphertext length.
    fn ciphertext_size(&self) -> usize;
    /// Shared secret length.
    fn shared_secret_size(&self) -> usize;
    /// Generates a fresh key pair.
    fn generate_keypair(&self) -> CryptoResult<KemKeyPair>;
    /// Produces a ciphertext and the shared secret it carries.
    fn encapsulate(&self, public_key: &[u8]) -> CryptoResult<Encapsulation>;
    /// Recovers the shared secret from a ciphertext.
    fn decapsulate(&self, private_key: &[u8], ciphertext: &[u8]) -> CryptoResult<SharedSecret>;
}

pub(crate) fn check_len(what: &str, bytes: &[u8], expected: usize) -> CryptoResult<()> {
    if bytes.len() != expected {
        return Err(CryptoError::InvalidArgument(format!(
            "{} must be {} bytes, got {}",
            what,
            expected,
            bytes.len()
        )));
    }
    Ok(())
}

fn array32(what: &str, bytes: &[u8]) -> CryptoResult<[u8; 32]> {
    check_len(what, bytes, 32)?;
    let mut out = [0u8; 32];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// X25519 Diffie-Hellman as a KEM. The ciphertext is the sender's
/// ephemeral public key.
#[derive(Debug, Clone, Copy, Default)]
pub struct X25519Kem;

impl Kem for X25519Kem {
    fn name(&self) -> String {
        "X25519".into()
    }

    fn public_key_size(&self) -> usize {
        32
    }

    fn private_key_size(&self) -> usize {
        32
    }

    fn ciphertext_size(&self) -> usize {
        32
    }

    fn shared_secret_size(&self) -> usize {
        32
    }

    fn generate_keypair(&self) -> CryptoResult<KemKeyPair> {
        let secret = StaticSecret::random_from_rng(rand::thread_rng());
        let public = PublicKey::from(&secret);
        let mut raw = secret.to_bytes();
        let private_key = SecretBytes::new(raw.to_vec());
        raw.zeroize();
        Ok(KemKeyPair {
            public_key: public.as_bytes().to_vec(),
            private_key,
        })
    }

    fn encapsulate(&self, public_key: &[u8]) -> CryptoResult<Encapsulation> {
        let peer = PublicKey::from(array32("X25519 public key", public_key)?);
        let ephemeral = EphemeralSecret::random_from_rng(rand::thread_rng());
        let ciphertext = PublicKey::from(&ephemeral).as_bytes().to_vec();
        let shared = ephemeral.diffie_hellman(&peer);
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidArgument(
                "X25519 public key is a low-order point".into(),
            ));
        }
        Ok(Encapsulation {
            ciphertext,
            shared_secret: SecretBytes::new(shared.as_bytes().to_vec()),
        })
    }

    fn decapsulate(&self, private_key: &[u8], ciphertext: &[u8]) -> CryptoResult<SharedSecret> {
        let mut raw = array32("X25519 private key", private_key)?;
        let secret = StaticSecret::from(raw);
        raw.zeroize();
        let ephemeral = PublicKey::from(array32("X25519 ciphertext", ciphertext)?);
        let shared = secret.diffie_hellman(&ephemeral);
        if !shared.was_contributory() {
            return Err(CryptoError::Internal(
                "X25519 decapsulation produced a non-contributory secret".into(),
            ));
        }
        Ok(SecretBytes::new(shared.as_bytes().to_vec()))
    }
}

type MlKem768Core = ml_kem::MlKem768;
type MlKemEncapsulationKey = <MlKem768Core as KemCore>::EncapsulationKey;
type MlKemDecapsulationKey = <MlKem768Core as KemCore>::DecapsulationKey;

/// Encoded ML-KEM-768 encapsulation key length.
pub const MLKEM768_PUBLIC_KEY_SIZE: usize = 1184;
/// Encoded ML-KEM-768 decapsulation key length.
pub const MLKEM768_PRIVATE_KEY_SIZE: usize = 2400;
/// ML-KEM-768 ciphertext length.
pub const MLKEM768_CIPHERTEXT_SIZE: usize = 1088;

/// ML-KEM-768 (FIPS 203, Kyber-768 parameters).
///
/// Decapsulating a tampered ciphertext does not fail: implicit rejection
/// yields an unrelated secret, so tampering surfaces at the AEAD layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct MlKem768;

impl Kem for MlKem768 {
    fn name(&self) -> String {
        "ML-KEM-768".into()
    }

    fn public_key_size(&self) -> usize {
        MLKEM768_PUBLIC_KEY_SIZE
    }

    fn private_key_size(&self) -> usize {
        MLKEM768_PRIVATE_KEY_SIZE
    }

    fn ciphertext_size(&self) -> usize {
        MLKEM768_CIPHERTEXT_SIZE
    }

    fn shared_secret_size(&self) -> usize {
        32
    }

    fn generate_keypair(&self) -> CryptoResult<KemKeyPair> {
        let (dk, ek) = MlKem768Core::generate(&mut rand::thread_rng());
        let mut dk_bytes = dk.as_bytes();
        let private_key = SecretBytes::new(dk_bytes.as_slice().to_vec());
        dk_bytes.as_mut_slice().zeroize();
        Ok(KemKeyPair {
            public_key: ek.as_bytes().as_slice().to_vec(),
            private_key,
        })
    }

    fn encapsulate(&self, public_key: &[u8]) -> CryptoResult<Encapsulation> {
        check_len("ML-KEM-768 public key", public_key, MLKEM768_PUBLIC_KEY_SIZE)?;
        let encoded = Encoded::<MlKemEncapsulationKey>::try_from(public_key)
            .map_err(|e| CryptoError::InvalidArgument(e.to_string()))?;
        let ek = MlKemEncapsulationKey::from_bytes(&encoded);
        let (ciphertext, shared) = ek
            .encapsulate(&mut rand::thread_rng())
            .map_err(|_| CryptoError::Internal("ML-KEM encapsulation failed".into()))?;
        Ok(Encapsulation {
            ciphertext: ciphertext.as_slice().to_vec(),
            shared_secret: SecretBytes::new(shared.as_slice().to_vec()),
        })
    }

    fn decapsulate(&self, private_key: &[u8], ciphertext: &[u8]) -> CryptoResult<SharedSecret> {
        check_len("ML-KEM-768 private key", private_key, MLKEM768_PRIVATE_KEY_SIZE)?;
        check_len("ML-KEM-768 ciphertext", ciphertext, MLKEM768_CIPHERTEXT_SIZE)?;
        let encoded = Encoded::<MlKemDecapsulationKey>::try_from(private_key)
            .map_err(|e| CryptoError::InvalidArgument(e.to_string()))?;
        let dk = MlKemDecapsulationKey::from_bytes(&encoded);
        let ct = Ciphertext::<MlKem768Core>::try_from(ciphertext)
            .map_err(|e| CryptoError::InvalidArgument(e.to_string()))?;
        let shared = dk
            .decapsulate(&ct)
            .map_err(|_| CryptoError::Internal("ML-KEM decapsulation failed".into()))?;
        Ok(SecretBytes::new(shared.as_slice().to_vec()))
    }
}
