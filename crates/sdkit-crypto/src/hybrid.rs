//! Hybrid classical + post-quantum KEM and the sealed frame built on it.
//!
//! The hybrid shared secret is `HKDF-SHA256(ss_classical ‖ ss_pq)` with a
//! fixed info tag, so it stays secret as long as either inner KEM holds.
//! Hybrid keys and ciphertexts are the fixed-width concatenations of the
//! inner ones, classical first.
//!
//! [`HybridSealer`] encrypts a payload under a fresh hybrid encapsulation:
//!
//! ```text
//! len32(ct_classical) ‖ ct_classical ‖ len32(ct_pq) ‖ ct_pq ‖ nonce(12) ‖ aead_ciphertext
//! ```
//!
//! Length prefixes are big-endian u32.

use tracing::trace;

use crate::aead::{self, AeadKey};
use crate::error::{CryptoError, CryptoResult};
use crate::kem::{
    check_len, Encapsulation, Kem, KemKeyPair, MlKem768, SecretBytes, SharedSecret, X25519Kem,
};

/// HKDF info tag for the hybrid combiner.
pub const HYBRID_KDF_INFO: &[u8] = b"hybrid-kem";

/// Two KEMs composed into one.
#[derive(Debug, Clone, Default)]
pub struct HybridKem<C = X25519Kem, Q = MlKem768> {
    classical: C,
    post_quantum: Q,
}

impl HybridKem<X25519Kem, MlKem768> {
    /// X25519 combined with ML-KEM-768.
    pub fn x25519_mlkem768() -> Self {
        Self::new(X25519Kem, MlKem768)
    }
}

impl<C: Kem, Q: Kem> HybridKem<C, Q> {
    /// Composes `classical` and `post_quantum`.
    pub fn new(classical: C, post_quantum: Q) -> Self {
        Self {
            classical,
            post_quantum,
        }
    }

    /// The classical half.
    pub fn classical(&self) -> &C {
        &self.classical
    }

    /// The post-quantum half.
    pub fn post_quantum(&self) -> &Q {
        &self.post_quantum
    }

    fn combine(
        classical: &SharedSecret,
        post_quantum: &SharedSecret,
    ) -> CryptoResult<SharedSecret> {
        let ikm = SecretBytes::new([classical.as_bytes(), post_quantum.as_bytes()].concat());
        let key = aead::derive_key(ikm.as_bytes(), HYBRID_KDF_INFO)?;
        Ok(SecretBytes::new(key.as_bytes().to_vec()))
    }

    fn split<'a>(
        what: &str,
        bytes: &'a [u8],
        first: usize,
        second: usize,
    ) -> CryptoResult<(&'a [u8], &'a [u8])> {
        check_len(what, bytes, first + second)?;
        Ok(bytes.split_at(first))
    }

    /// Encapsulates to both halves of a hybrid public key and returns the
    /// inner ciphertexts separately along with the combined secret.
    pub fn encapsulate_parts(
        &self,
        public_key: &[u8],
    ) -> CryptoResult<(Vec<u8>, Vec<u8>, SharedSecret)> {
        let (pk_c, pk_q) = Self::split(
            "hybrid public key",
            public_key,
            self.classical.public_key_size(),
            self.post_quantum.public_key_size(),
        )?;
        let c = self.classical.encapsulate(pk_c)?;
        let q = self.post_quantum.encapsulate(pk_q)?;
        let shared = Self::combine(&c.shared_secret, &q.shared_secret)?;
        Ok((c.ciphertext, q.ciphertext, shared))
    }

    /// Decapsulates both inner ciphertexts and combines the secrets.
    pub fn decapsulate_parts(
        &self,
        private_key: &[u8],
        ct_classical: &[u8],
        ct_post_quantum: &[u8],
    ) -> CryptoResult<SharedSecret> {
        let (sk_c, sk_q) = Self::split(
            "hybrid private key",
            private_key,
            self.classical.private_key_size(),
            self.post_quantum.private_key_size(),
        )?;
        let ss_c = self.classical.decapsulate(sk_c, ct_classical)?;
        let ss_q = self.post_quantum.decapsulate(sk_q, ct_post_quantum)?;
        Self::combine(&ss_c, &ss_q)
    }
}

impl<C: Kem, Q: Kem> Kem for HybridKem<C, Q> {
    fn name(&self) -> String {
        format!("{}+{}", self.classical.name(), self.post_quantum.name())
    }

    fn public_key_size(&self) -> usize {
        self.classical.public_key_size() + self.post_quantum.public_key_size()
    }

    fn private_key_size(&self) -> usize {
        self.classical.private_key_size() + self.post_quantum.private_key_size()
    }

    fn ciphertext_size(&self) -> usize {
        self.classical.ciphertext_size() + self.post_quantum.ciphertext_size()
    }

    fn shared_secret_size(&self) -> usize {
        aead::KEY_LEN
    }

    fn generate_keypair(&self) -> CryptoResult<KemKeyPair> {
        let c = self.classical.generate_keypair()?;
        let q = self.post_quantum.generate_keypair()?;
        Ok(KemKeyPair {
            public_key: [c.public_key.as_slice(), q.public_key.as_slice()].concat(),
            private_key: SecretBytes::new(
                [c.private_key.as_bytes(), q.private_key.as_bytes()].concat(),
            ),
        })
    }

    fn encapsulate(&self, public_key: &[u8]) -> CryptoResult<Encapsulation> {
        let (ct_c, ct_q, shared_secret) = self.encapsulate_parts(public_key)?;
        Ok(Encapsulation {
            ciphertext: [ct_c, ct_q].concat(),
            shared_secret,
        })
    }

    fn decapsulate(&self, private_key: &[u8], ciphertext: &[u8]) -> CryptoResult<SharedSecret> {
        let (ct_c, ct_q) = Self::split(
            "hybrid ciphertext",
            ciphertext,
            self.classical.ciphertext_size(),
            self.post_quantum.ciphertext_size(),
        )?;
        self.decapsulate_parts(private_key, ct_c, ct_q)
    }
}

/// Encrypts payloads to a hybrid public key.
#[derive(Debug, Clone, Default)]
pub struct HybridSealer<C = X25519Kem, Q = MlKem768> {
    kem: HybridKem<C, Q>,
}

fn push_prefixed(out: &mut Vec<u8>, bytes: &[u8]) -> CryptoResult<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| CryptoError::InvalidArgument("ciphertext exceeds u32 length".into()))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

fn take_prefixed<'a>(frame: &mut &'a [u8], what: &str) -> CryptoResult<&'a [u8]> {
    if frame.len() < 4 {
        return Err(CryptoError::InvalidArgument(format!(
            "frame truncated before {} length",
            what
        )));
    }
    let (len, rest) = frame.split_at(4);
    let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
    if rest.len() < len {
        return Err(CryptoError::InvalidArgument(format!(
            "frame truncated inside {}: need {} bytes, have {}",
            what,
            len,
            rest.len()
        )));
    }
    let (body, rest) = rest.split_at(len);
    *frame = rest;
    Ok(body)
}

impl HybridSealer<X25519Kem, MlKem768> {
    /// Sealer over X25519 + ML-KEM-768.
    pub fn x25519_mlkem768() -> Self {
        Self::new(HybridKem::x25519_mlkem768())
    }
}

impl<C: Kem, Q: Kem> HybridSealer<C, Q> {
    /// Wraps a hybrid KEM.
    pub fn new(kem: HybridKem<C, Q>) -> Self {
        Self { kem }
    }

    /// The underlying KEM, for key generation.
    pub fn kem(&self) -> &HybridKem<C, Q> {
        &self.kem
    }

    /// Seals `plaintext` to a hybrid public key.
    pub fn seal(&self, public_key: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let (ct_c, ct_q, shared) = self.kem.encapsulate_parts(public_key)?;
        let key = AeadKey::from_slice(shared.as_bytes())?;
        let sealed = aead::seal(&key, plaintext)?;
        let mut frame = Vec::with_capacity(8 + ct_c.len() + ct_q.len() + sealed.len());
        push_prefixed(&mut frame, &ct_c)?;
        push_prefixed(&mut frame, &ct_q)?;
        frame.extend_from_slice(&sealed);
        trace!(plaintext = plaintext.len(), frame = frame.len(), "hybrid frame sealed");
        Ok(frame)
    }

    /// Opens a frame produced by [`HybridSealer::seal`].
    pub fn open(&self, private_key: &[u8], frame: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut rest = frame;
        let ct_c = take_prefixed(&mut rest, "classical ciphertext")?;
        let ct_q = take_prefixed(&mut rest, "post-quantum ciphertext")?;
        let shared = self.kem.decapsulate_parts(private_key, ct_c, ct_q)?;
        let key = AeadKey::from_slice(shared.as_bytes())?;
        aead::open(&key, rest)
    }
}
