//! AEAD algorithm selection for TLS 1.3 record protection.

use alloc::vec::Vec;

use super::aes_gcm::AesGcm;
use super::chacha20::ChaCha20Poly1305;
use super::CryptoError;

/// Nonce length shared by every TLS 1.3 AEAD.
pub const NONCE_LEN: usize = 12;

/// Tag length shared by every TLS 1.3 AEAD.
pub const TAG_LEN: usize = 16;

/// AEAD algorithm named by a cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeadAlgorithm {
    Aes128Gcm,
    Aes256Gcm,
    ChaCha20Poly1305,
}

impl AeadAlgorithm {
    pub const fn key_len(self) -> usize {
        match self {
            AeadAlgorithm::Aes128Gcm => 16,
            AeadAlgorithm::Aes256Gcm | AeadAlgorithm::ChaCha20Poly1305 => 32,
        }
    }

    pub const fn tag_len(self) -> usize {
        TAG_LEN
    }
}

/// A keyed AEAD instance.
pub enum AeadKey {
    AesGcm(AesGcm),
    ChaCha20Poly1305(ChaCha20Poly1305),
}

impl AeadKey {
    pub fn new(alg: AeadAlgorithm, key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != alg.key_len() {
            return Err(CryptoError::InvalidLength);
        }
        Ok(match alg {
            AeadAlgorithm::Aes128Gcm | AeadAlgorithm::Aes256Gcm => AeadKey::AesGcm(AesGcm::new(key)?),
            AeadAlgorithm::ChaCha20Poly1305 => {
                AeadKey::ChaCha20Poly1305(ChaCha20Poly1305::new(key)?)
            }
        })
    }

    /// Returns `ciphertext || tag`.
    pub fn seal(&self, nonce: &[u8; NONCE_LEN], aad: &[u8], plaintext: &[u8]) -> Vec<u8> {
        match self {
            AeadKey::AesGcm(k) => k.seal(nonce, aad, plaintext),
            AeadKey::ChaCha20Poly1305(k) => k.seal(nonce, aad, plaintext),
        }
    }

    /// Verifies the trailing tag, then decrypts.
    pub fn open(
        &self,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        sealed: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        match self {
            AeadKey::AesGcm(k) => k.open(nonce, aad, sealed),
            AeadKey::ChaCha20Poly1305(k) => k.open(nonce, aad, sealed),
        }
    }
}
