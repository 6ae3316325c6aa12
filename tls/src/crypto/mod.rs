//! Cryptographic primitives for the TLS client.
//!
//! All implementations are pure Rust and `no_std` compatible. Nothing in
//! here holds global state: randomness comes from a generator owned by the
//! caller's configuration.
//!
//! Primitives provided:
//!   - **Hash**:   SHA-256, SHA-384, SHA-512
//!   - **MAC**:    HMAC over any of the above
//!   - **KDF**:    HKDF-Extract, HKDF-Expand, HKDF-Expand-Label (TLS 1.3)
//!   - **AEAD**:   AES-128-GCM, AES-256-GCM, ChaCha20-Poly1305
//!   - **Bignum**: Montgomery modular arithmetic (`ModularArithmetic`)
//!   - **KE**:     X25519 ECDH, P-256 ECDH
//!   - **Sig**:    ECDSA (P-256), RSA PKCS#1 v1.5 / PSS, Ed25519 verification
//!   - **PRNG**:   ChaCha20-based CSPRNG seeded by the caller or RDRAND

use thiserror::Error;

pub mod aead;
pub mod aes;
pub mod aes_gcm;
pub mod chacha20;
pub mod ecdsa;
pub mod ed25519;
pub mod hkdf;
pub mod hmac;
pub mod modular;
pub mod p256;
pub mod poly1305;
pub mod random;
pub mod rsa;
pub mod sha;
pub mod x25519;

// Convenience re-exports
pub use aead::{AeadAlgorithm, AeadKey};
pub use hkdf::{derive_secret, hkdf_expand, hkdf_expand_label, hkdf_extract};
pub use hmac::hmac;
pub use modular::{ModularArithmetic, Modulus};
pub use random::{ChaChaRng, SecureRandom};
pub use sha::{sha256, sha384, sha512, HashAlgorithm, HashContext};
pub use x25519::{x25519, x25519_base};

/// Failure of a primitive operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// AEAD tag or MAC did not verify.
    #[error("authentication tag mismatch")]
    AuthenticationFailed,
    /// Input or requested output has an unusable length.
    #[error("invalid length")]
    InvalidLength,
    /// Peer public key is not a valid curve point.
    #[error("public key is not a valid curve point")]
    InvalidPoint,
    /// Key agreement produced the identity / all-zero output.
    #[error("key agreement produced a low-order result")]
    LowOrderPoint,
    /// No entropy source is available to seed the generator.
    #[error("no hardware entropy source")]
    EntropyUnavailable,
}
