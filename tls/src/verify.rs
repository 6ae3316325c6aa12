//! Signature verification collaborator.
//!
//! The handshake never calls a signature primitive directly; it hands the
//! leaf key, the scheme and the exact signed bytes to a `SignatureVerifier`
//! and treats the answer as a yes/no.

use alloc::vec::Vec;

use crate::crypto::ecdsa::p256_ecdsa_verify;
use crate::crypto::ed25519::{ed25519_verify, PUBLIC_KEY_LEN as ED25519_KEY_LEN};
use crate::crypto::p256::PUBLIC_KEY_LEN as P256_KEY_LEN;
use crate::crypto::rsa::RsaPublicKey;
use crate::crypto::HashAlgorithm;
use crate::suites::SignatureScheme;

/// A subject public key extracted from a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    /// Uncompressed SEC1 point on P-256.
    EcdsaP256(Vec<u8>),
    /// Big-endian modulus and public exponent.
    Rsa { modulus: Vec<u8>, exponent: Vec<u8> },
    Ed25519([u8; ED25519_KEY_LEN]),
}

impl PublicKey {
    pub fn algorithm_name(&self) -> &'static str {
        match self {
            PublicKey::EcdsaP256(_) => "ECDSA P-256",
            PublicKey::Rsa { .. } => "RSA",
            PublicKey::Ed25519(_) => "Ed25519",
        }
    }

    /// Whether a signature under `scheme` can come from this key type.
    pub fn is_compatible(&self, scheme: SignatureScheme) -> bool {
        use SignatureScheme::*;
        matches!(
            (self, scheme),
            (PublicKey::EcdsaP256(_), EcdsaSecp256r1Sha256)
                | (PublicKey::Ed25519(_), Ed25519)
                | (
                    PublicKey::Rsa { .. },
                    RsaPkcs1Sha256
                        | RsaPkcs1Sha384
                        | RsaPkcs1Sha512
                        | RsaPssRsaeSha256
                        | RsaPssRsaeSha384
                        | RsaPssRsaeSha512
                )
        )
    }
}

/// Verifies one signature. Implementations must be side-effect free.
pub trait SignatureVerifier: Send + Sync {
    /// `true` only if `signature` is a valid `scheme` signature over
    /// `message` by `public_key`.
    fn verify(
        &self,
        public_key: &PublicKey,
        scheme: SignatureScheme,
        message: &[u8],
        signature: &[u8],
    ) -> bool;
}

/// Verifier backed by the crate's own primitives.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSignatureVerifier;

impl DefaultSignatureVerifier {
    /// Schemes this verifier can check, in the order they are offered.
    pub fn supported_schemes() -> &'static [SignatureScheme] {
        &SignatureScheme::ALL
    }
}

impl SignatureVerifier for DefaultSignatureVerifier {
    fn verify(
        &self,
        public_key: &PublicKey,
        scheme: SignatureScheme,
        message: &[u8],
        signature: &[u8],
    ) -> bool {
        match (public_key, scheme) {
            (PublicKey::EcdsaP256(point), SignatureScheme::EcdsaSecp256r1Sha256) => {
                point.len() == P256_KEY_LEN
                    && p256_ecdsa_verify(point, &HashAlgorithm::Sha256.hash(message), signature)
            }
            (PublicKey::Ed25519(key), SignatureScheme::Ed25519) => {
                ed25519_verify(key, message, signature)
            }
            (PublicKey::Rsa { modulus, exponent }, scheme) => {
                let Ok(key) = RsaPublicKey::new(modulus, exponent) else {
                    log::warn!("[KPIO TLS] unusable RSA public key");
                    return false;
                };
                match scheme {
                    SignatureScheme::RsaPkcs1Sha256 => {
                        key.verify_pkcs1(HashAlgorithm::Sha256, message, signature)
                    }
                    SignatureScheme::RsaPkcs1Sha384 => {
                        key.verify_pkcs1(HashAlgorithm::Sha384, message, signature)
                    }
                    SignatureScheme::RsaPkcs1Sha512 => {
                        key.verify_pkcs1(HashAlgorithm::Sha512, message, signature)
                    }
                    SignatureScheme::RsaPssRsaeSha256 => {
                        key.verify_pss(HashAlgorithm::Sha256, message, signature)
                    }
                    SignatureScheme::RsaPssRsaeSha384 => {
                        key.verify_pss(HashAlgorithm::Sha384, message, signature)
                    }
                    SignatureScheme::RsaPssRsaeSha512 => {
                        key.verify_pss(HashAlgorithm::Sha512, message, signature)
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }
}
