//! Negotiable algorithm identifiers: cipher suites, named groups and
//! signature schemes, with their wire codes.

use crate::crypto::{AeadAlgorithm, HashAlgorithm};

/// TLS 1.3 cipher suites (RFC 8446 §B.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherSuite {
    Aes128GcmSha256,
    Aes256GcmSha384,
    ChaCha20Poly1305Sha256,
}

impl CipherSuite {
    pub const ALL: [CipherSuite; 3] = [
        CipherSuite::Aes128GcmSha256,
        CipherSuite::Aes256GcmSha384,
        CipherSuite::ChaCha20Poly1305Sha256,
    ];

    pub const fn to_u16(self) -> u16 {
        match self {
            CipherSuite::Aes128GcmSha256 => 0x1301,
            CipherSuite::Aes256GcmSha384 => 0x1302,
            CipherSuite::ChaCha20Poly1305Sha256 => 0x1303,
        }
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.to_u16() == v)
    }

    pub fn name(self) -> &'static str {
        match self {
            CipherSuite::Aes128GcmSha256 => "TLS_AES_128_GCM_SHA256",
            CipherSuite::Aes256GcmSha384 => "TLS_AES_256_GCM_SHA384",
            CipherSuite::ChaCha20Poly1305Sha256 => "TLS_CHACHA20_POLY1305_SHA256",
        }
    }

    /// Fixed parameters of this suite.
    pub const fn params(self) -> CipherSuiteParams {
        match self {
            CipherSuite::Aes128GcmSha256 => CipherSuiteParams {
                suite: self,
                hash: HashAlgorithm::Sha256,
                aead: AeadAlgorithm::Aes128Gcm,
            },
            CipherSuite::Aes256GcmSha384 => CipherSuiteParams {
                suite: self,
                hash: HashAlgorithm::Sha384,
                aead: AeadAlgorithm::Aes256Gcm,
            },
            CipherSuite::ChaCha20Poly1305Sha256 => CipherSuiteParams {
                suite: self,
                hash: HashAlgorithm::Sha256,
                aead: AeadAlgorithm::ChaCha20Poly1305,
            },
        }
    }
}

/// Immutable lookup value selected once at ServerHello.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherSuiteParams {
    pub suite: CipherSuite,
    pub hash: HashAlgorithm,
    pub aead: AeadAlgorithm,
}

impl CipherSuiteParams {
    pub const fn hash_len(&self) -> usize {
        self.hash.output_len()
    }

    pub const fn key_len(&self) -> usize {
        self.aead.key_len()
    }

    pub const fn iv_len(&self) -> usize {
        crate::crypto::aead::NONCE_LEN
    }
}

/// Key exchange groups (RFC 8446 §4.2.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedGroup {
    X25519,
    Secp256r1,
}

impl NamedGroup {
    pub const fn to_u16(self) -> u16 {
        match self {
            NamedGroup::X25519 => 0x001d,
            NamedGroup::Secp256r1 => 0x0017,
        }
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x001d => Some(NamedGroup::X25519),
            0x0017 => Some(NamedGroup::Secp256r1),
            _ => None,
        }
    }
}

/// Signature schemes (RFC 8446 §4.2.3) the client knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureScheme {
    RsaPkcs1Sha256,
    RsaPkcs1Sha384,
    RsaPkcs1Sha512,
    EcdsaSecp256r1Sha256,
    RsaPssRsaeSha256,
    RsaPssRsaeSha384,
    RsaPssRsaeSha512,
    Ed25519,
}

impl SignatureScheme {
    pub const ALL: [SignatureScheme; 8] = [
        SignatureScheme::EcdsaSecp256r1Sha256,
        SignatureScheme::Ed25519,
        SignatureScheme::RsaPssRsaeSha256,
        SignatureScheme::RsaPssRsaeSha384,
        SignatureScheme::RsaPssRsaeSha512,
        SignatureScheme::RsaPkcs1Sha256,
        SignatureScheme::RsaPkcs1Sha384,
        SignatureScheme::RsaPkcs1Sha512,
    ];

    pub const fn to_u16(self) -> u16 {
        match self {
            SignatureScheme::RsaPkcs1Sha256 => 0x0401,
            SignatureScheme::RsaPkcs1Sha384 => 0x0501,
            SignatureScheme::RsaPkcs1Sha512 => 0x0601,
            SignatureScheme::EcdsaSecp256r1Sha256 => 0x0403,
            SignatureScheme::RsaPssRsaeSha256 => 0x0804,
            SignatureScheme::RsaPssRsaeSha384 => 0x0805,
            SignatureScheme::RsaPssRsaeSha512 => 0x0806,
            SignatureScheme::Ed25519 => 0x0807,
        }
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.to_u16() == v)
    }

    /// PKCS#1 v1.5 schemes may sign certificates but never a TLS 1.3
    /// CertificateVerify (RFC 8446 §4.2.3).
    pub const fn allowed_in_certificate_verify(self) -> bool {
        !matches!(
            self,
            SignatureScheme::RsaPkcs1Sha256
                | SignatureScheme::RsaPkcs1Sha384
                | SignatureScheme::RsaPkcs1Sha512
        )
    }
}
