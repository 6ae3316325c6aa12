//! Ephemeral ECDHE key shares (RFC 8446 §4.2.8).

use alloc::vec::Vec;

use zeroize::Zeroizing;

use crate::crypto::p256::{p256_ecdh, p256_public_key, PUBLIC_KEY_LEN};
use crate::crypto::{x25519, x25519_base, CryptoError, SecureRandom};
use crate::error::TlsError;
use crate::suites::NamedGroup;

/// A client key pair for one group. The private half never leaves this
/// type and is wiped on drop.
pub enum KeyShare {
    X25519 {
        private: Zeroizing<[u8; 32]>,
        public: [u8; 32],
    },
    Secp256r1 {
        private: Zeroizing<[u8; 32]>,
        public: [u8; PUBLIC_KEY_LEN],
    },
}

impl core::fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyShare").field("group", &self.group()).finish()
    }
}

impl KeyShare {
    pub fn generate(group: NamedGroup, rng: &dyn SecureRandom) -> Result<Self, TlsError> {
        let mut private = Zeroizing::new([0u8; 32]);
        match group {
            NamedGroup::X25519 => {
                rng.fill(private.as_mut())?;
                let public = x25519_base(&private);
                Ok(KeyShare::X25519 { private, public })
            }
            NamedGroup::Secp256r1 => {
                // rejection sampling into [1, n-1]; a miss has probability ~2^-32
                for _ in 0..8 {
                    rng.fill(private.as_mut())?;
                    match p256_public_key(&private) {
                        Ok(public) => return Ok(KeyShare::Secp256r1 { private, public }),
                        Err(CryptoError::InvalidLength) => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(CryptoError::EntropyUnavailable.into())
            }
        }
    }

    pub fn group(&self) -> NamedGroup {
        match self {
            KeyShare::X25519 { .. } => NamedGroup::X25519,
            KeyShare::Secp256r1 { .. } => NamedGroup::Secp256r1,
        }
    }

    /// The `key_exchange` bytes sent in the ClientHello.
    pub fn public_key(&self) -> &[u8] {
        match self {
            KeyShare::X25519 { public, .. } => public,
            KeyShare::Secp256r1 { public, .. } => public,
        }
    }

    /// ECDHE with the server's share. The peer key is validated; an
    /// all-zero X25519 output or a P-256 result at infinity is fatal.
    pub fn agree(&self, peer: &[u8]) -> Result<Zeroizing<Vec<u8>>, TlsError> {
        match self {
            KeyShare::X25519 { private, .. } => {
                let peer: &[u8; 32] = peer
                    .try_into()
                    .map_err(|_| TlsError::illegal("x25519 key share must be 32 bytes"))?;
                Ok(Zeroizing::new(x25519(private, peer)?.to_vec()))
            }
            KeyShare::Secp256r1 { private, .. } => {
                if peer.len() != PUBLIC_KEY_LEN || peer[0] != 0x04 {
                    return Err(TlsError::illegal("secp256r1 key share must be an uncompressed point"));
                }
                Ok(Zeroizing::new(p256_ecdh(private, peer)?.to_vec()))
            }
        }
    }
}
