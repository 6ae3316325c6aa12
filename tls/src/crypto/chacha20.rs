//! ChaCha20-Poly1305 AEAD: RFC 8439
//!
//! ChaCha20 stream cipher + Poly1305 MAC in an AEAD construction.

use alloc::vec::Vec;

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use super::poly1305::{Poly1305, TAG_LEN};
use super::CryptoError;

// ── ChaCha20 ────────────────────────────────────────────────

/// "expand 32-byte k"
pub(crate) const SIGMA: [u32; 4] = [0x61707865, 0x3320646e, 0x79622d32, 0x6b206574];

#[inline(always)]
fn qr(s: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
    s[a] = s[a].wrapping_add(s[b]); s[d] ^= s[a]; s[d] = s[d].rotate_left(16);
    s[c] = s[c].wrapping_add(s[d]); s[b] ^= s[c]; s[b] = s[b].rotate_left(12);
    s[a] = s[a].wrapping_add(s[b]); s[d] ^= s[a]; s[d] = s[d].rotate_left(8);
    s[c] = s[c].wrapping_add(s[d]); s[b] ^= s[c]; s[b] = s[b].rotate_left(7);
}

/// The 20-round permutation plus feed-forward, serialized little-endian.
pub(crate) fn chacha20_core(state: &[u32; 16]) -> [u8; 64] {
    let mut working = *state;
    for _ in 0..10 {
        // Column rounds
        qr(&mut working, 0, 4,  8, 12);
        qr(&mut working, 1, 5,  9, 13);
        qr(&mut working, 2, 6, 10, 14);
        qr(&mut working, 3, 7, 11, 15);
        // Diagonal rounds
        qr(&mut working, 0, 5, 10, 15);
        qr(&mut working, 1, 6, 11, 12);
        qr(&mut working, 2, 7,  8, 13);
        qr(&mut working, 3, 4,  9, 14);
    }
    let mut out = [0u8; 64];
    for i in 0..16 {
        let word = working[i].wrapping_add(state[i]);
        out[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
    }
    working.zeroize();
    out
}

/// ChaCha20 block function: produces 64 bytes of keystream.
pub fn chacha20_block(key: &[u8; 32], counter: u32, nonce: &[u8; 12]) -> [u8; 64] {
    let mut state = [0u32; 16];
    state[..4].copy_from_slice(&SIGMA);
    for (i, word) in key.chunks_exact(4).enumerate() {
        state[4 + i] = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
    }
    state[12] = counter;
    for (i, word) in nonce.chunks_exact(4).enumerate() {
        state[13 + i] = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
    }
    let out = chacha20_core(&state);
    state.zeroize();
    out
}

/// ChaCha20 encrypt/decrypt in place (symmetric).
pub fn chacha20_xor(key: &[u8; 32], counter: u32, nonce: &[u8; 12], data: &mut [u8]) {
    let mut ctr = counter;
    for chunk in data.chunks_mut(64) {
        let mut block = chacha20_block(key, ctr, nonce);
        for (d, k) in chunk.iter_mut().zip(block.iter()) {
            *d ^= k;
        }
        block.zeroize();
        ctr = ctr.wrapping_add(1);
    }
}

// ── AEAD ────────────────────────────────────────────────────

/// ChaCha20-Poly1305 key.
pub struct ChaCha20Poly1305 {
    key: [u8; 32],
}

impl Drop for ChaCha20Poly1305 {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl ChaCha20Poly1305 {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; 32] = key.try_into().map_err(|_| CryptoError::InvalidLength)?;
        Ok(Self { key })
    }

    /// Poly1305 over `aad || pad16 || ciphertext || pad16 || len(aad) || len(ct)`,
    /// keyed by the first 32 bytes of keystream block 0.
    fn tag(&self, nonce: &[u8; 12], aad: &[u8], ciphertext: &[u8]) -> [u8; TAG_LEN] {
        let block0 = chacha20_block(&self.key, 0, nonce);
        let mut otk = [0u8; 32];
        otk.copy_from_slice(&block0[..32]);
        let mut mac = Poly1305::new(&otk);
        otk.zeroize();

        mac.update(aad);
        mac.pad_to_block();
        mac.update(ciphertext);
        mac.pad_to_block();
        mac.update(&(aad.len() as u64).to_le_bytes());
        mac.update(&(ciphertext.len() as u64).to_le_bytes());
        mac.finalize()
    }

    /// Encrypt and authenticate. Returns `ciphertext || tag`.
    pub fn seal(&self, nonce: &[u8; 12], aad: &[u8], plaintext: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(plaintext.len() + TAG_LEN);
        out.extend_from_slice(plaintext);
        chacha20_xor(&self.key, 1, nonce, &mut out);
        let tag = self.tag(nonce, aad, &out);
        out.extend_from_slice(&tag);
        out
    }

    /// Verify and decrypt `ciphertext || tag`.
    pub fn open(
        &self,
        nonce: &[u8; 12],
        aad: &[u8],
        sealed: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < TAG_LEN {
            return Err(CryptoError::AuthenticationFailed);
        }
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        let expected = self.tag(nonce, aad, ciphertext);
        if !bool::from(expected.ct_eq(tag)) {
            return Err(CryptoError::AuthenticationFailed);
        }
        let mut plaintext = ciphertext.to_vec();
        chacha20_xor(&self.key, 1, nonce, &mut plaintext);
        Ok(plaintext)
    }
}
