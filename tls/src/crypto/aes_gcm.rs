//! AES-GCM Authenticated Encryption: NIST SP 800-38D
//!
//! Provides AES-128-GCM and AES-256-GCM with 12-byte nonce, 16-byte tag.

use alloc::vec::Vec;

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use super::aes::Aes;
use super::CryptoError;

/// GCM authentication tag length.
pub const TAG_LEN: usize = 16;

// ── GF(2^128) multiplication for GHASH ──────────────────────

/// Multiply two GF(2^128) elements (GCM bit order, big-endian blocks as
/// `u128`). Uses R = x^128 + x^7 + x^2 + x + 1. Every iteration does the
/// same work regardless of the bits of `x` or `y`.
fn gf128_mul(x: u128, y: u128) -> u128 {
    let mut z = 0u128;
    let mut v = x;
    for i in 0..128 {
        let bit = (y >> (127 - i)) & 1;
        z ^= v & bit.wrapping_neg();
        let lsb = v & 1;
        v = (v >> 1) ^ ((0xe1u128 << 120) & lsb.wrapping_neg());
    }
    z
}

// ── GHASH ───────────────────────────────────────────────────

fn ghash_update(y: &mut u128, h: u128, data: &[u8]) {
    for chunk in data.chunks(16) {
        let mut block = [0u8; 16];
        block[..chunk.len()].copy_from_slice(chunk);
        *y = gf128_mul(*y ^ u128::from_be_bytes(block), h);
    }
}

/// GHASH(H, A, C) over AAD and ciphertext, including the length block.
fn ghash(h: u128, aad: &[u8], ciphertext: &[u8]) -> u128 {
    let mut y = 0u128;
    ghash_update(&mut y, h, aad);
    ghash_update(&mut y, h, ciphertext);
    let lens = ((aad.len() as u128 * 8) << 64) | (ciphertext.len() as u128 * 8);
    gf128_mul(y ^ lens, h)
}

// ── AES-CTR ─────────────────────────────────────────────────

/// Increment the last 4 bytes of `ctr` as a big-endian 32-bit counter.
fn inc32(ctr: &mut [u8; 16]) {
    let c = u32::from_be_bytes([ctr[12], ctr[13], ctr[14], ctr[15]]);
    ctr[12..16].copy_from_slice(&c.wrapping_add(1).to_be_bytes());
}

// ── AES-GCM ─────────────────────────────────────────────────

/// AES-GCM key: expanded cipher plus hash subkey H = AES_K(0^128).
pub struct AesGcm {
    aes: Aes,
    h: u128,
}

impl Drop for AesGcm {
    fn drop(&mut self) {
        self.h.zeroize();
    }
}

impl AesGcm {
    /// `key` must be 16 (AES-128) or 32 (AES-256) bytes.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let aes = Aes::new(key)?;
        let mut h_block = [0u8; 16];
        aes.encrypt_block(&mut h_block);
        Ok(Self { aes, h: u128::from_be_bytes(h_block) })
    }

    fn j0(nonce: &[u8; 12]) -> [u8; 16] {
        let mut j0 = [0u8; 16];
        j0[..12].copy_from_slice(nonce);
        j0[15] = 1;
        j0
    }

    fn ctr_xor(&self, j0: &[u8; 16], data: &mut [u8]) {
        let mut ctr = *j0;
        for chunk in data.chunks_mut(16) {
            inc32(&mut ctr);
            let mut block = ctr;
            self.aes.encrypt_block(&mut block);
            for (d, k) in chunk.iter_mut().zip(block.iter()) {
                *d ^= k;
            }
        }
    }

    fn tag(&self, j0: &[u8; 16], aad: &[u8], ciphertext: &[u8]) -> [u8; TAG_LEN] {
        let s = ghash(self.h, aad, ciphertext);
        let mut mask = *j0;
        self.aes.encrypt_block(&mut mask);
        (s ^ u128::from_be_bytes(mask)).to_be_bytes()
    }

    /// Encrypt and authenticate. Returns `ciphertext || tag`.
    pub fn seal(&self, nonce: &[u8; 12], aad: &[u8], plaintext: &[u8]) -> Vec<u8> {
        let j0 = Self::j0(nonce);
        let mut out = Vec::with_capacity(plaintext.len() + TAG_LEN);
        out.extend_from_slice(plaintext);
        self.ctr_xor(&j0, &mut out);
        let tag = self.tag(&j0, aad, &out);
        out.extend_from_slice(&tag);
        out
    }

    /// Verify and decrypt `ciphertext || tag`. The tag is checked before any
    /// plaintext is produced.
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
        let j0 = Self::j0(nonce);
        let expected = self.tag(&j0, aad, ciphertext);
        if !bool::from(expected.ct_eq(tag)) {
            return Err(CryptoError::AuthenticationFailed);
        }
        let mut plaintext = ciphertext.to_vec();
        self.ctr_xor(&j0, &mut plaintext);
        Ok(plaintext)
    }
}
