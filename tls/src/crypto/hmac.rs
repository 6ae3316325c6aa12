//! HMAC (Hash-based Message Authentication Code): RFC 2104

use alloc::vec::Vec;

use zeroize::Zeroize;

use super::sha::HashAlgorithm;

/// HMAC over `alg` → `alg.output_len()`-byte MAC.
pub fn hmac(alg: HashAlgorithm, key: &[u8], data: &[u8]) -> Vec<u8> {
    hmac_parts(alg, key, &[data])
}

/// HMAC over the concatenation of `parts`, without joining them first.
pub fn hmac_parts(alg: HashAlgorithm, key: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let block = alg.block_len();
    let mut k = [0u8; 128];
    if key.len() > block {
        let h = alg.hash(key);
        k[..h.len()].copy_from_slice(&h);
    } else {
        k[..key.len()].copy_from_slice(key);
    }

    let mut ipad = [0x36u8; 128];
    let mut opad = [0x5cu8; 128];
    for i in 0..block {
        ipad[i] ^= k[i];
        opad[i] ^= k[i];
    }

    let mut inner = alg.new_context();
    inner.update(&ipad[..block]);
    for part in parts {
        inner.update(part);
    }
    let inner_hash = inner.finish();

    let mut outer = alg.new_context();
    outer.update(&opad[..block]);
    outer.update(&inner_hash);

    k.zeroize();
    ipad.zeroize();
    opad.zeroize();
    outer.finish()
}

/// HMAC-SHA-256 → 32-byte MAC.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&hmac(HashAlgorithm::Sha256, key, data));
    out
}

/// HMAC-SHA-384 → 48-byte MAC.
pub fn hmac_sha384(key: &[u8], data: &[u8]) -> [u8; 48] {
    let mut out = [0u8; 48];
    out.copy_from_slice(&hmac(HashAlgorithm::Sha384, key, data));
    out
}
