//! RSA signature verification: PKCS#1 v1.5 and PSS (RFC 8017)
//!
//! Only the public-key operation is implemented; the client never signs.
//! The modular exponentiation runs on the shared Montgomery `Modulus`.

use alloc::vec;
use alloc::vec::Vec;

use subtle::ConstantTimeEq;

use super::modular::{ModularArithmetic, Modulus};
use super::sha::HashAlgorithm;
use super::CryptoError;

/// Smallest modulus accepted for signature verification.
pub const MIN_MODULUS_BITS: usize = 1024;

/// Largest modulus accepted; bounds the cost of a hostile certificate.
pub const MAX_MODULUS_BITS: usize = 8192;

/// An RSA public key.
#[derive(Clone, Debug)]
pub struct RsaPublicKey {
    modulus: Modulus,
    exponent: Vec<u8>,
}

impl RsaPublicKey {
    /// Build from big-endian modulus and exponent.
    pub fn new(modulus: &[u8], exponent: &[u8]) -> Result<Self, CryptoError> {
        let modulus = Modulus::new(modulus)?;
        let bits = modulus.bit_len();
        if !(MIN_MODULUS_BITS..=MAX_MODULUS_BITS).contains(&bits) {
            return Err(CryptoError::InvalidLength);
        }
        let start = exponent.iter().position(|&b| b != 0).unwrap_or(exponent.len());
        let exponent = &exponent[start..];
        // e must be odd and greater than 1
        if exponent.is_empty() || exponent.len() > 8 || exponent[exponent.len() - 1] & 1 == 0 {
            return Err(CryptoError::InvalidLength);
        }
        if exponent == [1] {
            return Err(CryptoError::InvalidLength);
        }
        Ok(Self {
            modulus,
            exponent: exponent.to_vec(),
        })
    }

    pub fn modulus_bits(&self) -> usize {
        self.modulus.bit_len()
    }

    /// RSAVP1: `s^e mod n` as a `k`-byte string, `None` if `s` is out of range.
    fn public_op(&self, signature: &[u8]) -> Option<Vec<u8>> {
        if signature.len() != self.modulus.byte_len() {
            return None;
        }
        let s = self.modulus.element(signature)?;
        let m = self.modulus.pow_mod(&s, &self.exponent);
        Some(self.modulus.to_bytes(&m))
    }

    /// RSASSA-PKCS1-v1_5 verification of `message`.
    pub fn verify_pkcs1(&self, hash: HashAlgorithm, message: &[u8], signature: &[u8]) -> bool {
        let Some(em) = self.public_op(signature) else {
            return false;
        };
        let expected = pkcs1_encode(hash, &hash.hash(message), em.len());
        match expected {
            Some(expected) => bool::from(em.ct_eq(&expected)),
            None => false,
        }
    }

    /// RSASSA-PSS verification with MGF1 over the same hash and a salt as
    /// long as the digest.
    pub fn verify_pss(&self, hash: HashAlgorithm, message: &[u8], signature: &[u8]) -> bool {
        let Some(decrypted) = self.public_op(signature) else {
            return false;
        };
        let em_bits = self.modulus.bit_len() - 1;
        let em_len = (em_bits + 7) / 8;
        // when em_bits is a multiple of 8 the first byte is padding
        let (lead, em) = decrypted.split_at(decrypted.len() - em_len);
        if lead.iter().any(|&b| b != 0) {
            return false;
        }
        pss_verify(hash, &hash.hash(message), em, em_bits)
    }
}

/// DER `DigestInfo` prefix for each hash.
fn digest_info_prefix(hash: HashAlgorithm) -> &'static [u8] {
    match hash {
        HashAlgorithm::Sha256 => &[
            0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
            0x01, 0x05, 0x00, 0x04, 0x20,
        ],
        HashAlgorithm::Sha384 => &[
            0x30, 0x41, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
            0x02, 0x05, 0x00, 0x04, 0x30,
        ],
        HashAlgorithm::Sha512 => &[
            0x30, 0x51, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
            0x03, 0x05, 0x00, 0x04, 0x40,
        ],
    }
}

/// EMSA-PKCS1-v1_5: `00 01 FF..FF 00 DigestInfo`, at least 8 bytes of FF.
fn pkcs1_encode(hash: HashAlgorithm, digest: &[u8], em_len: usize) -> Option<Vec<u8>> {
    let prefix = digest_info_prefix(hash);
    let t_len = prefix.len() + digest.len();
    if em_len < t_len + 11 {
        return None;
    }
    let mut em = vec![0xffu8; em_len];
    em[0] = 0x00;
    em[1] = 0x01;
    em[em_len - t_len - 1] = 0x00;
    em[em_len - t_len..em_len - digest.len()].copy_from_slice(prefix);
    em[em_len - digest.len()..].copy_from_slice(digest);
    Some(em)
}

/// MGF1 mask of `len` bytes.
fn mgf1(hash: HashAlgorithm, seed: &[u8], len: usize) -> Vec<u8> {
    let mut mask = Vec::with_capacity(len + hash.output_len());
    let mut counter: u32 = 0;
    while mask.len() < len {
        let mut ctx = hash.new_context();
        ctx.update(seed);
        ctx.update(&counter.to_be_bytes());
        mask.extend_from_slice(&ctx.finish());
        counter += 1;
    }
    mask.truncate(len);
    mask
}

/// EMSA-PSS-VERIFY (RFC 8017 §9.1.2) with `sLen = hLen`.
fn pss_verify(hash: HashAlgorithm, m_hash: &[u8], em: &[u8], em_bits: usize) -> bool {
    let h_len = hash.output_len();
    let s_len = h_len;
    let em_len = em.len();
    if em_len < h_len + s_len + 2 || em[em_len - 1] != 0xbc {
        return false;
    }
    let db_len = em_len - h_len - 1;
    let (masked_db, rest) = em.split_at(db_len);
    let h = &rest[..h_len];

    let unused_bits = 8 * em_len - em_bits;
    let top_mask = (0xffu16 >> unused_bits) as u8;
    if masked_db[0] & !top_mask != 0 {
        return false;
    }

    let mut db = mgf1(hash, h, db_len);
    for (d, m) in db.iter_mut().zip(masked_db.iter()) {
        *d ^= m;
    }
    db[0] &= top_mask;

    let ps_len = em_len - h_len - s_len - 2;
    if db[..ps_len].iter().any(|&b| b != 0) || db[ps_len] != 0x01 {
        return false;
    }
    let salt = &db[db_len - s_len..];

    let mut ctx = hash.new_context();
    ctx.update(&[0u8; 8]);
    ctx.update(m_hash);
    ctx.update(salt);
    bool::from(ctx.finish().ct_eq(h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const N: [u8; 128] = hex!(
        "bbfd0cb5c029c65e62f3d3b79c219127155b39e9c15994788727c7e5bb24e76a"
        "3240cce17a7ca04b12b323cc15ff1e246b77a63d1b683877e51e5589704a092b"
        "9d9e57e0c8ab65d9215bc0faeb65a9013a5478c36b8c2a462b506c7a4cb98858"
        "f5d4ac23d5a1539425c64cb97e6848b4d61ac314228b22ba9b9d65b8f31820e7"
    );
    const E: [u8; 3] = [0x01, 0x00, 0x01];
    const MESSAGE: &[u8] = b"kpio tls";

    const PKCS1_SHA256: [u8; 128] = hex!(
        "b4e7d6e202694eef2c7ccbd9657be2a341441e4a25559df1ca7ba26da3adc3e9"
        "62203b9e44c29cf4c7cf1286f84bc5b6b03c060d79a1f43f591bd698ddc77823"
        "4d3033ba49a90e870247513262e1a0fa8a2e002659e01eb9967c1c7c52557579"
        "c4257e23814d791ccf181751eb70367fb293b8f132f5970bc5506d9beee1dd98"
    );
    const PSS_SHA256: [u8; 128] = hex!(
        "7a4b464bc315313ec25a5ba84c31ee4e182c4246ab3a3cc37db931adc65ff8a6"
        "a42c190484bd1df88ca427e34926e9caba45723fd2fd4ebf21abb033a4f6db28"
        "99ef59f5006b6afe0f8bddebaac29eda3e1eeace52b78d46f52a19876d12b84d"
        "b95e8562cf45e1cfa95218f1166083b0ff458bad202c6427bdefe2f11b9e9e0c"
    );
    const PSS_SHA384: [u8; 128] = hex!(
        "5aff0f59e3200ae8f2cbb5eb0d28c587c3253deaaf61b8def4d8616d1ad20da0"
        "c5988c27f6b644d6c316229c862ff358a84aa579b225ae57acb80e722665a36c"
        "ac20f3edaa1f004b4285890e06a26b64e136d37fb61d1b5fbb5166acad5cb4d7"
        "47e5c706fe199327529dcfdef64dc28c4b80f0e78b56c51e0bcb666466bf656f"
    );

    fn key() -> RsaPublicKey {
        RsaPublicKey::new(&N, &E).unwrap()
    }

    #[test]
    fn test_pkcs1_v15() {
        assert!(key().verify_pkcs1(HashAlgorithm::Sha256, MESSAGE, &PKCS1_SHA256));
        assert!(!key().verify_pkcs1(HashAlgorithm::Sha384, MESSAGE, &PKCS1_SHA256));
        assert!(!key().verify_pkcs1(HashAlgorithm::Sha256, b"kpio tlS", &PKCS1_SHA256));
    }

    #[test]
    fn test_pss() {
        assert!(key().verify_pss(HashAlgorithm::Sha256, MESSAGE, &PSS_SHA256));
        assert!(key().verify_pss(HashAlgorithm::Sha384, MESSAGE, &PSS_SHA384));
        assert!(!key().verify_pss(HashAlgorithm::Sha256, MESSAGE, &PSS_SHA384));
        assert!(!key().verify_pss(HashAlgorithm::Sha256, MESSAGE, &PKCS1_SHA256));
    }

    #[test]
    fn test_signature_range_checks() {
        assert!(!key().verify_pkcs1(HashAlgorithm::Sha256, MESSAGE, &PKCS1_SHA256[1..]));
        assert!(!key().verify_pss(HashAlgorithm::Sha256, MESSAGE, &N));
    }

    #[test]
    fn test_key_limits() {
        assert!(RsaPublicKey::new(&N[..64], &E).is_err());
        assert!(RsaPublicKey::new(&N, &[0x02]).is_err());
        assert!(RsaPublicKey::new(&N, &[0x01]).is_err());
        assert_eq!(key().modulus_bits(), 1024);
    }
}
