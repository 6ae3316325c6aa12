//! ECDSA signature verification on P-256 (FIPS 186-4 §6.4).

use subtle::ConstantTimeEq;

use super::modular::ModularArithmetic;
use super::p256::Curve;
use crate::der::DerReader;

/// Verify a DER-encoded `ECDSA-Sig-Value` over `digest`.
///
/// * `public_key`: 65-byte uncompressed point (0x04 || X || Y)
/// * `digest`: message hash; only the leftmost 256 bits are used
/// * `signature`: `SEQUENCE { r INTEGER, s INTEGER }`
pub fn p256_ecdsa_verify(public_key: &[u8], digest: &[u8], signature: &[u8]) -> bool {
    let Ok(curve) = Curve::new() else {
        return false;
    };
    let Ok(q) = curve.decode_point(public_key) else {
        return false;
    };
    let Some((r_bytes, s_bytes)) = parse_signature(signature) else {
        return false;
    };

    let n = curve.scalars();
    // r, s in [1, n-1]
    let (Some(r), Some(s)) = (n.element(r_bytes), n.element(s_bytes)) else {
        return false;
    };
    if bool::from(n.is_zero(&r)) || bool::from(n.is_zero(&s)) {
        return false;
    }

    let e = n.reduce(&digest[..digest.len().min(32)]);
    let Some(w) = n.inverse(&s) else {
        return false;
    };
    let u1 = n.to_bytes(&n.mul_mod(&e, &w));
    let u2 = n.to_bytes(&n.mul_mod(&r, &w));

    let Ok(g) = curve.generator() else {
        return false;
    };
    let point = curve.add(&curve.mul(&u1, &g), &curve.mul(&u2, &q));
    let Some((x, _)) = curve.to_affine(&point) else {
        return false;
    };
    bool::from(n.reduce(&x).ct_eq(&r))
}

fn parse_signature(der: &[u8]) -> Option<(&[u8], &[u8])> {
    let mut outer = DerReader::new(der);
    let mut seq = outer.sequence().ok()?;
    outer.finish().ok()?;
    let r = seq.unsigned_integer().ok()?;
    let s = seq.unsigned_integer().ok()?;
    seq.finish().ok()?;
    Some((r, s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256;
    use hex_literal::hex;

    const PUBLIC: [u8; 65] = hex!(
        "0460fed4ba255a9d31c961eb74c6356d68c049b8923b61fa6ce669622e60f29fb6"
        "7903fe1008b8bc99a41ae9e95628bc64f2f1b20c2d7e9f5177a3c294d4462299"
    );
    const SIGNATURE: [u8; 71] = hex!(
        "3045022100d867178f39845cf17da8b0fc8f6aaac1d5500c4755345d7127a02c9d2069936c"
        "0220797577be4061791905c83a2928ae22933876b42e41f77311a7d012da28179734"
    );

    #[test]
    fn test_valid_signature() {
        assert!(p256_ecdsa_verify(&PUBLIC, &sha256(b"sample"), &SIGNATURE));
    }

    #[test]
    fn test_wrong_message_rejected() {
        assert!(!p256_ecdsa_verify(&PUBLIC, &sha256(b"samplf"), &SIGNATURE));
    }

    #[test]
    fn test_malformed_signature_rejected() {
        let mut sig = SIGNATURE;
        sig[70] ^= 0x01;
        assert!(!p256_ecdsa_verify(&PUBLIC, &sha256(b"sample"), &sig));
        assert!(!p256_ecdsa_verify(&PUBLIC, &sha256(b"sample"), &SIGNATURE[..70]));
        assert!(!p256_ecdsa_verify(&PUBLIC, &sha256(b"sample"), &[0x30, 0x00]));
    }
}
