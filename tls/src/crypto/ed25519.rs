//! Ed25519 signature verification (RFC 8032 §5.1.7).
//!
//! Reuses the Curve25519 field from `x25519`. Points are kept in extended
//! twisted-Edwards coordinates `(X : Y : Z : T)` with `x = X/Z`, `y = Y/Z`,
//! `xy = T/Z`. Verification handles public data only.

use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};

use super::modular::Modulus;
use super::sha::sha512;
use super::x25519::Fe;

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

/// Curve constant d, little-endian.
const D: [u8; 32] = hex32("a3785913ca4deb75abd841414d0a700098e879777940c78c73fe6f2bee6c0352");
/// 2·d mod p.
const D2: [u8; 32] = hex32("59f1b226949bd6eb56b183829a14e00030d1f3eef2808e19e7fcdf56dcd90624");
/// A square root of −1 mod p.
const SQRT_M1: [u8; 32] = hex32("b0a00e4a271beec478e42fad0618432fa7d7fb3d99004d2b0bdfc14f8024832b");
/// Group order L = 2^252 + 27742317777372353535851937790883648493, big-endian.
const L: [u8; 32] = hex32("1000000000000000000000000000000014def9dea2f79cd65812631a5cf5d3ed");
/// Compressed base point.
const BASE: [u8; 32] = hex32("5866666666666666666666666666666666666666666666666666666666666666");

const fn hex32(s: &str) -> [u8; 32] {
    const fn nibble(c: u8) -> u8 {
        match c {
            b'0'..=b'9' => c - b'0',
            b'a'..=b'f' => c - b'a' + 10,
            _ => panic!("bad hex digit"),
        }
    }
    let bytes = s.as_bytes();
    let mut out = [0u8; 32];
    let mut i = 0;
    while i < 32 {
        out[i] = (nibble(bytes[2 * i]) << 4) | nibble(bytes[2 * i + 1]);
        i += 1;
    }
    out
}

#[derive(Clone, Copy)]
struct EdwardsPoint {
    x: Fe,
    y: Fe,
    z: Fe,
    t: Fe,
}

impl ConditionallySelectable for EdwardsPoint {
    fn conditional_select(a: &Self, b: &Self, choice: Choice) -> Self {
        EdwardsPoint {
            x: Fe::conditional_select(&a.x, &b.x, choice),
            y: Fe::conditional_select(&a.y, &b.y, choice),
            z: Fe::conditional_select(&a.z, &b.z, choice),
            t: Fe::conditional_select(&a.t, &b.t, choice),
        }
    }
}

impl EdwardsPoint {
    const IDENTITY: EdwardsPoint = EdwardsPoint {
        x: Fe::ZERO,
        y: Fe::ONE,
        z: Fe::ONE,
        t: Fe::ZERO,
    };

    /// Decode a compressed point; `None` if it is not on the curve.
    fn decompress(bytes: &[u8; 32]) -> Option<EdwardsPoint> {
        let sign = bytes[31] >> 7;
        let y = Fe::from_bytes(bytes);
        // y must be canonical (< p)
        let mut y_canonical = *bytes;
        y_canonical[31] &= 0x7f;
        if y.to_bytes() != y_canonical {
            return None;
        }

        let d = Fe::from_bytes(&D);
        let yy = y.square();
        let u = yy.sub(&Fe::ONE);
        let v = d.mul(&yy).add(&Fe::ONE);
        let v3 = v.square().mul(&v);
        let v7 = v3.square().mul(&v);
        let mut x = u.mul(&v3).mul(&u.mul(&v7).pow_p58());

        let vxx = v.mul(&x.square());
        if bool::from(vxx.ct_eq(&u)) {
            // x is already a root
        } else if bool::from(vxx.ct_eq(&u.neg())) {
            x = x.mul(&Fe::from_bytes(&SQRT_M1));
        } else {
            return None;
        }

        let x_is_zero = x.ct_eq(&Fe::ZERO);
        if bool::from(x_is_zero) && sign == 1 {
            return None;
        }
        if x.is_negative().unwrap_u8() != sign {
            x = x.neg();
        }
        Some(EdwardsPoint {
            x,
            y,
            z: Fe::ONE,
            t: x.mul(&y),
        })
    }

    fn negate(&self) -> EdwardsPoint {
        EdwardsPoint {
            x: self.x.neg(),
            y: self.y,
            z: self.z,
            t: self.t.neg(),
        }
    }

    /// Unified addition (add-2008-hwcd-3), also used for doubling.
    fn add(&self, other: &EdwardsPoint) -> EdwardsPoint {
        let d2 = Fe::from_bytes(&D2);
        let a = self.y.sub(&self.x).mul(&other.y.sub(&other.x));
        let b = self.y.add(&self.x).mul(&other.y.add(&other.x));
        let c = self.t.mul(&d2).mul(&other.t);
        let d = self.z.add(&self.z).mul(&other.z);
        let e = b.sub(&a);
        let f = d.sub(&c);
        let g = d.add(&c);
        let h = b.add(&a);
        EdwardsPoint {
            x: e.mul(&f),
            y: g.mul(&h),
            z: f.mul(&g),
            t: e.mul(&h),
        }
    }

    /// `k · P` for a big-endian scalar.
    fn mul(&self, k: &[u8]) -> EdwardsPoint {
        let mut acc = EdwardsPoint::IDENTITY;
        for byte in k {
            for bit in (0..8).rev() {
                acc = acc.add(&acc);
                let sum = acc.add(self);
                acc = EdwardsPoint::conditional_select(&acc, &sum, Choice::from((byte >> bit) & 1));
            }
        }
        acc
    }

    fn compress(&self) -> [u8; 32] {
        let z_inv = self.z.invert();
        let x = self.x.mul(&z_inv).to_bytes();
        let mut y = self.y.mul(&z_inv).to_bytes();
        y[31] |= (x[0] & 1) << 7;
        y
    }
}

/// Verify an Ed25519 signature: accept iff `[s]B = R + [k]A` with
/// `k = SHA-512(R || A || M) mod L`, checked as `encode([s]B − [k]A) == R`.
pub fn ed25519_verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(public_key) = <&[u8; PUBLIC_KEY_LEN]>::try_from(public_key) else {
        return false;
    };
    if signature.len() != SIGNATURE_LEN {
        return false;
    }
    let (r_bytes, s_le) = signature.split_at(32);

    let Some(a) = EdwardsPoint::decompress(public_key) else {
        return false;
    };
    let Some(base) = EdwardsPoint::decompress(&BASE) else {
        return false;
    };
    let Ok(order) = Modulus::new(&L) else {
        return false;
    };

    // s must be below L (rejects malleable signatures)
    let mut s_be = [0u8; 32];
    for (dst, src) in s_be.iter_mut().zip(s_le.iter().rev()) {
        *dst = *src;
    }
    if order.element(&s_be).is_none() {
        return false;
    }

    let digest = {
        let mut input = alloc::vec::Vec::with_capacity(64 + message.len());
        input.extend_from_slice(r_bytes);
        input.extend_from_slice(public_key);
        input.extend_from_slice(message);
        sha512(&input)
    };
    // the digest is a little-endian integer
    let mut digest_be = [0u8; 64];
    for (dst, src) in digest_be.iter_mut().zip(digest.iter().rev()) {
        *dst = *src;
    }
    let k = order.to_bytes(&order.reduce(&digest_be));

    let check = base.mul(&s_be).add(&a.negate().mul(&k));
    bool::from(check.compress().ct_eq(r_bytes))
}
