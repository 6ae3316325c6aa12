//! P-256 (secp256r1 / prime256v1): ECDH and the group law for ECDSA
//!
//! Field arithmetic mod p = 2^256 − 2^224 + 2^192 + 2^96 − 1 runs on the
//! shared Montgomery `Modulus`. Points use projective coordinates with the
//! complete addition formula for a = −3 (Renes–Costello–Batina 2016,
//! algorithm 4), so doubling, the identity and P + (−P) need no branches.
//! Scalar multiplication is a Montgomery ladder with masked swaps.

use alloc::vec::Vec;

use subtle::{Choice, ConstantTimeEq};
use zeroize::Zeroize;

use super::modular::{ModularArithmetic, Modulus, Residue};
use super::CryptoError;

pub(crate) const P: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
];

pub(crate) const N: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xbc, 0xe6, 0xfa, 0xad, 0xa7, 0x17, 0x9e, 0x84, 0xf3, 0xb9, 0xca, 0xc2, 0xfc, 0x63, 0x25, 0x51,
];

const B: [u8; 32] = [
    0x5a, 0xc6, 0x35, 0xd8, 0xaa, 0x3a, 0x93, 0xe7, 0xb3, 0xeb, 0xbd, 0x55, 0x76, 0x98, 0x86, 0xbc,
    0x65, 0x1d, 0x06, 0xb0, 0xcc, 0x53, 0xb0, 0xf6, 0x3b, 0xce, 0x3c, 0x3e, 0x27, 0xd2, 0x60, 0x4b,
];

const GX: [u8; 32] = [
    0x6b, 0x17, 0xd1, 0xf2, 0xe1, 0x2c, 0x42, 0x47, 0xf8, 0xbc, 0xe6, 0xe5, 0x63, 0xa4, 0x40, 0xf2,
    0x77, 0x03, 0x7d, 0x81, 0x2d, 0xeb, 0x33, 0xa0, 0xf4, 0xa1, 0x39, 0x45, 0xd8, 0x98, 0xc2, 0x96,
];

const GY: [u8; 32] = [
    0x4f, 0xe3, 0x42, 0xe2, 0xfe, 0x1a, 0x7f, 0x9b, 0x8e, 0xe7, 0xeb, 0x4a, 0x7c, 0x0f, 0x9e, 0x16,
    0x2b, 0xce, 0x33, 0x57, 0x6b, 0x31, 0x5e, 0xce, 0xcb, 0xb6, 0x40, 0x68, 0x37, 0xbf, 0x51, 0xf5,
];

/// Uncompressed SEC1 encoding length: `0x04 || X || Y`.
pub const PUBLIC_KEY_LEN: usize = 65;

/// A point in projective coordinates `(X : Y : Z)`, `Z = 0` at infinity.
#[derive(Clone, Debug)]
pub(crate) struct ProjectivePoint {
    x: Residue,
    y: Residue,
    z: Residue,
}

impl ProjectivePoint {
    fn conditional_swap(a: &mut Self, b: &mut Self, choice: Choice) {
        Residue::conditional_swap(&mut a.x, &mut b.x, choice);
        Residue::conditional_swap(&mut a.y, &mut b.y, choice);
        Residue::conditional_swap(&mut a.z, &mut b.z, choice);
    }
}

impl Zeroize for ProjectivePoint {
    fn zeroize(&mut self) {
        self.x.zeroize();
        self.y.zeroize();
        self.z.zeroize();
    }
}

/// The curve y² = x³ − 3x + b over GF(p) together with its scalar ring.
pub(crate) struct Curve {
    field: Modulus,
    scalars: Modulus,
    b: Residue,
}

impl Curve {
    pub fn new() -> Result<Self, CryptoError> {
        let field = Modulus::new(&P)?;
        let scalars = Modulus::new(&N)?;
        let b = field.element(&B).ok_or(CryptoError::InvalidLength)?;
        Ok(Self { field, scalars, b })
    }

    /// The group order `n` as a modulus.
    pub fn scalars(&self) -> &Modulus {
        &self.scalars
    }

    pub fn identity(&self) -> ProjectivePoint {
        ProjectivePoint {
            x: self.field.zero(),
            y: self.field.one(),
            z: self.field.zero(),
        }
    }

    pub fn generator(&self) -> Result<ProjectivePoint, CryptoError> {
        self.from_affine(&GX, &GY)
    }

    fn from_affine(&self, x: &[u8], y: &[u8]) -> Result<ProjectivePoint, CryptoError> {
        Ok(ProjectivePoint {
            x: self.field.element(x).ok_or(CryptoError::InvalidPoint)?,
            y: self.field.element(y).ok_or(CryptoError::InvalidPoint)?,
            z: self.field.one(),
        })
    }

    /// Parse an uncompressed SEC1 point and check it lies on the curve.
    pub fn decode_point(&self, encoded: &[u8]) -> Result<ProjectivePoint, CryptoError> {
        if encoded.len() != PUBLIC_KEY_LEN || encoded[0] != 0x04 {
            return Err(CryptoError::InvalidPoint);
        }
        let point = self.from_affine(&encoded[1..33], &encoded[33..65])?;
        let f = &self.field;
        // y² == x³ − 3x + b
        let lhs = f.mul_mod(&point.y, &point.y);
        let x2 = f.mul_mod(&point.x, &point.x);
        let x3 = f.mul_mod(&x2, &point.x);
        let three_x = f.add(&f.add(&point.x, &point.x), &point.x);
        let rhs = f.add(&f.sub(&x3, &three_x), &self.b);
        if !bool::from(lhs.ct_eq(&rhs)) {
            return Err(CryptoError::InvalidPoint);
        }
        Ok(point)
    }

    /// Complete addition, valid for all inputs including `P + P` and the
    /// identity.
    pub fn add(&self, p: &ProjectivePoint, q: &ProjectivePoint) -> ProjectivePoint {
        let f = &self.field;
        let m = |a: &Residue, b: &Residue| f.mul_mod(a, b);
        let a = |a: &Residue, b: &Residue| f.add(a, b);
        let s = |a: &Residue, b: &Residue| f.sub(a, b);
        let (x1, y1, z1) = (&p.x, &p.y, &p.z);
        let (x2, y2, z2) = (&q.x, &q.y, &q.z);

        let mut t0 = m(x1, x2);
        let mut t1 = m(y1, y2);
        let mut t2 = m(z1, z2);
        let mut t3 = a(x1, y1);
        let mut t4 = a(x2, y2);
        t3 = m(&t3, &t4);
        t4 = a(&t0, &t1);
        t3 = s(&t3, &t4);
        t4 = a(y1, z1);
        let mut x3 = a(y2, z2);
        t4 = m(&t4, &x3);
        x3 = a(&t1, &t2);
        t4 = s(&t4, &x3);
        x3 = a(x1, z1);
        let mut y3 = a(x2, z2);
        x3 = m(&x3, &y3);
        y3 = a(&t0, &t2);
        y3 = s(&x3, &y3);
        let mut z3 = m(&self.b, &t2);
        x3 = s(&y3, &z3);
        z3 = a(&x3, &x3);
        x3 = a(&x3, &z3);
        z3 = s(&t1, &x3);
        x3 = a(&t1, &x3);
        y3 = m(&self.b, &y3);
        t1 = a(&t2, &t2);
        t2 = a(&t1, &t2);
        y3 = s(&y3, &t2);
        y3 = s(&y3, &t0);
        t1 = a(&y3, &y3);
        y3 = a(&t1, &y3);
        t1 = a(&t0, &t0);
        t0 = a(&t1, &t0);
        t0 = s(&t0, &t2);
        t1 = m(&t4, &y3);
        t2 = m(&t0, &y3);
        y3 = m(&x3, &z3);
        y3 = a(&y3, &t2);
        x3 = m(&x3, &t3);
        x3 = s(&x3, &t1);
        z3 = m(&t4, &z3);
        t1 = m(&t3, &t0);
        z3 = a(&z3, &t1);

        ProjectivePoint { x: x3, y: y3, z: z3 }
    }

    /// `k · P` for a big-endian scalar of any length. Runs the same ladder
    /// steps for every scalar of that length.
    pub fn mul(&self, k: &[u8], p: &ProjectivePoint) -> ProjectivePoint {
        let mut r0 = self.identity();
        let mut r1 = p.clone();
        for byte in k {
            for bit in (0..8).rev() {
                let choice = Choice::from((byte >> bit) & 1);
                ProjectivePoint::conditional_swap(&mut r0, &mut r1, choice);
                r1 = self.add(&r0, &r1);
                r0 = self.add(&r0, &r0);
                ProjectivePoint::conditional_swap(&mut r0, &mut r1, choice);
            }
        }
        r1.zeroize();
        r0
    }

    pub fn is_identity(&self, p: &ProjectivePoint) -> Choice {
        self.field.is_zero(&p.z)
    }

    /// Affine `(x, y)` as 32-byte big-endian values; `None` at infinity.
    pub fn to_affine(&self, p: &ProjectivePoint) -> Option<([u8; 32], [u8; 32])> {
        let z_inv = self.field.inverse(&p.z)?;
        let x = self.field.to_bytes(&self.field.mul_mod(&p.x, &z_inv));
        let y = self.field.to_bytes(&self.field.mul_mod(&p.y, &z_inv));
        let mut ax = [0u8; 32];
        let mut ay = [0u8; 32];
        ax.copy_from_slice(&x);
        ay.copy_from_slice(&y);
        Some((ax, ay))
    }
}

/// Check that a private scalar lies in `[1, n-1]`.
fn check_scalar(curve: &Curve, private_key: &[u8; 32]) -> Result<(), CryptoError> {
    let k = curve
        .scalars
        .element(private_key)
        .ok_or(CryptoError::InvalidLength)?;
    if bool::from(curve.scalars.is_zero(&k)) {
        return Err(CryptoError::InvalidLength);
    }
    Ok(())
}

/// Compute the uncompressed public key `d·G`.
pub fn p256_public_key(private_key: &[u8; 32]) -> Result<[u8; PUBLIC_KEY_LEN], CryptoError> {
    let curve = Curve::new()?;
    check_scalar(&curve, private_key)?;
    let q = curve.mul(private_key, &curve.generator()?);
    let (x, y) = curve.to_affine(&q).ok_or(CryptoError::LowOrderPoint)?;
    let mut out = [0u8; PUBLIC_KEY_LEN];
    out[0] = 0x04;
    out[1..33].copy_from_slice(&x);
    out[33..].copy_from_slice(&y);
    Ok(out)
}

/// P-256 ECDH: the x-coordinate of `d·Q`.
///
/// The peer key must be a 65-byte uncompressed point on the curve. A result
/// at infinity is rejected.
pub fn p256_ecdh(private_key: &[u8; 32], peer_public: &[u8]) -> Result<[u8; 32], CryptoError> {
    let curve = Curve::new()?;
    check_scalar(&curve, private_key)?;
    let q = curve.decode_point(peer_public)?;
    let shared = curve.mul(private_key, &q);
    if bool::from(curve.is_identity(&shared)) {
        return Err(CryptoError::LowOrderPoint);
    }
    let (x, _) = curve.to_affine(&shared).ok_or(CryptoError::LowOrderPoint)?;
    Ok(x)
}

/// Big-endian bytes of a scalar residue, 32 bytes.
pub(crate) fn scalar_bytes(curve: &Curve, s: &Residue) -> Vec<u8> {
    curve.scalars.to_bytes(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    // RFC 5903 §8.1 (256-bit random ECP group)
    const I: [u8; 32] = hex!("c88f01f510d9ac3f70a292daa2316de544e9aab8afe84049c62a9c57862d1433");
    const GIX: [u8; 32] = hex!("dad0b65394221cf9b051e1feca5787d098dfe637fc90b9ef945d0c3772581180");
    const GIY: [u8; 32] = hex!("5271a0461cdb8252d61f1c456fa3e59ab1f45b33accf5f58389e0577b8990bb3");
    const R: [u8; 32] = hex!("c6ef9c5d78ae012a011164acb397ce2088685d8f06bf9be0b283ab46476bee53");
    const GRX: [u8; 32] = hex!("d12dfb5289c8d4f81208b70270398c342296970a0bccb74c736fc7554494bf63");
    const GRY: [u8; 32] = hex!("56fbf3ca366cc23e8157854c13c58d6aac23f046ada30f8353e74f33039872ab");
    const GIRX: [u8; 32] = hex!("d6840f6b42f6edafd13116e0e12565202fef8e9ece7dce03812464d04b9442de");

    fn encode(x: &[u8; 32], y: &[u8; 32]) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[0] = 4;
        out[1..33].copy_from_slice(x);
        out[33..].copy_from_slice(y);
        out
    }

    #[test]
    fn test_public_key_derivation() {
        assert_eq!(p256_public_key(&I).unwrap(), encode(&GIX, &GIY));
        assert_eq!(p256_public_key(&R).unwrap(), encode(&GRX, &GRY));
    }

    #[test]
    fn test_ecdh_agreement() {
        assert_eq!(p256_ecdh(&I, &encode(&GRX, &GRY)).unwrap(), GIRX);
        assert_eq!(p256_ecdh(&R, &encode(&GIX, &GIY)).unwrap(), GIRX);
    }

    #[test]
    fn test_rejects_off_curve_point() {
        let mut bad = encode(&GRX, &GRY);
        bad[64] ^= 1;
        assert_eq!(p256_ecdh(&I, &bad), Err(CryptoError::InvalidPoint));
        assert_eq!(p256_ecdh(&I, &bad[..33]), Err(CryptoError::InvalidPoint));
        let mut compressed = encode(&GRX, &GRY);
        compressed[0] = 2;
        assert_eq!(p256_ecdh(&I, &compressed), Err(CryptoError::InvalidPoint));
    }

    #[test]
    fn test_rejects_out_of_range_scalar() {
        assert!(p256_public_key(&[0u8; 32]).is_err());
        assert!(p256_public_key(&N).is_err());
    }

    #[test]
    fn test_order_times_generator_is_identity() {
        let curve = Curve::new().unwrap();
        let g = curve.generator().unwrap();
        assert!(bool::from(curve.is_identity(&curve.mul(&N, &g))));
        let doubled = curve.add(&g, &g);
        let two_g = curve.mul(&[2], &g);
        assert_eq!(curve.to_affine(&doubled), curve.to_affine(&two_g));
    }
}
