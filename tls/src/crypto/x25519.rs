//! X25519 Diffie-Hellman key exchange: RFC 7748
//!
//! Uses Curve25519 (Montgomery form) with radix-2^51 limb representation.
//! The field type is shared with Ed25519 verification.

use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};
use zeroize::Zeroize;

use super::CryptoError;

/// X25519 scalar multiplication: compute `scalar * point`.
///
/// Both `scalar` and `point` are 32-byte little-endian values. The scalar
/// is clamped per RFC 7748 §5. An all-zero result means the peer sent a
/// low-order point and is rejected.
pub fn x25519(scalar: &[u8; 32], point: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
    let mut k = *scalar;
    clamp(&mut k);
    let u = Fe::from_bytes(point);
    let out = montgomery_ladder(&k, &u).to_bytes();
    k.zeroize();
    if bool::from(out.ct_eq(&[0u8; 32])) {
        return Err(CryptoError::LowOrderPoint);
    }
    Ok(out)
}

/// X25519 with the standard base point (u=9): the public key for `scalar`.
pub fn x25519_base(scalar: &[u8; 32]) -> [u8; 32] {
    let mut k = *scalar;
    clamp(&mut k);
    let out = montgomery_ladder(&k, &Fe::from_u64(9)).to_bytes();
    k.zeroize();
    out
}

fn clamp(k: &mut [u8; 32]) {
    k[0] &= 248;
    k[31] &= 127;
    k[31] |= 64;
}

// ── Field element: GF(2^255-19), radix 2^51 ────────────────

const MASK51: u64 = (1u64 << 51) - 1;

/// 2p in radix 2^51, added before subtracting so limbs never underflow.
const TWO_P: [u64; 5] = [
    0x000f_ffff_ffff_ffda,
    0x000f_ffff_ffff_fffe,
    0x000f_ffff_ffff_fffe,
    0x000f_ffff_ffff_fffe,
    0x000f_ffff_ffff_fffe,
];

/// Field element: 5 limbs, each kept a little above 2^51 at most.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Fe(pub(crate) [u64; 5]);

impl Zeroize for Fe {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl ConditionallySelectable for Fe {
    fn conditional_select(a: &Self, b: &Self, choice: Choice) -> Self {
        let mut out = [0u64; 5];
        for i in 0..5 {
            out[i] = u64::conditional_select(&a.0[i], &b.0[i], choice);
        }
        Fe(out)
    }
}

impl Fe {
    pub(crate) const ZERO: Fe = Fe([0; 5]);
    pub(crate) const ONE: Fe = Fe([1, 0, 0, 0, 0]);

    pub(crate) fn from_u64(v: u64) -> Fe {
        Fe([v & MASK51, v >> 51, 0, 0, 0])
    }

    /// Decode 32 little-endian bytes, ignoring the top bit.
    pub(crate) fn from_bytes(bytes: &[u8; 32]) -> Fe {
        let load8 = |i: usize| -> u64 {
            let mut v = 0u64;
            for (j, b) in bytes[i..].iter().take(8).enumerate() {
                v |= (*b as u64) << (8 * j);
            }
            v
        };
        Fe([
            load8(0) & MASK51,
            (load8(6) >> 3) & MASK51,
            (load8(12) >> 6) & MASK51,
            (load8(19) >> 1) & MASK51,
            (load8(24) >> 12) & MASK51,
        ])
    }

    /// Canonical little-endian encoding (fully reduced mod p).
    pub(crate) fn to_bytes(&self) -> [u8; 32] {
        let mut f = self.carry().0;
        // q = 1 iff f >= p; computed by propagating f + 19 through the limbs
        let mut q = (f[0] + 19) >> 51;
        q = (f[1] + q) >> 51;
        q = (f[2] + q) >> 51;
        q = (f[3] + q) >> 51;
        q = (f[4] + q) >> 51;
        f[0] += 19 * q;
        for i in 0..4 {
            f[i + 1] += f[i] >> 51;
            f[i] &= MASK51;
        }
        f[4] &= MASK51;

        let mut out = [0u8; 32];
        let mut acc: u128 = 0;
        let mut acc_bits = 0;
        let mut pos = 0;
        for limb in f.iter() {
            acc |= (*limb as u128) << acc_bits;
            acc_bits += 51;
            while acc_bits >= 8 && pos < 32 {
                out[pos] = acc as u8;
                acc >>= 8;
                acc_bits -= 8;
                pos += 1;
            }
        }
        if pos < 32 {
            out[pos] = acc as u8;
        }
        out
    }

    /// Propagate carries so every limb is below 2^51 (limb 1 may hold one
    /// extra bit).
    fn carry(&self) -> Fe {
        let mut f = self.0;
        for i in 0..4 {
            f[i + 1] += f[i] >> 51;
            f[i] &= MASK51;
        }
        let c = f[4] >> 51;
        f[4] &= MASK51;
        f[0] += c * 19;
        f[1] += f[0] >> 51;
        f[0] &= MASK51;
        Fe(f)
    }

    pub(crate) fn add(&self, b: &Fe) -> Fe {
        let mut r = [0u64; 5];
        for i in 0..5 {
            r[i] = self.0[i] + b.0[i];
        }
        Fe(r).carry()
    }

    pub(crate) fn sub(&self, b: &Fe) -> Fe {
        let mut r = [0u64; 5];
        for i in 0..5 {
            r[i] = (self.0[i] + TWO_P[i]) - b.0[i];
        }
        Fe(r).carry()
    }

    pub(crate) fn neg(&self) -> Fe {
        Fe::ZERO.sub(self)
    }

    pub(crate) fn mul(&self, b: &Fe) -> Fe {
        let [a0, a1, a2, a3, a4] = self.0.map(|v| v as u128);
        let [b0, b1, b2, b3, b4] = b.0.map(|v| v as u128);
        let (b1_19, b2_19, b3_19, b4_19) = (b1 * 19, b2 * 19, b3 * 19, b4 * 19);

        let t0 = a0 * b0 + a1 * b4_19 + a2 * b3_19 + a3 * b2_19 + a4 * b1_19;
        let mut t1 = a0 * b1 + a1 * b0 + a2 * b4_19 + a3 * b3_19 + a4 * b2_19;
        let mut t2 = a0 * b2 + a1 * b1 + a2 * b0 + a3 * b4_19 + a4 * b3_19;
        let mut t3 = a0 * b3 + a1 * b2 + a2 * b1 + a3 * b0 + a4 * b4_19;
        let mut t4 = a0 * b4 + a1 * b3 + a2 * b2 + a3 * b1 + a4 * b0;

        let m = MASK51 as u128;
        t1 += t0 >> 51;
        let r0 = t0 & m;
        t2 += t1 >> 51;
        let r1 = t1 & m;
        t3 += t2 >> 51;
        let r2 = t2 & m;
        t4 += t3 >> 51;
        let r3 = t3 & m;
        let c = t4 >> 51;
        let r4 = t4 & m;

        let r0 = r0 + c * 19;
        let r1 = r1 + (r0 >> 51);
        Fe([(r0 & m) as u64, r1 as u64, r2 as u64, r3 as u64, r4 as u64])
    }

    pub(crate) fn square(&self) -> Fe {
        self.mul(self)
    }

    fn mul_small(&self, s: u64) -> Fe {
        let mut t = [0u128; 5];
        for i in 0..5 {
            t[i] = self.0[i] as u128 * s as u128;
        }
        for i in 0..4 {
            t[i + 1] += t[i] >> 51;
            t[i] &= MASK51 as u128;
        }
        let c = t[4] >> 51;
        t[4] &= MASK51 as u128;
        t[0] += c * 19;
        t[1] += t[0] >> 51;
        t[0] &= MASK51 as u128;
        Fe(t.map(|v| v as u64))
    }

    fn pow2k(&self, k: u32) -> Fe {
        let mut r = *self;
        for _ in 0..k {
            r = r.square();
        }
        r
    }

    /// Returns (z^(2^250 - 1), z^11), the shared prefix of the inversion
    /// and square-root addition chains.
    fn pow_2_250_1(&self) -> (Fe, Fe) {
        let z2 = self.square();
        let z9 = z2.pow2k(2).mul(self);
        let z11 = z9.mul(&z2);
        let z2_5_0 = z11.square().mul(&z9);
        let z2_10_0 = z2_5_0.pow2k(5).mul(&z2_5_0);
        let z2_20_0 = z2_10_0.pow2k(10).mul(&z2_10_0);
        let z2_40_0 = z2_20_0.pow2k(20).mul(&z2_20_0);
        let z2_50_0 = z2_40_0.pow2k(10).mul(&z2_10_0);
        let z2_100_0 = z2_50_0.pow2k(50).mul(&z2_50_0);
        let z2_200_0 = z2_100_0.pow2k(100).mul(&z2_100_0);
        let z2_250_0 = z2_200_0.pow2k(50).mul(&z2_50_0);
        (z2_250_0, z11)
    }

    /// z^(p-2) = z^-1 (0 maps to 0).
    pub(crate) fn invert(&self) -> Fe {
        let (t, z11) = self.pow_2_250_1();
        t.pow2k(5).mul(&z11)
    }

    /// z^((p-5)/8) = z^(2^252 - 3), used for square roots.
    pub(crate) fn pow_p58(&self) -> Fe {
        let (t, _) = self.pow_2_250_1();
        t.pow2k(2).mul(self)
    }

    pub(crate) fn ct_eq(&self, other: &Fe) -> Choice {
        self.to_bytes().ct_eq(&other.to_bytes())
    }

    /// Low bit of the canonical encoding ("negative" per RFC 8032).
    pub(crate) fn is_negative(&self) -> Choice {
        Choice::from(self.to_bytes()[0] & 1)
    }
}

// ── Montgomery ladder ───────────────────────────────────────

fn montgomery_ladder(k: &[u8; 32], u: &Fe) -> Fe {
    let x1 = *u;
    let mut x2 = Fe::ONE;
    let mut z2 = Fe::ZERO;
    let mut x3 = *u;
    let mut z3 = Fe::ONE;
    let mut swap = Choice::from(0);

    for t in (0..255).rev() {
        let bit = Choice::from((k[t >> 3] >> (t & 7)) & 1);
        swap ^= bit;
        Fe::conditional_swap(&mut x2, &mut x3, swap);
        Fe::conditional_swap(&mut z2, &mut z3, swap);
        swap = bit;

        let a = x2.add(&z2);
        let aa = a.square();
        let b = x2.sub(&z2);
        let bb = b.square();
        let e = aa.sub(&bb);
        let c = x3.add(&z3);
        let d = x3.sub(&z3);
        let da = d.mul(&a);
        let cb = c.mul(&b);
        x3 = da.add(&cb).square();
        z3 = x1.mul(&da.sub(&cb).square());
        x2 = aa.mul(&bb);
        z2 = e.mul(&aa.add(&e.mul_small(121665)));
    }
    Fe::conditional_swap(&mut x2, &mut x3, swap);
    Fe::conditional_swap(&mut z2, &mut z3, swap);

    let out = x2.mul(&z2.invert());
    x3.zeroize();
    z3.zeroize();
    out
}
