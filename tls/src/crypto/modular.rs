//! Modular arithmetic over odd moduli.
//!
//! One Montgomery implementation backs every big-number operation in the
//! crate: the P-256 field and scalar rings, RSA public-key operations and
//! Ed25519 scalar reduction. Multiplication, addition and subtraction run
//! in time that depends only on the modulus size, never on operand values.

use alloc::vec;
use alloc::vec::Vec;

use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};
use zeroize::Zeroize;

use super::CryptoError;

/// The arithmetic shared by key exchange and signature verification.
pub trait ModularArithmetic {
    type Element: Clone;

    /// `a + b mod m`.
    fn add(&self, a: &Self::Element, b: &Self::Element) -> Self::Element;

    /// `a - b mod m`.
    fn sub(&self, a: &Self::Element, b: &Self::Element) -> Self::Element;

    /// `a * b mod m`.
    fn mul_mod(&self, a: &Self::Element, b: &Self::Element) -> Self::Element;

    /// `base ^ exponent mod m`, exponent given big-endian. Performs the same
    /// sequence of operations for every exponent of a given byte length.
    fn pow_mod(&self, base: &Self::Element, exponent: &[u8]) -> Self::Element;

    /// Multiplicative inverse, `None` for zero. Requires a prime modulus.
    fn inverse(&self, a: &Self::Element) -> Option<Self::Element>;
}

/// An element of `Z/mZ`, held in Montgomery form with the modulus' limb count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Residue(Vec<u64>);

impl Residue {
    /// Swap `a` and `b` when `choice` is set, without branching on it.
    pub fn conditional_swap(a: &mut Residue, b: &mut Residue, choice: Choice) {
        for (x, y) in a.0.iter_mut().zip(b.0.iter_mut()) {
            u64::conditional_swap(x, y, choice);
        }
    }

    pub fn ct_eq(&self, other: &Residue) -> Choice {
        self.0.as_slice().ct_eq(other.0.as_slice())
    }
}

impl Zeroize for Residue {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// An odd modulus `m > 1` prepared for Montgomery multiplication
/// with `R = 2^(64·k)`.
#[derive(Clone, Debug)]
pub struct Modulus {
    /// Little-endian limbs.
    m: Vec<u64>,
    /// `-m^-1 mod 2^64`.
    m0inv: u64,
    /// `R mod m`: Montgomery form of 1.
    one: Vec<u64>,
    /// `R^2 mod m`.
    rr: Vec<u64>,
    byte_len: usize,
}

impl Modulus {
    /// Build from a big-endian byte string (leading zeros allowed).
    pub fn new(modulus_be: &[u8]) -> Result<Self, CryptoError> {
        let trimmed = strip_leading_zeros(modulus_be);
        if trimmed.is_empty() || trimmed[trimmed.len() - 1] & 1 == 0 {
            return Err(CryptoError::InvalidLength);
        }
        if trimmed.len() == 1 && trimmed[0] == 1 {
            return Err(CryptoError::InvalidLength);
        }
        let k = (trimmed.len() + 7) / 8;
        let m = limbs_from_be(trimmed, k).ok_or(CryptoError::InvalidLength)?;

        let mut inv: u64 = 1;
        for _ in 0..6 {
            inv = inv.wrapping_mul(2u64.wrapping_sub(m[0].wrapping_mul(inv)));
        }

        let mut this = Self {
            m,
            m0inv: inv.wrapping_neg(),
            one: Vec::new(),
            rr: Vec::new(),
            byte_len: trimmed.len(),
        };

        // R mod m and R^2 mod m by repeated modular doubling from 1.
        let mut x = vec![0u64; k];
        x[0] = 1;
        for _ in 0..64 * k {
            x = this.add_raw(&x, &x);
        }
        this.one = x.clone();
        for _ in 0..64 * k {
            x = this.add_raw(&x, &x);
        }
        this.rr = x;
        Ok(this)
    }

    /// Number of 64-bit limbs.
    pub fn limbs(&self) -> usize {
        self.m.len()
    }

    /// Length of the modulus in bytes, without leading zeros.
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Length of the modulus in bits.
    pub fn bit_len(&self) -> usize {
        let top = self.m[self.m.len() - 1];
        64 * (self.m.len() - 1) + (64 - top.leading_zeros() as usize)
    }

    pub fn zero(&self) -> Residue {
        Residue(vec![0u64; self.m.len()])
    }

    pub fn one(&self) -> Residue {
        Residue(self.one.clone())
    }

    pub fn from_u64(&self, v: u64) -> Residue {
        let mut limbs = vec![0u64; self.m.len()];
        limbs[0] = v;
        Residue(self.mont_mul(&limbs, &self.rr))
    }

    /// Canonical element from big-endian bytes; `None` if the value is `>= m`.
    pub fn element(&self, be: &[u8]) -> Option<Residue> {
        let limbs = limbs_from_be(strip_leading_zeros(be), self.m.len())?;
        let (_, borrow) = sub_limbs(&limbs, &self.m);
        if borrow == 0 {
            return None;
        }
        Some(Residue(self.mont_mul(&limbs, &self.rr)))
    }

    /// Reduce a big-endian integer of any length modulo `m`.
    pub fn reduce(&self, be: &[u8]) -> Residue {
        let k = self.m.len();
        let chunk_bytes = 8 * k;
        let mut acc = vec![0u64; k];
        let first = be.len() % chunk_bytes;
        let mut chunks: Vec<&[u8]> = Vec::new();
        if first != 0 {
            chunks.push(&be[..first]);
        }
        chunks.extend(be[first..].chunks(chunk_bytes));
        for chunk in chunks {
            // chunk < R, so chunk·R² fits the Montgomery input bound
            let limbs = limbs_from_be(chunk, k).unwrap_or_else(|| vec![0u64; k]);
            let shifted = self.mont_mul(&acc, &self.rr);
            let lifted = self.mont_mul(&limbs, &self.rr);
            acc = self.add_raw(&shifted, &lifted);
        }
        Residue(acc)
    }

    /// Big-endian encoding, left-padded to `byte_len()`.
    pub fn to_bytes(&self, a: &Residue) -> Vec<u8> {
        let mut unit = vec![0u64; self.m.len()];
        unit[0] = 1;
        let plain = self.mont_mul(&a.0, &unit);
        let mut out = vec![0u8; 8 * self.m.len()];
        for (i, limb) in plain.iter().enumerate() {
            let end = out.len() - 8 * i;
            out[end - 8..end].copy_from_slice(&limb.to_be_bytes());
        }
        out.split_off(out.len() - self.byte_len)
    }

    pub fn is_zero(&self, a: &Residue) -> Choice {
        a.ct_eq(&self.zero())
    }

    pub fn negate(&self, a: &Residue) -> Residue {
        self.sub(&self.zero(), a)
    }

    /// Montgomery product `a·b·R^-1 mod m` (CIOS). Inputs must satisfy
    /// `a·b < m·R`; the result is fully reduced.
    fn mont_mul(&self, a: &[u64], b: &[u64]) -> Vec<u64> {
        let k = self.m.len();
        let mut t = vec![0u64; k + 2];
        for i in 0..k {
            let mut c: u64 = 0;
            for j in 0..k {
                let x = t[j] as u128 + (a[j] as u128) * (b[i] as u128) + c as u128;
                t[j] = x as u64;
                c = (x >> 64) as u64;
            }
            let x = t[k] as u128 + c as u128;
            t[k] = x as u64;
            t[k + 1] = (x >> 64) as u64;

            let q = t[0].wrapping_mul(self.m0inv);
            let x = t[0] as u128 + (q as u128) * (self.m[0] as u128);
            let mut c = (x >> 64) as u64;
            for j in 1..k {
                let x = t[j] as u128 + (q as u128) * (self.m[j] as u128) + c as u128;
                t[j - 1] = x as u64;
                c = (x >> 64) as u64;
            }
            let x = t[k] as u128 + c as u128;
            t[k - 1] = x as u64;
            t[k] = t[k + 1] + (x >> 64) as u64;
            t[k + 1] = 0;
        }
        let hi = t[k];
        t.truncate(k);
        self.reduce_once(t, hi)
    }

    /// Given `hi·R + r < 2m`, return it reduced below `m`.
    fn reduce_once(&self, r: Vec<u64>, hi: u64) -> Vec<u64> {
        let (d, borrow) = sub_limbs(&r, &self.m);
        // keep r only when r < m and nothing overflowed into hi
        let keep_r = Choice::from((borrow & (hi ^ 1)) as u8);
        r.iter()
            .zip(d.iter())
            .map(|(x, y)| u64::conditional_select(y, x, keep_r))
            .collect()
    }

    fn add_raw(&self, a: &[u64], b: &[u64]) -> Vec<u64> {
        let mut r = Vec::with_capacity(a.len());
        let mut carry = 0u64;
        for (x, y) in a.iter().zip(b.iter()) {
            let s = *x as u128 + *y as u128 + carry as u128;
            r.push(s as u64);
            carry = (s >> 64) as u64;
        }
        self.reduce_once(r, carry)
    }
}

impl ModularArithmetic for Modulus {
    type Element = Residue;

    fn add(&self, a: &Residue, b: &Residue) -> Residue {
        Residue(self.add_raw(&a.0, &b.0))
    }

    fn sub(&self, a: &Residue, b: &Residue) -> Residue {
        let (mut r, borrow) = sub_limbs(&a.0, &b.0);
        let mask = borrow.wrapping_neg();
        let mut carry = 0u64;
        for (x, m) in r.iter_mut().zip(self.m.iter()) {
            let s = *x as u128 + (m & mask) as u128 + carry as u128;
            *x = s as u64;
            carry = (s >> 64) as u64;
        }
        Residue(r)
    }

    fn mul_mod(&self, a: &Residue, b: &Residue) -> Residue {
        Residue(self.mont_mul(&a.0, &b.0))
    }

    fn pow_mod(&self, base: &Residue, exponent: &[u8]) -> Residue {
        let mut acc = self.one();
        for byte in exponent {
            for bit in (0..8).rev() {
                acc = self.mul_mod(&acc, &acc);
                let mut product = self.mul_mod(&acc, base);
                let choice = Choice::from((byte >> bit) & 1);
                Residue::conditional_swap(&mut acc, &mut product, choice);
            }
        }
        acc
    }

    fn inverse(&self, a: &Residue) -> Option<Residue> {
        if bool::from(self.is_zero(a)) {
            return None;
        }
        // Fermat: a^(m-2)
        let mut exp = self.m.clone();
        let (lo, borrow) = exp[0].overflowing_sub(2);
        exp[0] = lo;
        if borrow {
            for limb in exp.iter_mut().skip(1) {
                let (v, b) = limb.overflowing_sub(1);
                *limb = v;
                if !b {
                    break;
                }
            }
        }
        let mut exp_be = Vec::with_capacity(8 * exp.len());
        for limb in exp.iter().rev() {
            exp_be.extend_from_slice(&limb.to_be_bytes());
        }
        Some(self.pow_mod(a, &exp_be))
    }
}

fn strip_leading_zeros(be: &[u8]) -> &[u8] {
    let start = be.iter().position(|&b| b != 0).unwrap_or(be.len());
    &be[start..]
}

/// Big-endian bytes to `k` little-endian limbs; `None` if it does not fit.
fn limbs_from_be(be: &[u8], k: usize) -> Option<Vec<u64>> {
    if be.len() > 8 * k {
        return None;
    }
    let mut limbs = vec![0u64; k];
    for (i, byte) in be.iter().rev().enumerate() {
        limbs[i / 8] |= (*byte as u64) << (8 * (i % 8));
    }
    Some(limbs)
}

/// `a - b` over equal-length limb vectors, returning the final borrow (0/1).
fn sub_limbs(a: &[u64], b: &[u64]) -> (Vec<u64>, u64) {
    let mut r = Vec::with_capacity(a.len());
    let mut borrow = 0u64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (d1, b1) = x.overflowing_sub(*y);
        let (d2, b2) = d1.overflowing_sub(borrow);
        r.push(d2);
        borrow = (b1 | b2) as u64;
    }
    (r, borrow)
}
