//! Poly1305 one-time authenticator: RFC 8439 §2.5
//!
//! 26-bit limb arithmetic; the final reduction mod 2^130 − 5 selects
//! between `h` and `h − p` with a mask, never a branch.

use zeroize::Zeroize;

/// Poly1305 tag length.
pub const TAG_LEN: usize = 16;

const MASK26: u32 = 0x3ff_ffff;

#[inline]
fn le32(b: &[u8], i: usize) -> u32 {
    u32::from_le_bytes([b[i], b[i + 1], b[i + 2], b[i + 3]])
}

/// Streaming Poly1305 state keyed by a 32-byte one-time key.
pub struct Poly1305 {
    r: [u32; 5],
    h: [u32; 5],
    pad: [u32; 4],
    buf: [u8; 16],
    buf_len: usize,
}

impl Drop for Poly1305 {
    fn drop(&mut self) {
        self.r.zeroize();
        self.h.zeroize();
        self.pad.zeroize();
        self.buf.zeroize();
    }
}

impl Poly1305 {
    pub fn new(key: &[u8; 32]) -> Self {
        // r is clamped as it is loaded
        let r = [
            le32(key, 0) & 0x3ff_ffff,
            (le32(key, 3) >> 2) & 0x3ff_ff03,
            (le32(key, 6) >> 4) & 0x3ff_c0ff,
            (le32(key, 9) >> 6) & 0x3f0_3fff,
            (le32(key, 12) >> 8) & 0x00f_ffff,
        ];
        let pad = [le32(key, 16), le32(key, 20), le32(key, 24), le32(key, 28)];
        Self { r, h: [0; 5], pad, buf: [0; 16], buf_len: 0 }
    }

    fn block(&mut self, m: &[u8; 16], hibit: u32) {
        let [r0, r1, r2, r3, r4] = self.r;
        let (s1, s2, s3, s4) = (r1 * 5, r2 * 5, r3 * 5, r4 * 5);
        let [mut h0, mut h1, mut h2, mut h3, mut h4] = self.h;

        h0 = h0.wrapping_add(le32(m, 0) & MASK26);
        h1 = h1.wrapping_add((le32(m, 3) >> 2) & MASK26);
        h2 = h2.wrapping_add((le32(m, 6) >> 4) & MASK26);
        h3 = h3.wrapping_add((le32(m, 9) >> 6) & MASK26);
        h4 = h4.wrapping_add((le32(m, 12) >> 8) | hibit);

        let m64 = |a: u32, b: u32| a as u64 * b as u64;
        let d0 = m64(h0, r0) + m64(h1, s4) + m64(h2, s3) + m64(h3, s2) + m64(h4, s1);
        let mut d1 = m64(h0, r1) + m64(h1, r0) + m64(h2, s4) + m64(h3, s3) + m64(h4, s2);
        let mut d2 = m64(h0, r2) + m64(h1, r1) + m64(h2, r0) + m64(h3, s4) + m64(h4, s3);
        let mut d3 = m64(h0, r3) + m64(h1, r2) + m64(h2, r1) + m64(h3, r0) + m64(h4, s4);
        let mut d4 = m64(h0, r4) + m64(h1, r3) + m64(h2, r2) + m64(h3, r1) + m64(h4, r0);

        let mut c = (d0 >> 26) as u32;
        h0 = d0 as u32 & MASK26;
        d1 += c as u64;
        c = (d1 >> 26) as u32;
        h1 = d1 as u32 & MASK26;
        d2 += c as u64;
        c = (d2 >> 26) as u32;
        h2 = d2 as u32 & MASK26;
        d3 += c as u64;
        c = (d3 >> 26) as u32;
        h3 = d3 as u32 & MASK26;
        d4 += c as u64;
        c = (d4 >> 26) as u32;
        h4 = d4 as u32 & MASK26;
        h0 = h0.wrapping_add(c.wrapping_mul(5));
        c = h0 >> 26;
        h0 &= MASK26;
        h1 = h1.wrapping_add(c);

        self.h = [h0, h1, h2, h3, h4];
    }

    pub fn update(&mut self, mut data: &[u8]) {
        if self.buf_len > 0 {
            let take = (16 - self.buf_len).min(data.len());
            self.buf[self.buf_len..self.buf_len + take].copy_from_slice(&data[..take]);
            self.buf_len += take;
            data = &data[take..];
            if self.buf_len < 16 {
                return;
            }
            let block = self.buf;
            self.block(&block, 1 << 24);
            self.buf_len = 0;
        }
        let mut blocks = data.chunks_exact(16);
        for chunk in &mut blocks {
            let mut block = [0u8; 16];
            block.copy_from_slice(chunk);
            self.block(&block, 1 << 24);
        }
        let rem = blocks.remainder();
        self.buf[..rem.len()].copy_from_slice(rem);
        self.buf_len = rem.len();
    }

    /// Absorb zero bytes up to the next 16-byte boundary (AEAD padding).
    pub fn pad_to_block(&mut self) {
        if self.buf_len > 0 {
            let zeros = [0u8; 16];
            let n = 16 - self.buf_len;
            self.update(&zeros[..n]);
        }
    }

    pub fn finalize(mut self) -> [u8; TAG_LEN] {
        if self.buf_len > 0 {
            let mut block = [0u8; 16];
            block[..self.buf_len].copy_from_slice(&self.buf[..self.buf_len]);
            block[self.buf_len] = 1;
            self.block(&block, 0);
        }

        let [mut h0, mut h1, mut h2, mut h3, mut h4] = self.h;

        // fully carry h
        let mut c = h1 >> 26;
        h1 &= MASK26;
        h2 += c;
        c = h2 >> 26;
        h2 &= MASK26;
        h3 += c;
        c = h3 >> 26;
        h3 &= MASK26;
        h4 += c;
        c = h4 >> 26;
        h4 &= MASK26;
        h0 += c * 5;
        c = h0 >> 26;
        h0 &= MASK26;
        h1 += c;

        // g = h + -p
        let mut g0 = h0.wrapping_add(5);
        c = g0 >> 26;
        g0 &= MASK26;
        let mut g1 = h1.wrapping_add(c);
        c = g1 >> 26;
        g1 &= MASK26;
        let mut g2 = h2.wrapping_add(c);
        c = g2 >> 26;
        g2 &= MASK26;
        let mut g3 = h3.wrapping_add(c);
        c = g3 >> 26;
        g3 &= MASK26;
        let mut g4 = h4.wrapping_add(c).wrapping_sub(1 << 26);

        // select h if h < p, or h + -p if h >= p
        let mut mask = (g4 >> 31).wrapping_sub(1);
        g0 &= mask;
        g1 &= mask;
        g2 &= mask;
        g3 &= mask;
        g4 &= mask;
        mask = !mask;
        h0 = (h0 & mask) | g0;
        h1 = (h1 & mask) | g1;
        h2 = (h2 & mask) | g2;
        h3 = (h3 & mask) | g3;
        h4 = (h4 & mask) | g4;

        // h = h % 2^128
        let w0 = h0 | (h1 << 26);
        let w1 = (h1 >> 6) | (h2 << 20);
        let w2 = (h2 >> 12) | (h3 << 14);
        let w3 = (h3 >> 18) | (h4 << 8);

        // tag = (h + pad) % 2^128
        let mut f = w0 as u64 + self.pad[0] as u64;
        let t0 = f as u32;
        f = w1 as u64 + self.pad[1] as u64 + (f >> 32);
        let t1 = f as u32;
        f = w2 as u64 + self.pad[2] as u64 + (f >> 32);
        let t2 = f as u32;
        f = w3 as u64 + self.pad[3] as u64 + (f >> 32);
        let t3 = f as u32;

        let mut tag = [0u8; TAG_LEN];
        tag[0..4].copy_from_slice(&t0.to_le_bytes());
        tag[4..8].copy_from_slice(&t1.to_le_bytes());
        tag[8..12].copy_from_slice(&t2.to_le_bytes());
        tag[12..16].copy_from_slice(&t3.to_le_bytes());
        tag
    }
}

/// One-shot Poly1305 MAC.
pub fn poly1305(key: &[u8; 32], msg: &[u8]) -> [u8; TAG_LEN] {
    let mut mac = Poly1305::new(key);
    mac.update(msg);
    mac.finalize()
}
