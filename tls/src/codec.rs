//! Big-endian wire codec helpers shared by the record and handshake layers.

use alloc::vec::Vec;

use crate::error::TlsError;

/// Cursor over a received byte string. Every read is bounds-checked and
/// fails with a `decode_error` protocol error.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Everything not yet consumed.
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.data[self.pos..];
        self.pos = self.data.len();
        out
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], TlsError> {
        if self.remaining() < n {
            return Err(TlsError::decode("message truncated"));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], TlsError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, TlsError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, TlsError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u24(&mut self) -> Result<u32, TlsError> {
        let b = self.take(3)?;
        Ok(((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32)
    }

    pub fn u32(&mut self) -> Result<u32, TlsError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// `opaque<0..2^8-1>`
    pub fn vec_u8(&mut self) -> Result<&'a [u8], TlsError> {
        let n = self.u8()? as usize;
        self.take(n)
    }

    /// `opaque<0..2^16-1>`
    pub fn vec_u16(&mut self) -> Result<&'a [u8], TlsError> {
        let n = self.u16()? as usize;
        self.take(n)
    }

    /// `opaque<0..2^24-1>`
    pub fn vec_u24(&mut self) -> Result<&'a [u8], TlsError> {
        let n = self.u24()? as usize;
        self.take(n)
    }

    /// Fail unless the input was consumed exactly.
    pub fn finish(&self) -> Result<(), TlsError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(TlsError::decode("trailing bytes after message"))
        }
    }
}

pub fn put_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}

pub fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

pub fn put_u24(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes()[1..]);
}

pub fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

/// Width of a vector's length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthPrefix {
    U8,
    U16,
    U24,
}

impl LengthPrefix {
    const fn width(self) -> usize {
        match self {
            LengthPrefix::U8 => 1,
            LengthPrefix::U16 => 2,
            LengthPrefix::U24 => 3,
        }
    }
}

/// Write a length-prefixed vector whose body is produced by `body`; the
/// prefix is patched once the body length is known.
pub fn put_vec<F>(buf: &mut Vec<u8>, prefix: LengthPrefix, body: F)
where
    F: FnOnce(&mut Vec<u8>),
{
    let width = prefix.width();
    let start = buf.len();
    buf.resize(start + width, 0);
    body(buf);
    let len = buf.len() - start - width;
    let bytes = (len as u32).to_be_bytes();
    buf[start..start + width].copy_from_slice(&bytes[4 - width..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_bounds() {
        let mut r = Reader::new(&[0x00, 0x02, 0xaa, 0xbb, 0x01]);
        assert_eq!(r.vec_u16().unwrap(), &[0xaa, 0xbb]);
        assert_eq!(r.u8().unwrap(), 1);
        assert!(r.finish().is_ok());
        assert!(r.u8().is_err());

        let mut r = Reader::new(&[0x00, 0x00, 0x05, 0x01]);
        assert!(r.vec_u24().is_err());
    }

    #[test]
    fn test_put_vec_patches_length() {
        let mut buf = alloc::vec![0x16];
        put_vec(&mut buf, LengthPrefix::U24, |b| {
            put_u16(b, 0x0303);
            put_vec(b, LengthPrefix::U8, |b| b.extend_from_slice(b"abc"));
        });
        assert_eq!(buf, [0x16, 0x00, 0x00, 0x06, 0x03, 0x03, 0x03, b'a', b'b', b'c']);
    }
}
