//! Minimal DER reader for the X.509 and signature structures the client
//! has to look inside. Only definite lengths and single-byte tags.

use thiserror::Error;

pub(crate) const BOOLEAN: u8 = 0x01;
pub(crate) const INTEGER: u8 = 0x02;
pub(crate) const BIT_STRING: u8 = 0x03;
pub(crate) const OCTET_STRING: u8 = 0x04;
pub(crate) const NULL: u8 = 0x05;
pub(crate) const OID: u8 = 0x06;
pub(crate) const UTF8_STRING: u8 = 0x0c;
pub(crate) const PRINTABLE_STRING: u8 = 0x13;
pub(crate) const T61_STRING: u8 = 0x14;
pub(crate) const IA5_STRING: u8 = 0x16;
pub(crate) const UTC_TIME: u8 = 0x17;
pub(crate) const GENERALIZED_TIME: u8 = 0x18;
pub(crate) const SEQUENCE: u8 = 0x30;
pub(crate) const SET: u8 = 0x31;

/// Context-specific constructed tag `[n]`.
pub(crate) const fn explicit(n: u8) -> u8 {
    0xa0 | n
}

/// Context-specific primitive tag `[n]`.
pub(crate) const fn implicit(n: u8) -> u8 {
    0x80 | n
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("malformed DER: {0}")]
pub struct DerError(pub &'static str);

/// One tag-length-value element.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Tlv<'a> {
    pub tag: u8,
    pub value: &'a [u8],
    /// The full encoding including tag and length.
    pub raw: &'a [u8],
}

pub(crate) struct DerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DerReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn peek_tag(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn read_any(&mut self) -> Result<Tlv<'a>, DerError> {
        let start = self.pos;
        let tag = *self.data.get(self.pos).ok_or(DerError("truncated tag"))?;
        if tag & 0x1f == 0x1f {
            return Err(DerError("multi-byte tag"));
        }
        let first = *self.data.get(self.pos + 1).ok_or(DerError("truncated length"))?;
        let mut pos = self.pos + 2;
        let len = if first < 0x80 {
            first as usize
        } else {
            let n = (first & 0x7f) as usize;
            if n == 0 || n > 3 {
                return Err(DerError("unsupported length form"));
            }
            let bytes = self
                .data
                .get(pos..pos + n)
                .ok_or(DerError("truncated length"))?;
            pos += n;
            bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize)
        };
        let end = pos.checked_add(len).ok_or(DerError("length overflow"))?;
        if end > self.data.len() {
            return Err(DerError("value exceeds input"));
        }
        self.pos = end;
        Ok(Tlv {
            tag,
            value: &self.data[pos..end],
            raw: &self.data[start..end],
        })
    }

    /// Read an element that must carry `tag`.
    pub fn read(&mut self, tag: u8) -> Result<Tlv<'a>, DerError> {
        let tlv = self.read_any()?;
        if tlv.tag != tag {
            return Err(DerError("unexpected tag"));
        }
        Ok(tlv)
    }

    /// Read the element only if the next tag is `tag`.
    pub fn read_optional(&mut self, tag: u8) -> Result<Option<Tlv<'a>>, DerError> {
        if self.peek_tag() == Some(tag) {
            self.read(tag).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Enter a SEQUENCE and return a reader over its contents.
    pub fn sequence(&mut self) -> Result<DerReader<'a>, DerError> {
        Ok(DerReader::new(self.read(SEQUENCE)?.value))
    }

    /// A non-negative INTEGER's magnitude, big-endian without sign padding.
    pub fn unsigned_integer(&mut self) -> Result<&'a [u8], DerError> {
        let value = self.read(INTEGER)?.value;
        match value {
            [] => Err(DerError("empty integer")),
            [first, ..] if first & 0x80 != 0 => Err(DerError("negative integer")),
            [0, rest @ ..] if !rest.is_empty() => Ok(rest),
            _ => Ok(value),
        }
    }

    /// A BIT STRING with no unused bits.
    pub fn bit_string(&mut self) -> Result<&'a [u8], DerError> {
        match self.read(BIT_STRING)?.value {
            [0, rest @ ..] => Ok(rest),
            _ => Err(DerError("bit string with unused bits")),
        }
    }

    pub fn finish(&self) -> Result<(), DerError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(DerError("trailing data"))
        }
    }
}
