//! TLS record layer: framing and AEAD record protection (RFC 8446 §5).
//!
//! Protected records carry `TLSInnerPlaintext = content || type || zeros`
//! sealed under the direction's traffic key. The nonce is the static IV
//! XOR the 64-bit sequence number (left-padded), and the AAD is the outer
//! record header.

use alloc::vec::Vec;

use crate::alert::AlertDescription;
use crate::config::RecordPadding;
use crate::crypto::aead::{NONCE_LEN, TAG_LEN};
use crate::crypto::{AeadAlgorithm, AeadKey};
use crate::error::TlsError;
use crate::key_schedule::TrafficKeys;

pub const HEADER_LEN: usize = 5;

/// Largest plaintext fragment (2^14).
pub const MAX_PLAINTEXT_LEN: usize = 1 << 14;

/// Largest protected record body (2^14 + 256).
pub const MAX_CIPHERTEXT_LEN: usize = MAX_PLAINTEXT_LEN + 256;

/// `legacy_record_version` written on every record.
pub const LEGACY_VERSION: u16 = 0x0303;

/// Record content types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
}

impl ContentType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            20 => Some(ContentType::ChangeCipherSpec),
            21 => Some(ContentType::Alert),
            22 => Some(ContentType::Handshake),
            23 => Some(ContentType::ApplicationData),
            _ => None,
        }
    }
}

/// One record as framed on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueRecord {
    pub content_type: ContentType,
    pub version: u16,
    pub payload: Vec<u8>,
}

impl OpaqueRecord {
    pub fn new(content_type: ContentType, payload: Vec<u8>) -> Self {
        Self {
            content_type,
            version: LEGACY_VERSION,
            payload,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&header(self.content_type, self.version, self.payload.len()));
        out.extend_from_slice(&self.payload);
        out
    }
}

fn header(content_type: ContentType, version: u16, len: usize) -> [u8; HEADER_LEN] {
    let v = version.to_be_bytes();
    let l = (len as u16).to_be_bytes();
    [content_type as u8, v[0], v[1], l[0], l[1]]
}

/// Encode `data` as unprotected records of at most 2^14 bytes each.
pub fn encode_plaintext(content_type: ContentType, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + HEADER_LEN);
    for chunk in data.chunks(MAX_PLAINTEXT_LEN) {
        out.extend_from_slice(&OpaqueRecord::new(content_type, chunk.to_vec()).encode());
    }
    out
}

// ── Deframing ───────────────────────────────────────────────

/// Reassembles records from an arbitrary split of the incoming byte stream.
#[derive(Debug, Default)]
pub struct RecordReader {
    buf: Vec<u8>,
}

impl RecordReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes received but not yet returned as a record.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete record, `Ok(None)` if more bytes are needed.
    pub fn next_record(&mut self) -> Result<Option<OpaqueRecord>, TlsError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let content_type = ContentType::from_u8(self.buf[0])
            .ok_or_else(|| TlsError::unexpected("unknown record content type"))?;
        let version = u16::from_be_bytes([self.buf[1], self.buf[2]]);
        if version >> 8 != 0x03 {
            return Err(TlsError::decode("bad legacy record version"));
        }
        let len = u16::from_be_bytes([self.buf[3], self.buf[4]]) as usize;
        if len > MAX_CIPHERTEXT_LEN {
            return Err(TlsError::protocol(
                AlertDescription::RecordOverflow,
                "record exceeds 2^14 + 256 bytes",
            ));
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        let payload = self.buf[HEADER_LEN..HEADER_LEN + len].to_vec();
        self.buf.drain(..HEADER_LEN + len);
        log::trace!("[KPIO TLS] record in: type={:?} len={}", content_type, len);
        Ok(Some(OpaqueRecord {
            content_type,
            version,
            payload,
        }))
    }
}

// ── Protection ──────────────────────────────────────────────

/// Which side's traffic keys a cipher uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Records written by the client.
    Client,
    /// Records written by the server.
    Server,
}

/// AEAD state for one direction: key, static IV and sequence number.
pub struct DirectionalCipher {
    aead: AeadAlgorithm,
    key: AeadKey,
    iv: [u8; NONCE_LEN],
    seq: u64,
}

impl Drop for DirectionalCipher {
    fn drop(&mut self) {
        zeroize::Zeroize::zeroize(&mut self.iv);
    }
}

impl DirectionalCipher {
    pub fn new(aead: AeadAlgorithm, keys: &TrafficKeys) -> Result<Self, TlsError> {
        Ok(Self {
            aead,
            key: AeadKey::new(aead, &keys.key)?,
            iv: keys.iv,
            seq: 0,
        })
    }

    pub fn sequence_number(&self) -> u64 {
        self.seq
    }

    /// Nonce for the current sequence number, which is then consumed.
    fn next_nonce(&mut self) -> Result<[u8; NONCE_LEN], TlsError> {
        if self.seq == u64::MAX {
            return Err(TlsError::protocol(
                AlertDescription::InternalError,
                "record sequence number exhausted",
            ));
        }
        let nonce = compute_nonce(&self.iv, self.seq);
        self.seq += 1;
        Ok(nonce)
    }
}

/// `iv XOR (0^32 || seq_be64)`.
pub fn compute_nonce(iv: &[u8; NONCE_LEN], seq: u64) -> [u8; NONCE_LEN] {
    let mut nonce = *iv;
    for (n, s) in nonce[NONCE_LEN - 8..].iter_mut().zip(seq.to_be_bytes()) {
        *n ^= s;
    }
    nonce
}

fn padding_len(policy: RecordPadding, inner_len: usize) -> usize {
    let limit = MAX_PLAINTEXT_LEN + 1;
    let pad = match policy {
        RecordPadding::None => 0,
        RecordPadding::Block(block) if block > 1 => {
            let block = block as usize;
            (block - inner_len % block) % block
        }
        RecordPadding::Block(_) => 0,
    };
    pad.min(limit.saturating_sub(inner_len))
}

/// Per-direction record protection for one connection.
#[derive(Default)]
pub struct RecordLayer {
    client: Option<DirectionalCipher>,
    server: Option<DirectionalCipher>,
}

impl core::fmt::Debug for RecordLayer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RecordLayer")
            .field("client_seq", &self.client.as_ref().map(|c| c.seq))
            .field("server_seq", &self.server.as_ref().map(|c| c.seq))
            .finish()
    }
}

impl RecordLayer {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, direction: Direction) -> &mut Option<DirectionalCipher> {
        match direction {
            Direction::Client => &mut self.client,
            Direction::Server => &mut self.server,
        }
    }

    /// Install fresh keys for `direction`; the sequence number restarts
    /// at zero.
    pub fn install(
        &mut self,
        direction: Direction,
        aead: AeadAlgorithm,
        keys: &TrafficKeys,
    ) -> Result<(), TlsError> {
        *self.slot(direction) = Some(DirectionalCipher::new(aead, keys)?);
        log::trace!("[KPIO TLS] {:?} record keys installed", direction);
        Ok(())
    }

    pub fn is_protected(&self, direction: Direction) -> bool {
        match direction {
            Direction::Client => self.client.is_some(),
            Direction::Server => self.server.is_some(),
        }
    }

    pub fn sequence_number(&self, direction: Direction) -> Option<u64> {
        match direction {
            Direction::Client => self.client.as_ref().map(|c| c.seq),
            Direction::Server => self.server.as_ref().map(|c| c.seq),
        }
    }

    /// Protect one fragment (at most 2^14 bytes) and return the full record.
    pub fn encrypt(
        &mut self,
        direction: Direction,
        plaintext: &[u8],
        content_type: ContentType,
        padding: RecordPadding,
    ) -> Result<Vec<u8>, TlsError> {
        if plaintext.len() > MAX_PLAINTEXT_LEN {
            return Err(TlsError::protocol(
                AlertDescription::InternalError,
                "fragment exceeds 2^14 bytes",
            ));
        }
        let cipher = self
            .slot(direction)
            .as_mut()
            .ok_or_else(|| TlsError::protocol(AlertDescription::InternalError, "no write key"))?;

        let pad = padding_len(padding, plaintext.len() + 1);
        let mut inner = Vec::with_capacity(plaintext.len() + 1 + pad + TAG_LEN);
        inner.extend_from_slice(plaintext);
        inner.push(content_type as u8);
        inner.resize(inner.len() + pad, 0);

        let sealed_len = inner.len() + cipher.aead.tag_len();
        let aad = header(ContentType::ApplicationData, LEGACY_VERSION, sealed_len);
        let nonce = cipher.next_nonce()?;
        let sealed = cipher.key.seal(&nonce, &aad, &inner);
        zeroize::Zeroize::zeroize(&mut inner);

        let mut out = Vec::with_capacity(HEADER_LEN + sealed.len());
        out.extend_from_slice(&aad);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Verify and decrypt a protected record body; returns the inner
    /// content type and content with padding removed.
    pub fn decrypt(
        &mut self,
        direction: Direction,
        ciphertext: &[u8],
    ) -> Result<(ContentType, Vec<u8>), TlsError> {
        if ciphertext.len() > MAX_CIPHERTEXT_LEN {
            return Err(TlsError::protocol(
                AlertDescription::RecordOverflow,
                "ciphertext exceeds 2^14 + 256 bytes",
            ));
        }
        let cipher = self
            .slot(direction)
            .as_mut()
            .ok_or_else(|| TlsError::unexpected("protected record before keys"))?;
        if ciphertext.len() < cipher.aead.tag_len() + 1 {
            return Err(TlsError::decode("protected record too short"));
        }
        let aad = header(ContentType::ApplicationData, LEGACY_VERSION, ciphertext.len());
        let nonce = cipher.next_nonce()?;
        let mut inner = cipher
            .key
            .open(&nonce, &aad, ciphertext)
            .map_err(|_| TlsError::crypto(AlertDescription::BadRecordMac, "record authentication failed"))?;

        if inner.len() > MAX_PLAINTEXT_LEN + 1 {
            return Err(TlsError::protocol(
                AlertDescription::RecordOverflow,
                "inner plaintext exceeds 2^14 + 1 bytes",
            ));
        }
        let type_pos = inner
            .iter()
            .rposition(|&b| b != 0)
            .ok_or_else(|| TlsError::unexpected("protected record without content type"))?;
        let content_type = ContentType::from_u8(inner[type_pos])
            .ok_or_else(|| TlsError::unexpected("unknown inner content type"))?;
        inner.truncate(type_pos);
        Ok((content_type, inner))
    }

    /// Drop all keys.
    pub fn clear(&mut self) {
        self.client = None;
        self.server = None;
    }
}
