//! Handshake message codec (RFC 8446 §4).
//!
//! Every message the client sends or receives can be both decoded and
//! encoded; the state machine only decodes server messages, the encoders
//! for those exist for scripted peers in tests and tools.

use alloc::string::String;
use alloc::vec::Vec;

use bitflags::bitflags;

use crate::alert::AlertDescription;
use crate::codec::{put_u16, put_u24, put_u32, put_u8, put_vec, LengthPrefix, Reader};
use crate::error::TlsError;

/// Fixed `random` of a HelloRetryRequest: SHA-256("HelloRetryRequest").
pub const HRR_RANDOM: [u8; 32] = [
    0xcf, 0x21, 0xad, 0x74, 0xe5, 0x9a, 0x61, 0x11, 0xbe, 0x1d, 0x8c, 0x02, 0x1e, 0x65, 0xb8, 0x91,
    0xc2, 0xa2, 0x11, 0x16, 0x7a, 0xbb, 0x8c, 0x5e, 0x07, 0x9e, 0x09, 0xe2, 0xc8, 0xa8, 0x33, 0x9c,
];

pub const TLS13_VERSION: u16 = 0x0304;
pub const LEGACY_VERSION: u16 = 0x0303;

/// Upper bound on one reassembled handshake message.
pub const MAX_HANDSHAKE_MESSAGE_LEN: usize = 1 << 17;

/// Ticket lifetimes above seven days are invalid (RFC 8446 §4.6.1).
pub const MAX_TICKET_LIFETIME: u32 = 604_800;

// Handshake types
pub const HS_CLIENT_HELLO: u8 = 1;
pub const HS_SERVER_HELLO: u8 = 2;
pub const HS_NEW_SESSION_TICKET: u8 = 4;
pub const HS_END_OF_EARLY_DATA: u8 = 5;
pub const HS_ENCRYPTED_EXTENSIONS: u8 = 8;
pub const HS_CERTIFICATE: u8 = 11;
pub const HS_CERTIFICATE_REQUEST: u8 = 13;
pub const HS_CERTIFICATE_VERIFY: u8 = 15;
pub const HS_FINISHED: u8 = 20;
pub const HS_KEY_UPDATE: u8 = 24;

// Extension types
pub const EXT_SERVER_NAME: u16 = 0;
pub const EXT_MAX_FRAGMENT_LENGTH: u16 = 1;
pub const EXT_STATUS_REQUEST: u16 = 5;
pub const EXT_SUPPORTED_GROUPS: u16 = 10;
pub const EXT_SIGNATURE_ALGORITHMS: u16 = 13;
pub const EXT_ALPN: u16 = 16;
pub const EXT_SCT: u16 = 18;
pub const EXT_PADDING: u16 = 21;
pub const EXT_PRE_SHARED_KEY: u16 = 41;
pub const EXT_EARLY_DATA: u16 = 42;
pub const EXT_SUPPORTED_VERSIONS: u16 = 43;
pub const EXT_COOKIE: u16 = 44;
pub const EXT_PSK_KEY_EXCHANGE_MODES: u16 = 45;
pub const EXT_CERTIFICATE_AUTHORITIES: u16 = 47;
pub const EXT_SIGNATURE_ALGORITHMS_CERT: u16 = 50;
pub const EXT_KEY_SHARE: u16 = 51;

bitflags! {
    /// Extensions this client recognises, used to detect duplicates and
    /// misplaced extensions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KnownExtensions: u32 {
        const SERVER_NAME = 1 << 0;
        const MAX_FRAGMENT_LENGTH = 1 << 1;
        const STATUS_REQUEST = 1 << 2;
        const SUPPORTED_GROUPS = 1 << 3;
        const SIGNATURE_ALGORITHMS = 1 << 4;
        const ALPN = 1 << 5;
        const SCT = 1 << 6;
        const PADDING = 1 << 7;
        const PRE_SHARED_KEY = 1 << 8;
        const EARLY_DATA = 1 << 9;
        const SUPPORTED_VERSIONS = 1 << 10;
        const COOKIE = 1 << 11;
        const PSK_KEY_EXCHANGE_MODES = 1 << 12;
        const CERTIFICATE_AUTHORITIES = 1 << 13;
        const SIGNATURE_ALGORITHMS_CERT = 1 << 14;
        const KEY_SHARE = 1 << 15;
    }
}

impl KnownExtensions {
    pub fn from_type(ext_type: u16) -> Option<Self> {
        Some(match ext_type {
            EXT_SERVER_NAME => Self::SERVER_NAME,
            EXT_MAX_FRAGMENT_LENGTH => Self::MAX_FRAGMENT_LENGTH,
            EXT_STATUS_REQUEST => Self::STATUS_REQUEST,
            EXT_SUPPORTED_GROUPS => Self::SUPPORTED_GROUPS,
            EXT_SIGNATURE_ALGORITHMS => Self::SIGNATURE_ALGORITHMS,
            EXT_ALPN => Self::ALPN,
            EXT_SCT => Self::SCT,
            EXT_PADDING => Self::PADDING,
            EXT_PRE_SHARED_KEY => Self::PRE_SHARED_KEY,
            EXT_EARLY_DATA => Self::EARLY_DATA,
            EXT_SUPPORTED_VERSIONS => Self::SUPPORTED_VERSIONS,
            EXT_COOKIE => Self::COOKIE,
            EXT_PSK_KEY_EXCHANGE_MODES => Self::PSK_KEY_EXCHANGE_MODES,
            EXT_CERTIFICATE_AUTHORITIES => Self::CERTIFICATE_AUTHORITIES,
            EXT_SIGNATURE_ALGORITHMS_CERT => Self::SIGNATURE_ALGORITHMS_CERT,
            EXT_KEY_SHARE => Self::KEY_SHARE,
            _ => return None,
        })
    }
}

/// One raw extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension<'a> {
    pub ext_type: u16,
    pub data: &'a [u8],
}

/// Split an extension block, rejecting any type that appears twice.
pub fn parse_extensions(block: &[u8]) -> Result<Vec<Extension<'_>>, TlsError> {
    let mut r = Reader::new(block);
    let mut seen = KnownExtensions::empty();
    let mut unknown_seen: Vec<u16> = Vec::new();
    let mut out = Vec::new();
    while !r.is_empty() {
        let ext_type = r.u16()?;
        let data = r.vec_u16()?;
        match KnownExtensions::from_type(ext_type) {
            Some(flag) => {
                if seen.contains(flag) {
                    return Err(TlsError::illegal("duplicate extension"));
                }
                seen |= flag;
            }
            None => {
                if unknown_seen.contains(&ext_type) {
                    return Err(TlsError::illegal("duplicate extension"));
                }
                unknown_seen.push(ext_type);
            }
        }
        out.push(Extension { ext_type, data });
    }
    Ok(out)
}

fn put_extension(buf: &mut Vec<u8>, ext_type: u16, body: impl FnOnce(&mut Vec<u8>)) {
    put_u16(buf, ext_type);
    put_vec(buf, LengthPrefix::U16, body);
}

/// Wrap a body in the 4-byte handshake header.
pub fn encode_message(msg_type: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + body.len());
    put_u8(&mut out, msg_type);
    put_u24(&mut out, body.len() as u32);
    out.extend_from_slice(body);
    out
}

// ── ClientHello ─────────────────────────────────────────────

/// `KeyShareEntry`: a group and its public value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyShareEntry {
    pub group: u16,
    pub key_exchange: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientHello {
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suites: Vec<u16>,
    pub server_name: Option<String>,
    pub supported_groups: Vec<u16>,
    pub signature_algorithms: Vec<u16>,
    pub supported_versions: Vec<u16>,
    pub key_shares: Vec<KeyShareEntry>,
    pub alpn: Vec<Vec<u8>>,
    pub cookie: Option<Vec<u8>>,
}

impl ClientHello {
    /// Full handshake message including header.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(512);
        put_u16(&mut body, LEGACY_VERSION);
        body.extend_from_slice(&self.random);
        put_vec(&mut body, LengthPrefix::U8, |b| b.extend_from_slice(&self.session_id));
        put_vec(&mut body, LengthPrefix::U16, |b| {
            for suite in &self.cipher_suites {
                put_u16(b, *suite);
            }
        });
        // legacy_compression_methods: null only
        put_vec(&mut body, LengthPrefix::U8, |b| put_u8(b, 0));

        put_vec(&mut body, LengthPrefix::U16, |exts| {
            if let Some(name) = &self.server_name {
                put_extension(exts, EXT_SERVER_NAME, |b| {
                    put_vec(b, LengthPrefix::U16, |b| {
                        put_u8(b, 0); // host_name
                        put_vec(b, LengthPrefix::U16, |b| b.extend_from_slice(name.as_bytes()));
                    });
                });
            }
            put_extension(exts, EXT_SUPPORTED_VERSIONS, |b| {
                put_vec(b, LengthPrefix::U8, |b| {
                    for v in &self.supported_versions {
                        put_u16(b, *v);
                    }
                });
            });
            put_extension(exts, EXT_SUPPORTED_GROUPS, |b| {
                put_vec(b, LengthPrefix::U16, |b| {
                    for g in &self.supported_groups {
                        put_u16(b, *g);
                    }
                });
            });
            put_extension(exts, EXT_SIGNATURE_ALGORITHMS, |b| {
                put_vec(b, LengthPrefix::U16, |b| {
                    for s in &self.signature_algorithms {
                        put_u16(b, *s);
                    }
                });
            });
            put_extension(exts, EXT_KEY_SHARE, |b| {
                put_vec(b, LengthPrefix::U16, |b| {
                    for share in &self.key_shares {
                        put_u16(b, share.group);
                        put_vec(b, LengthPrefix::U16, |b| b.extend_from_slice(&share.key_exchange));
                    }
                });
            });
            if !self.alpn.is_empty() {
                put_extension(exts, EXT_ALPN, |b| {
                    put_vec(b, LengthPrefix::U16, |b| {
                        for proto in &self.alpn {
                            put_vec(b, LengthPrefix::U8, |b| b.extend_from_slice(proto));
                        }
                    });
                });
            }
            if let Some(cookie) = &self.cookie {
                put_extension(exts, EXT_COOKIE, |b| {
                    put_vec(b, LengthPrefix::U16, |b| b.extend_from_slice(cookie));
                });
            }
        });
        encode_message(HS_CLIENT_HELLO, &body)
    }

    /// Decode a ClientHello body (without the handshake header).
    pub fn decode(body: &[u8]) -> Result<Self, TlsError> {
        let mut r = Reader::new(body);
        let _legacy_version = r.u16()?;
        let random = r.array::<32>()?;
        let session_id = r.vec_u8()?.to_vec();
        let mut suites = Reader::new(r.vec_u16()?);
        let mut cipher_suites = Vec::new();
        while !suites.is_empty() {
            cipher_suites.push(suites.u16()?);
        }
        let _compression = r.vec_u8()?;
        let mut hello = ClientHello {
            random,
            session_id,
            cipher_suites,
            ..Default::default()
        };
        let block = if r.is_empty() { &[][..] } else { r.vec_u16()? };
        r.finish()?;
        for ext in parse_extensions(block)? {
            let mut e = Reader::new(ext.data);
            match ext.ext_type {
                EXT_SERVER_NAME => {
                    let mut list = Reader::new(e.vec_u16()?);
                    while !list.is_empty() {
                        let name_type = list.u8()?;
                        let name = list.vec_u16()?;
                        if name_type == 0 {
                            hello.server_name = Some(
                                core::str::from_utf8(name)
                                    .map_err(|_| TlsError::decode("server name is not UTF-8"))?
                                    .into(),
                            );
                        }
                    }
                }
                EXT_SUPPORTED_VERSIONS => {
                    let mut list = Reader::new(e.vec_u8()?);
                    while !list.is_empty() {
                        hello.supported_versions.push(list.u16()?);
                    }
                }
                EXT_SUPPORTED_GROUPS => hello.supported_groups = u16_list(e.vec_u16()?)?,
                EXT_SIGNATURE_ALGORITHMS => hello.signature_algorithms = u16_list(e.vec_u16()?)?,
                EXT_KEY_SHARE => {
                    let mut list = Reader::new(e.vec_u16()?);
                    while !list.is_empty() {
                        let group = list.u16()?;
                        let key_exchange = list.vec_u16()?.to_vec();
                        hello.key_shares.push(KeyShareEntry { group, key_exchange });
                    }
                }
                EXT_ALPN => {
                    let mut list = Reader::new(e.vec_u16()?);
                    while !list.is_empty() {
                        hello.alpn.push(list.vec_u8()?.to_vec());
                    }
                }
                EXT_COOKIE => hello.cookie = Some(e.vec_u16()?.to_vec()),
                _ => continue,
            }
            e.finish()?;
        }
        Ok(hello)
    }
}

fn u16_list(data: &[u8]) -> Result<Vec<u16>, TlsError> {
    let mut r = Reader::new(data);
    let mut out = Vec::with_capacity(data.len() / 2);
    while !r.is_empty() {
        out.push(r.u16()?);
    }
    Ok(out)
}

// ── ServerHello / HelloRetryRequest ─────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerHello {
    pub random: [u8; 32],
    pub session_id_echo: Vec<u8>,
    pub cipher_suite: u16,
    pub compression_method: u8,
    pub selected_version: Option<u16>,
    /// Server share (ServerHello only).
    pub key_share: Option<KeyShareEntry>,
    /// Group the server asks for (HelloRetryRequest only).
    pub selected_group: Option<u16>,
    /// Cookie to echo (HelloRetryRequest only).
    pub cookie: Option<Vec<u8>>,
    /// Selected PSK identity, if the server claims one.
    pub pre_shared_key: Option<u16>,
}

impl ServerHello {
    pub fn is_retry_request(&self) -> bool {
        self.random == HRR_RANDOM
    }

    pub fn decode(body: &[u8]) -> Result<Self, TlsError> {
        let mut r = Reader::new(body);
        let legacy_version = r.u16()?;
        if legacy_version != LEGACY_VERSION {
            return Err(TlsError::negotiation(
                AlertDescription::ProtocolVersion,
                "ServerHello legacy_version is not 0x0303",
            ));
        }
        let mut hello = ServerHello {
            random: r.array::<32>()?,
            ..Default::default()
        };
        let retry = hello.is_retry_request();
        let session_id = r.vec_u8()?;
        if session_id.len() > 32 {
            return Err(TlsError::decode("session id longer than 32 bytes"));
        }
        hello.session_id_echo = session_id.to_vec();
        hello.cipher_suite = r.u16()?;
        hello.compression_method = r.u8()?;
        let block = r.vec_u16()?;
        r.finish()?;

        for ext in parse_extensions(block)? {
            let mut e = Reader::new(ext.data);
            match ext.ext_type {
                EXT_SUPPORTED_VERSIONS => hello.selected_version = Some(e.u16()?),
                EXT_KEY_SHARE if retry => hello.selected_group = Some(e.u16()?),
                EXT_KEY_SHARE => {
                    let group = e.u16()?;
                    let key_exchange = e.vec_u16()?.to_vec();
                    hello.key_share = Some(KeyShareEntry { group, key_exchange });
                }
                EXT_COOKIE if retry => {
                    let cookie = e.vec_u16()?;
                    if cookie.is_empty() {
                        return Err(TlsError::decode("empty cookie"));
                    }
                    hello.cookie = Some(cookie.to_vec());
                }
                EXT_PRE_SHARED_KEY if !retry => hello.pre_shared_key = Some(e.u16()?),
                other if KnownExtensions::from_type(other).is_some() => {
                    return Err(TlsError::illegal("extension not allowed in ServerHello"));
                }
                _ => {
                    return Err(TlsError::protocol(
                        AlertDescription::UnsupportedExtension,
                        "ServerHello carries an extension the client did not offer",
                    ));
                }
            }
            e.finish()?;
        }
        Ok(hello)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(128);
        put_u16(&mut body, LEGACY_VERSION);
        body.extend_from_slice(&self.random);
        put_vec(&mut body, LengthPrefix::U8, |b| b.extend_from_slice(&self.session_id_echo));
        put_u16(&mut body, self.cipher_suite);
        put_u8(&mut body, self.compression_method);
        put_vec(&mut body, LengthPrefix::U16, |exts| {
            if let Some(share) = &self.key_share {
                put_extension(exts, EXT_KEY_SHARE, |b| {
                    put_u16(b, share.group);
                    put_vec(b, LengthPrefix::U16, |b| b.extend_from_slice(&share.key_exchange));
                });
            }
            if let Some(group) = self.selected_group {
                put_extension(exts, EXT_KEY_SHARE, |b| put_u16(b, group));
            }
            if let Some(cookie) = &self.cookie {
                put_extension(exts, EXT_COOKIE, |b| {
                    put_vec(b, LengthPrefix::U16, |b| b.extend_from_slice(cookie));
                });
            }
            if let Some(version) = self.selected_version {
                put_extension(exts, EXT_SUPPORTED_VERSIONS, |b| put_u16(b, version));
            }
        });
        encode_message(HS_SERVER_HELLO, &body)
    }
}

// ── EncryptedExtensions ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EncryptedExtensions {
    /// The single protocol the server selected.
    pub alpn: Option<Vec<u8>>,
    /// The server acknowledged our SNI with an empty `server_name`.
    pub server_name_ack: bool,
    pub early_data: bool,
}

impl EncryptedExtensions {
    pub fn decode(body: &[u8]) -> Result<Self, TlsError> {
        let mut r = Reader::new(body);
        let block = r.vec_u16()?;
        r.finish()?;
        let mut ee = EncryptedExtensions::default();
        for ext in parse_extensions(block)? {
            let mut e = Reader::new(ext.data);
            match ext.ext_type {
                EXT_SERVER_NAME => {
                    if !ext.data.is_empty() {
                        return Err(TlsError::decode("server_name acknowledgement must be empty"));
                    }
                    ee.server_name_ack = true;
                }
                EXT_ALPN => {
                    let mut list = Reader::new(e.vec_u16()?);
                    let proto = list.vec_u8()?;
                    list.finish().map_err(|_| {
                        TlsError::illegal("server selected more than one ALPN protocol")
                    })?;
                    if proto.is_empty() {
                        return Err(TlsError::decode("empty ALPN protocol name"));
                    }
                    ee.alpn = Some(proto.to_vec());
                }
                EXT_EARLY_DATA => ee.early_data = true,
                EXT_KEY_SHARE
                | EXT_SUPPORTED_VERSIONS
                | EXT_PRE_SHARED_KEY
                | EXT_COOKIE
                | EXT_PSK_KEY_EXCHANGE_MODES
                | EXT_SIGNATURE_ALGORITHMS
                | EXT_SIGNATURE_ALGORITHMS_CERT
                | EXT_CERTIFICATE_AUTHORITIES
                | EXT_STATUS_REQUEST
                | EXT_SCT
                | EXT_PADDING => {
                    return Err(TlsError::illegal("extension not allowed in EncryptedExtensions"));
                }
                // unknown extensions are ignored
                _ => continue,
            }
            e.finish()?;
        }
        Ok(ee)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        put_vec(&mut body, LengthPrefix::U16, |exts| {
            if self.server_name_ack {
                put_extension(exts, EXT_SERVER_NAME, |_| {});
            }
            if let Some(proto) = &self.alpn {
                put_extension(exts, EXT_ALPN, |b| {
                    put_vec(b, LengthPrefix::U16, |b| {
                        put_vec(b, LengthPrefix::U8, |b| b.extend_from_slice(proto));
                    });
                });
            }
            if self.early_data {
                put_extension(exts, EXT_EARLY_DATA, |_| {});
            }
        });
        encode_message(HS_ENCRYPTED_EXTENSIONS, &body)
    }
}

// ── Certificate ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateEntry {
    pub cert_data: Vec<u8>,
    pub extensions: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Certificate {
    pub context: Vec<u8>,
    pub entries: Vec<CertificateEntry>,
}

impl Certificate {
    pub fn decode(body: &[u8]) -> Result<Self, TlsError> {
        let mut r = Reader::new(body);
        let context = r.vec_u8()?.to_vec();
        let mut list = Reader::new(r.vec_u24()?);
        r.finish()?;
        let mut entries = Vec::new();
        while !list.is_empty() {
            let cert_data = list.vec_u24()?;
            if cert_data.is_empty() {
                return Err(TlsError::decode("empty certificate entry"));
            }
            let extensions = list.vec_u16()?;
            // entry extensions (OCSP, SCT) are parsed only for well-formedness
            parse_extensions(extensions)?;
            entries.push(CertificateEntry {
                cert_data: cert_data.to_vec(),
                extensions: extensions.to_vec(),
            });
        }
        Ok(Certificate { context, entries })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        put_vec(&mut body, LengthPrefix::U8, |b| b.extend_from_slice(&self.context));
        put_vec(&mut body, LengthPrefix::U24, |b| {
            for entry in &self.entries {
                put_vec(b, LengthPrefix::U24, |b| b.extend_from_slice(&entry.cert_data));
                put_vec(b, LengthPrefix::U16, |b| b.extend_from_slice(&entry.extensions));
            }
        });
        encode_message(HS_CERTIFICATE, &body)
    }
}

// ── CertificateRequest ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CertificateRequest {
    pub context: Vec<u8>,
    pub signature_algorithms: Vec<u16>,
}

impl CertificateRequest {
    pub fn decode(body: &[u8]) -> Result<Self, TlsError> {
        let mut r = Reader::new(body);
        let context = r.vec_u8()?.to_vec();
        let block = r.vec_u16()?;
        r.finish()?;
        let mut req = CertificateRequest {
            context,
            signature_algorithms: Vec::new(),
        };
        let mut have_sigalgs = false;
        for ext in parse_extensions(block)? {
            if ext.ext_type == EXT_SIGNATURE_ALGORITHMS {
                let mut e = Reader::new(ext.data);
                req.signature_algorithms = u16_list(e.vec_u16()?)?;
                e.finish()?;
                have_sigalgs = true;
            }
        }
        if !have_sigalgs {
            return Err(TlsError::protocol(
                AlertDescription::MissingExtension,
                "CertificateRequest without signature_algorithms",
            ));
        }
        Ok(req)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        put_vec(&mut body, LengthPrefix::U8, |b| b.extend_from_slice(&self.context));
        put_vec(&mut body, LengthPrefix::U16, |exts| {
            put_extension(exts, EXT_SIGNATURE_ALGORITHMS, |b| {
                put_vec(b, LengthPrefix::U16, |b| {
                    for s in &self.signature_algorithms {
                        put_u16(b, *s);
                    }
                });
            });
        });
        encode_message(HS_CERTIFICATE_REQUEST, &body)
    }
}

// ── CertificateVerify ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateVerify {
    pub scheme: u16,
    pub signature: Vec<u8>,
}

impl CertificateVerify {
    pub fn decode(body: &[u8]) -> Result<Self, TlsError> {
        let mut r = Reader::new(body);
        let scheme = r.u16()?;
        let signature = r.vec_u16()?.to_vec();
        r.finish()?;
        Ok(CertificateVerify { scheme, signature })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(4 + self.signature.len());
        put_u16(&mut body, self.scheme);
        put_vec(&mut body, LengthPrefix::U16, |b| b.extend_from_slice(&self.signature));
        encode_message(HS_CERTIFICATE_VERIFY, &body)
    }
}

/// Context string of a server CertificateVerify.
pub const SERVER_SIGNATURE_CONTEXT: &[u8] = b"TLS 1.3, server CertificateVerify";

/// The content covered by a CertificateVerify signature (RFC 8446 §4.4.3):
/// 64 spaces, the context string, a zero byte, then the transcript hash.
pub fn signed_content(context: &[u8], transcript_hash: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + context.len() + 1 + transcript_hash.len());
    out.resize(64, 0x20);
    out.extend_from_slice(context);
    out.push(0);
    out.extend_from_slice(transcript_hash);
    out
}

// ── Finished ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub verify_data: Vec<u8>,
}

impl Finished {
    pub fn decode(body: &[u8]) -> Result<Self, TlsError> {
        if body.is_empty() {
            return Err(TlsError::decode("empty Finished"));
        }
        Ok(Finished {
            verify_data: body.to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_message(HS_FINISHED, &self.verify_data)
    }
}

// ── NewSessionTicket ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSessionTicketMessage {
    pub lifetime: u32,
    pub age_add: u32,
    pub nonce: Vec<u8>,
    pub ticket: Vec<u8>,
    pub max_early_data: Option<u32>,
}

impl NewSessionTicketMessage {
    pub fn decode(body: &[u8]) -> Result<Self, TlsError> {
        let mut r = Reader::new(body);
        let lifetime = r.u32()?;
        if lifetime > MAX_TICKET_LIFETIME {
            return Err(TlsError::illegal("ticket lifetime exceeds seven days"));
        }
        let age_add = r.u32()?;
        let nonce = r.vec_u8()?.to_vec();
        let ticket = r.vec_u16()?;
        if ticket.is_empty() {
            return Err(TlsError::decode("empty session ticket"));
        }
        let block = r.vec_u16()?;
        r.finish()?;
        let mut max_early_data = None;
        for ext in parse_extensions(block)? {
            if ext.ext_type == EXT_EARLY_DATA {
                let mut e = Reader::new(ext.data);
                max_early_data = Some(e.u32()?);
                e.finish()?;
            }
        }
        Ok(NewSessionTicketMessage {
            lifetime,
            age_add,
            nonce,
            ticket: ticket.to_vec(),
            max_early_data,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        put_u32(&mut body, self.lifetime);
        put_u32(&mut body, self.age_add);
        put_vec(&mut body, LengthPrefix::U8, |b| b.extend_from_slice(&self.nonce));
        put_vec(&mut body, LengthPrefix::U16, |b| b.extend_from_slice(&self.ticket));
        put_vec(&mut body, LengthPrefix::U16, |exts| {
            if let Some(max) = self.max_early_data {
                put_extension(exts, EXT_EARLY_DATA, |b| put_u32(b, max));
            }
        });
        encode_message(HS_NEW_SESSION_TICKET, &body)
    }
}

// ── KeyUpdate ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyUpdate {
    pub update_requested: bool,
}

impl KeyUpdate {
    pub fn decode(body: &[u8]) -> Result<Self, TlsError> {
        match body {
            [0] => Ok(KeyUpdate { update_requested: false }),
            [1] => Ok(KeyUpdate { update_requested: true }),
            [_] => Err(TlsError::illegal("invalid KeyUpdate request value")),
            _ => Err(TlsError::decode("KeyUpdate must be one byte")),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_message(HS_KEY_UPDATE, &[self.update_requested as u8])
    }
}

// ── Tagged message ──────────────────────────────────────────

/// A decoded server handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeMessage {
    ServerHello(ServerHello),
    EncryptedExtensions(EncryptedExtensions),
    Certificate(Certificate),
    CertificateRequest(CertificateRequest),
    CertificateVerify(CertificateVerify),
    Finished(Finished),
    NewSessionTicket(NewSessionTicketMessage),
    KeyUpdate(KeyUpdate),
}

impl HandshakeMessage {
    /// Decode a server message from its type and body.
    pub fn decode(msg_type: u8, body: &[u8]) -> Result<Self, TlsError> {
        Ok(match msg_type {
            HS_SERVER_HELLO => HandshakeMessage::ServerHello(ServerHello::decode(body)?),
            HS_ENCRYPTED_EXTENSIONS => {
                HandshakeMessage::EncryptedExtensions(EncryptedExtensions::decode(body)?)
            }
            HS_CERTIFICATE => HandshakeMessage::Certificate(Certificate::decode(body)?),
            HS_CERTIFICATE_REQUEST => {
                HandshakeMessage::CertificateRequest(CertificateRequest::decode(body)?)
            }
            HS_CERTIFICATE_VERIFY => {
                HandshakeMessage::CertificateVerify(CertificateVerify::decode(body)?)
            }
            HS_FINISHED => HandshakeMessage::Finished(Finished::decode(body)?),
            HS_NEW_SESSION_TICKET => {
                HandshakeMessage::NewSessionTicket(NewSessionTicketMessage::decode(body)?)
            }
            HS_KEY_UPDATE => HandshakeMessage::KeyUpdate(KeyUpdate::decode(body)?),
            _ => return Err(TlsError::unexpected("unexpected handshake message type")),
        })
    }

    /// Decode a full message (header + body).
    pub fn decode_message(raw: &[u8]) -> Result<Self, TlsError> {
        let mut r = Reader::new(raw);
        let msg_type = r.u8()?;
        let body = r.vec_u24()?;
        r.finish()?;
        Self::decode(msg_type, body)
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            HandshakeMessage::ServerHello(m) => m.encode(),
            HandshakeMessage::EncryptedExtensions(m) => m.encode(),
            HandshakeMessage::Certificate(m) => m.encode(),
            HandshakeMessage::CertificateRequest(m) => m.encode(),
            HandshakeMessage::CertificateVerify(m) => m.encode(),
            HandshakeMessage::Finished(m) => m.encode(),
            HandshakeMessage::NewSessionTicket(m) => m.encode(),
            HandshakeMessage::KeyUpdate(m) => m.encode(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HandshakeMessage::ServerHello(m) if m.is_retry_request() => "HelloRetryRequest",
            HandshakeMessage::ServerHello(_) => "ServerHello",
            HandshakeMessage::EncryptedExtensions(_) => "EncryptedExtensions",
            HandshakeMessage::Certificate(_) => "Certificate",
            HandshakeMessage::CertificateRequest(_) => "CertificateRequest",
            HandshakeMessage::CertificateVerify(_) => "CertificateVerify",
            HandshakeMessage::Finished(_) => "Finished",
            HandshakeMessage::NewSessionTicket(_) => "NewSessionTicket",
            HandshakeMessage::KeyUpdate(_) => "KeyUpdate",
        }
    }
}

// ── Reassembly ──────────────────────────────────────────────

/// Joins handshake records into whole messages: one message may span
/// records and one record may hold several messages.
#[derive(Debug, Default)]
pub struct HandshakeJoiner {
    buf: Vec<u8>,
}

impl HandshakeJoiner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: &[u8]) {
        self.buf.extend_from_slice(fragment);
    }

    /// No partial message is pending.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Next whole message as raw wire bytes (header included).
    pub fn next_message(&mut self) -> Result<Option<Vec<u8>>, TlsError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let len = ((self.buf[1] as usize) << 16) | ((self.buf[2] as usize) << 8) | self.buf[3] as usize;
        if len > MAX_HANDSHAKE_MESSAGE_LEN {
            return Err(TlsError::decode("handshake message too large"));
        }
        if self.buf.len() < 4 + len {
            return Ok(None);
        }
        let raw: Vec<u8> = self.buf.drain(..4 + len).collect();
        Ok(Some(raw))
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_client_hello() -> ClientHello {
        ClientHello {
            random: [0x11; 32],
            session_id: alloc::vec![0x22; 32],
            cipher_suites: alloc::vec![0x1301, 0x1303],
            server_name: Some("example.com".into()),
            supported_groups: alloc::vec![0x001d, 0x0017],
            signature_algorithms: alloc::vec![0x0403, 0x0804],
            supported_versions: alloc::vec![TLS13_VERSION],
            key_shares: alloc::vec![KeyShareEntry { group: 0x001d, key_exchange: alloc::vec![9; 32] }],
            alpn: alloc::vec![b"h2".to_vec()],
            cookie: None,
        }
    }

    #[test]
    fn test_client_hello_decodes_what_it_encodes() {
        let hello = sample_client_hello();
        let wire = hello.encode();
        assert_eq!(wire[0], HS_CLIENT_HELLO);
        assert_eq!(ClientHello::decode(&wire[4..]).unwrap(), hello);
    }

    #[test]
    fn test_rfc8448_server_hello() {
        let body = hex_literal::hex!(
            "0303a6af06a4121860dc5e6e60249cd34c95930c8ac5cb1434dac155772ed3e2"
            "69280013010000 2e00330024001d0020c9828876112095fe66762bdbf7c672e1"
            "56d6cc253b833df1dd69b1b04e751f0f002b00020304"
        );
        let sh = ServerHello::decode(&body).unwrap();
        assert!(!sh.is_retry_request());
        assert_eq!(sh.cipher_suite, 0x1301);
        assert_eq!(sh.selected_version, Some(TLS13_VERSION));
        let share = sh.key_share.unwrap();
        assert_eq!(share.group, 0x001d);
        assert_eq!(share.key_exchange.len(), 32);
    }

    #[test]
    fn test_server_hello_extension_rules() {
        let mut sh = ServerHello {
            random: [1; 32],
            cipher_suite: 0x1301,
            selected_version: Some(TLS13_VERSION),
            ..Default::default()
        };
        let mut wire = sh.encode();
        assert!(HandshakeMessage::decode_message(&wire).is_ok());

        // unknown extension appended -> unsupported_extension
        let ext_start = 4 + 2 + 32 + 1 + 2 + 1;
        wire.extend_from_slice(&[0xfe, 0xfe, 0x00, 0x00]);
        let ext_len = u16::from_be_bytes([wire[ext_start], wire[ext_start + 1]]) + 4;
        wire[ext_start..ext_start + 2].copy_from_slice(&ext_len.to_be_bytes());
        let body_len = (wire.len() - 4) as u32;
        wire[1..4].copy_from_slice(&body_len.to_be_bytes()[1..]);
        let err = HandshakeMessage::decode_message(&wire).unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::UnsupportedExtension));

        // cookie outside a HelloRetryRequest is misplaced
        sh.cookie = Some(alloc::vec![1]);
        let err = HandshakeMessage::decode_message(&sh.encode()).unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::IllegalParameter));
    }

    #[test]
    fn test_duplicate_extension_rejected() {
        let block = [0x00, 0x2b, 0x00, 0x02, 0x03, 0x04, 0x00, 0x2b, 0x00, 0x02, 0x03, 0x04];
        let err = parse_extensions(&block).unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::IllegalParameter));
        let unknown = [0x12, 0x34, 0x00, 0x00, 0x12, 0x34, 0x00, 0x00];
        assert!(parse_extensions(&unknown).is_err());
    }

    #[test]
    fn test_encrypted_extensions_alpn() {
        let ee = EncryptedExtensions {
            alpn: Some(b"h2".to_vec()),
            server_name_ack: true,
            early_data: false,
        };
        assert_eq!(EncryptedExtensions::decode(&ee.encode()[4..]).unwrap(), ee);

        // two protocols selected
        let body = [0x00, 0x0c, 0x00, 0x10, 0x00, 0x08, 0x00, 0x06, 0x02, b'h', b'2', 0x02, b'h', b'3'];
        let err = EncryptedExtensions::decode(&body).unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::IllegalParameter));

        // unknown extension ignored
        let body = [0x00, 0x05, 0xab, 0xcd, 0x00, 0x01, 0x00];
        assert_eq!(EncryptedExtensions::decode(&body).unwrap(), EncryptedExtensions::default());
    }

    #[test]
    fn test_key_update_values() {
        assert!(KeyUpdate::decode(&[1]).unwrap().update_requested);
        assert!(KeyUpdate::decode(&[2]).is_err());
        assert!(KeyUpdate::decode(&[]).is_err());
    }

    #[test]
    fn test_ticket_lifetime_limit() {
        let mut nst = NewSessionTicketMessage {
            lifetime: MAX_TICKET_LIFETIME,
            age_add: 7,
            nonce: alloc::vec![0],
            ticket: alloc::vec![1, 2, 3],
            max_early_data: None,
        };
        assert_eq!(NewSessionTicketMessage::decode(&nst.encode()[4..]).unwrap(), nst);
        nst.lifetime += 1;
        assert!(NewSessionTicketMessage::decode(&nst.encode()[4..]).is_err());
    }

    #[test]
    fn test_joiner_splits_and_joins() {
        let a = Finished { verify_data: alloc::vec![1; 32] }.encode();
        let b = KeyUpdate { update_requested: false }.encode();
        let mut joined = a.clone();
        joined.extend_from_slice(&b);

        let mut j = HandshakeJoiner::new();
        j.push(&joined[..10]);
        assert_eq!(j.next_message().unwrap(), None);
        j.push(&joined[10..]);
        assert_eq!(j.next_message().unwrap().unwrap(), a);
        assert_eq!(j.next_message().unwrap().unwrap(), b);
        assert!(j.is_empty());
    }

    #[test]
    fn test_signed_content_layout() {
        let content = signed_content(SERVER_SIGNATURE_CONTEXT, &[0xaa; 32]);
        assert_eq!(content.len(), 64 + 33 + 1 + 32);
        assert!(content[..64].iter().all(|&b| b == 0x20));
        assert_eq!(content[64 + 33], 0);
    }
}
