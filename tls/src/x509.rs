//! X.509 v3 certificate parsing (RFC 5280).
//!
//! Extracts just what chain validation needs: the signed TBS bytes, the
//! signature, raw issuer/subject names for linkage, validity, the subject
//! public key, subjectAltName entries and basic constraints. Everything
//! borrows from the DER input.

use alloc::vec::Vec;
use core::net::IpAddr;

use crate::der::{self, DerError, DerReader};
use crate::suites::SignatureScheme;
use crate::verify::PublicKey;

// ── OIDs (DER content octets) ───────────────────────────────

const OID_RSA_ENCRYPTION: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01];
const OID_RSASSA_PSS: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0a];
const OID_SHA256_WITH_RSA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0b];
const OID_SHA384_WITH_RSA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0c];
const OID_SHA512_WITH_RSA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0d];
const OID_EC_PUBLIC_KEY: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01];
const OID_PRIME256V1: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];
const OID_ECDSA_SHA256: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x02];
const OID_ED25519: &[u8] = &[0x2b, 0x65, 0x70];
const OID_SHA256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];
const OID_SHA384: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x02];
const OID_SHA512: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x03];

const OID_COMMON_NAME: &[u8] = &[0x55, 0x04, 0x03];

const OID_SUBJECT_KEY_ID: &[u8] = &[0x55, 0x1d, 0x0e];
const OID_KEY_USAGE: &[u8] = &[0x55, 0x1d, 0x0f];
const OID_SUBJECT_ALT_NAME: &[u8] = &[0x55, 0x1d, 0x11];
const OID_BASIC_CONSTRAINTS: &[u8] = &[0x55, 0x1d, 0x13];
const OID_CERTIFICATE_POLICIES: &[u8] = &[0x55, 0x1d, 0x20];
const OID_AUTHORITY_KEY_ID: &[u8] = &[0x55, 0x1d, 0x23];
const OID_EXT_KEY_USAGE: &[u8] = &[0x55, 0x1d, 0x25];

/// Extensions understood well enough that a critical flag is acceptable.
const HANDLED_EXTENSIONS: &[&[u8]] = &[
    OID_SUBJECT_KEY_ID,
    OID_KEY_USAGE,
    OID_SUBJECT_ALT_NAME,
    OID_BASIC_CONSTRAINTS,
    OID_CERTIFICATE_POLICIES,
    OID_AUTHORITY_KEY_ID,
    OID_EXT_KEY_USAGE,
];

// GeneralName choices
const SAN_DNS_NAME: u8 = der::implicit(2);
const SAN_IP_ADDRESS: u8 = der::implicit(7);

/// Parsed X.509 certificate.
#[derive(Debug, Clone)]
pub struct X509Certificate<'a> {
    /// DER of `tbsCertificate`, the bytes the issuer signed.
    pub tbs: &'a [u8],
    /// Signature algorithm, `None` if not one this client verifies.
    pub signature_scheme: Option<SignatureScheme>,
    pub signature: &'a [u8],
    /// Raw `Name` encodings, compared byte-for-byte for chain linkage.
    pub issuer: &'a [u8],
    pub subject: &'a [u8],
    /// Validity window in seconds since the Unix epoch.
    pub not_before: u64,
    pub not_after: u64,
    /// Subject key, `None` if the algorithm is unsupported.
    pub public_key: Option<PublicKey>,
    pub common_name: Option<&'a str>,
    pub dns_names: Vec<&'a str>,
    pub ip_addresses: Vec<&'a [u8]>,
    pub is_ca: bool,
    pub path_len: Option<u8>,
}

impl<'a> X509Certificate<'a> {
    /// Parse one DER certificate.
    pub fn from_der(input: &'a [u8]) -> Result<Self, DerError> {
        let mut outer = DerReader::new(input);
        let mut cert = outer.sequence()?;
        outer.finish()?;

        let tbs_tlv = cert.read(der::SEQUENCE)?;
        let outer_alg = cert.read(der::SEQUENCE)?;
        let signature = cert.bit_string()?;
        cert.finish()?;

        let mut tbs = DerReader::new(tbs_tlv.value);
        if let Some(version) = tbs.read_optional(der::explicit(0))? {
            // v3 only; v1 certificates cannot carry the extensions we rely on
            if version.value != [der::INTEGER, 0x01, 0x02] {
                return Err(DerError("unsupported certificate version"));
            }
        }
        let _serial = tbs.read(der::INTEGER)?;
        let inner_alg = tbs.read(der::SEQUENCE)?;
        if inner_alg.raw != outer_alg.raw {
            return Err(DerError("signature algorithm mismatch"));
        }
        let issuer = tbs.read(der::SEQUENCE)?;
        let (not_before, not_after) = parse_validity(&mut tbs.sequence()?)?;
        let subject = tbs.read(der::SEQUENCE)?;
        let public_key = parse_spki(&mut tbs.sequence()?)?;
        let _issuer_uid = tbs.read_optional(der::implicit(1))?;
        let _subject_uid = tbs.read_optional(der::implicit(2))?;

        let mut parsed = X509Certificate {
            tbs: tbs_tlv.raw,
            signature_scheme: parse_signature_algorithm(outer_alg.value)?,
            signature,
            issuer: issuer.raw,
            subject: subject.raw,
            not_before,
            not_after,
            public_key,
            common_name: common_name(subject.value)?,
            dns_names: Vec::new(),
            ip_addresses: Vec::new(),
            is_ca: false,
            path_len: None,
        };

        if let Some(extensions) = tbs.read_optional(der::explicit(3))? {
            let mut list = DerReader::new(extensions.value);
            let mut list = list.sequence()?;
            while !list.is_empty() {
                parsed.parse_extension(&mut list.sequence()?)?;
            }
        }
        tbs.finish()?;
        Ok(parsed)
    }

    fn parse_extension(&mut self, ext: &mut DerReader<'a>) -> Result<(), DerError> {
        let oid = ext.read(der::OID)?.value;
        let critical = match ext.read_optional(der::BOOLEAN)? {
            Some(flag) => flag.value == [0xff],
            None => false,
        };
        let value = ext.read(der::OCTET_STRING)?.value;
        ext.finish()?;

        match oid {
            OID_SUBJECT_ALT_NAME => {
                let mut names = DerReader::new(value).sequence()?;
                while !names.is_empty() {
                    let name = names.read_any()?;
                    match name.tag {
                        SAN_DNS_NAME => self.dns_names.push(
                            core::str::from_utf8(name.value)
                                .map_err(|_| DerError("dNSName is not ASCII"))?,
                        ),
                        SAN_IP_ADDRESS => self.ip_addresses.push(name.value),
                        _ => {}
                    }
                }
            }
            OID_BASIC_CONSTRAINTS => {
                let mut bc = DerReader::new(value).sequence()?;
                if let Some(ca) = bc.read_optional(der::BOOLEAN)? {
                    self.is_ca = ca.value == [0xff];
                }
                if bc.peek_tag() == Some(der::INTEGER) {
                    let len = bc.unsigned_integer()?;
                    self.path_len = match len {
                        [n] => Some(*n),
                        _ => Some(u8::MAX),
                    };
                }
                bc.finish()?;
            }
            other if critical && !HANDLED_EXTENSIONS.iter().any(|h| *h == other) => {
                return Err(DerError("unsupported critical extension"));
            }
            _ => {}
        }
        Ok(())
    }

    /// Whether the certificate is valid at `now` (Unix seconds).
    pub fn is_valid_at(&self, now: u64) -> bool {
        self.not_before <= now && now <= self.not_after
    }

    pub fn is_self_issued(&self) -> bool {
        self.issuer == self.subject
    }

    /// Match a server name against subjectAltName, falling back to the
    /// subject CN only when the certificate carries no DNS names.
    pub fn matches_server_name(&self, server_name: &str) -> bool {
        if let Ok(ip) = server_name.parse::<IpAddr>() {
            return self.ip_addresses.iter().any(|addr| match ip {
                IpAddr::V4(v4) => *addr == v4.octets(),
                IpAddr::V6(v6) => *addr == v6.octets(),
            });
        }
        if !self.dns_names.is_empty() {
            return self.dns_names.iter().any(|pattern| dns_name_matches(pattern, server_name));
        }
        self.common_name
            .is_some_and(|cn| dns_name_matches(cn, server_name))
    }
}

/// Case-insensitive match with an optional leftmost-label wildcard.
pub fn dns_name_matches(pattern: &str, host: &str) -> bool {
    let host = host.strip_suffix('.').unwrap_or(host);
    let pattern = pattern.strip_suffix('.').unwrap_or(pattern);
    if host.is_empty() || pattern.is_empty() {
        return false;
    }
    match pattern.strip_prefix("*.") {
        Some(suffix) => {
            // `*.com` style patterns are too broad to honour
            if !suffix.contains('.') {
                return false;
            }
            match host.split_once('.') {
                Some((label, rest)) => !label.is_empty() && rest.eq_ignore_ascii_case(suffix),
                None => false,
            }
        }
        None => pattern.eq_ignore_ascii_case(host),
    }
}

fn parse_signature_algorithm(alg: &[u8]) -> Result<Option<SignatureScheme>, DerError> {
    let mut r = DerReader::new(alg);
    let oid = r.read(der::OID)?.value;
    Ok(match oid {
        OID_SHA256_WITH_RSA => Some(SignatureScheme::RsaPkcs1Sha256),
        OID_SHA384_WITH_RSA => Some(SignatureScheme::RsaPkcs1Sha384),
        OID_SHA512_WITH_RSA => Some(SignatureScheme::RsaPkcs1Sha512),
        OID_ECDSA_SHA256 => Some(SignatureScheme::EcdsaSecp256r1Sha256),
        OID_ED25519 => Some(SignatureScheme::Ed25519),
        OID_RSASSA_PSS => pss_scheme(&mut r.sequence()?)?,
        _ => None,
    })
}

/// RSASSA-PSS-params; only MGF1 with the same hash and a salt equal to
/// the digest length maps onto a TLS scheme.
fn pss_scheme(params: &mut DerReader<'_>) -> Result<Option<SignatureScheme>, DerError> {
    let Some(hash) = params.read_optional(der::explicit(0))? else {
        // SHA-1 default
        return Ok(None);
    };
    let hash_oid = DerReader::new(hash.value).sequence()?.read(der::OID)?.value;
    let (scheme, digest_len) = match hash_oid {
        OID_SHA256 => (SignatureScheme::RsaPssRsaeSha256, 32u8),
        OID_SHA384 => (SignatureScheme::RsaPssRsaeSha384, 48),
        OID_SHA512 => (SignatureScheme::RsaPssRsaeSha512, 64),
        _ => return Ok(None),
    };
    let _mgf = params.read_optional(der::explicit(1))?;
    let salt_len = match params.read_optional(der::explicit(2))? {
        Some(salt) => match DerReader::new(salt.value).unsigned_integer()? {
            [n] => *n,
            _ => return Ok(None),
        },
        None => 20,
    };
    Ok((salt_len == digest_len).then_some(scheme))
}

fn parse_spki(spki: &mut DerReader<'_>) -> Result<Option<PublicKey>, DerError> {
    let mut alg = spki.sequence()?;
    let key = spki.bit_string()?;
    spki.finish()?;

    let oid = alg.read(der::OID)?.value;
    Ok(match oid {
        OID_RSA_ENCRYPTION => {
            let mut rsa = DerReader::new(key).sequence()?;
            let modulus = rsa.unsigned_integer()?.to_vec();
            let exponent = rsa.unsigned_integer()?.to_vec();
            rsa.finish()?;
            Some(PublicKey::Rsa { modulus, exponent })
        }
        OID_EC_PUBLIC_KEY => {
            let curve = alg.read(der::OID)?.value;
            (curve == OID_PRIME256V1 && key.len() == 65 && key[0] == 0x04)
                .then(|| PublicKey::EcdsaP256(key.to_vec()))
        }
        OID_ED25519 => {
            let key: [u8; 32] = key.try_into().map_err(|_| DerError("Ed25519 key length"))?;
            Some(PublicKey::Ed25519(key))
        }
        _ => None,
    })
}

fn common_name(name: &[u8]) -> Result<Option<&str>, DerError> {
    let mut rdns = DerReader::new(name);
    while !rdns.is_empty() {
        let mut set = DerReader::new(rdns.read(der::SET)?.value);
        while !set.is_empty() {
            let mut atv = set.sequence()?;
            if atv.read(der::OID)?.value == OID_COMMON_NAME {
                let value = atv.read_any()?;
                return match value.tag {
                    der::UTF8_STRING | der::PRINTABLE_STRING | der::IA5_STRING | der::T61_STRING => {
                        Ok(core::str::from_utf8(value.value).ok())
                    }
                    _ => Ok(None),
                };
            }
        }
    }
    Ok(None)
}

fn parse_validity(validity: &mut DerReader<'_>) -> Result<(u64, u64), DerError> {
    let not_before = parse_time(validity)?;
    let not_after = parse_time(validity)?;
    validity.finish()?;
    Ok((not_before, not_after))
}

fn parse_time(r: &mut DerReader<'_>) -> Result<u64, DerError> {
    let tlv = r.read_any()?;
    let (year, rest) = match (tlv.tag, tlv.value.len()) {
        (der::UTC_TIME, 13) => {
            let yy = digits(&tlv.value[..2])?;
            (if yy >= 50 { 1900 + yy } else { 2000 + yy }, &tlv.value[2..])
        }
        (der::GENERALIZED_TIME, 15) => (digits(&tlv.value[..4])?, &tlv.value[4..]),
        _ => return Err(DerError("unsupported time encoding")),
    };
    if rest[10] != b'Z' {
        return Err(DerError("time is not UTC"));
    }
    let month = digits(&rest[0..2])?;
    let day = digits(&rest[2..4])?;
    let hour = digits(&rest[4..6])?;
    let minute = digits(&rest[6..8])?;
    let second = digits(&rest[8..10])?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) || hour > 23 || minute > 59 || second > 60 {
        return Err(DerError("time out of range"));
    }
    if year < 1970 {
        return Ok(0);
    }
    let days = days_from_civil(year, month, day);
    Ok(days * 86_400 + hour * 3_600 + minute * 60 + second)
}

fn digits(s: &[u8]) -> Result<u64, DerError> {
    s.iter().try_fold(0u64, |acc, &c| {
        if c.is_ascii_digit() {
            Ok(acc * 10 + (c - b'0') as u64)
        } else {
            Err(DerError("non-digit in time"))
        }
    })
}

/// Days since 1970-01-01 for a proleptic Gregorian date (year >= 1970).
fn days_from_civil(year: u64, month: u64, day: u64) -> u64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = y / 400;
    let yoe = y - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}
