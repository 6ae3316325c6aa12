//! Client configuration.
//!
//! A `TlsConfig` is the explicit context every session is created from: it
//! owns the preference lists, the trust store, the collaborators, the clock
//! and the random generator. Nothing in the crate keeps global state, so
//! sessions built from different configs never interfere.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::alert::AlertDescription;
use crate::certificate::{CertificateValidator, DefaultCertificateValidator, TrustStore};
use crate::crypto::{ChaChaRng, SecureRandom};
use crate::error::TlsError;
use crate::suites::{CipherSuite, NamedGroup, SignatureScheme};
use crate::verify::{DefaultSignatureVerifier, SignatureVerifier};

/// Padding added to protected records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordPadding {
    #[default]
    None,
    /// Pad each inner plaintext up to a multiple of the block size.
    Block(u16),
}

/// Wall-clock source for certificate validity checks.
pub trait TimeSource: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now(&self) -> u64;
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedTime(pub u64);

impl TimeSource for FixedTime {
    fn now(&self) -> u64 {
        self.0
    }
}

/// The host's system clock.
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[cfg(feature = "std")]
impl TimeSource for SystemClock {
    fn now(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Immutable client configuration, shared by sessions through an `Arc`.
pub struct TlsConfig {
    pub(crate) cipher_suites: Vec<CipherSuite>,
    pub(crate) groups: Vec<NamedGroup>,
    pub(crate) key_share_groups: Vec<NamedGroup>,
    pub(crate) signature_schemes: Vec<SignatureScheme>,
    pub(crate) alpn_protocols: Vec<Vec<u8>>,
    pub(crate) padding: RecordPadding,
    pub(crate) middlebox_compat: bool,
    pub(crate) trust_store: TrustStore,
    pub(crate) validator: Arc<dyn CertificateValidator>,
    pub(crate) verifier: Arc<dyn SignatureVerifier>,
    pub(crate) time: Arc<dyn TimeSource>,
    pub(crate) rng: Arc<dyn SecureRandom>,
}

impl TlsConfig {
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::new()
    }

    pub fn cipher_suites(&self) -> &[CipherSuite] {
        &self.cipher_suites
    }

    pub fn groups(&self) -> &[NamedGroup] {
        &self.groups
    }

    pub fn key_share_groups(&self) -> &[NamedGroup] {
        &self.key_share_groups
    }

    pub fn signature_schemes(&self) -> &[SignatureScheme] {
        &self.signature_schemes
    }

    pub fn alpn_protocols(&self) -> &[Vec<u8>] {
        &self.alpn_protocols
    }

    pub fn padding(&self) -> RecordPadding {
        self.padding
    }

    pub fn middlebox_compat(&self) -> bool {
        self.middlebox_compat
    }

    pub fn trust_store(&self) -> &TrustStore {
        &self.trust_store
    }
}

impl core::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("cipher_suites", &self.cipher_suites)
            .field("groups", &self.groups)
            .field("key_share_groups", &self.key_share_groups)
            .field("signature_schemes", &self.signature_schemes)
            .field("alpn_protocols", &self.alpn_protocols.len())
            .field("padding", &self.padding)
            .field("middlebox_compat", &self.middlebox_compat)
            .field("trust_anchors", &self.trust_store.len())
            .finish_non_exhaustive()
    }
}

/// Builder for `TlsConfig`.
pub struct TlsConfigBuilder {
    cipher_suites: Vec<CipherSuite>,
    groups: Vec<NamedGroup>,
    key_share_groups: Vec<NamedGroup>,
    signature_schemes: Vec<SignatureScheme>,
    alpn_protocols: Vec<Vec<u8>>,
    padding: RecordPadding,
    middlebox_compat: bool,
    trust_store: TrustStore,
    validator: Option<Arc<dyn CertificateValidator>>,
    verifier: Option<Arc<dyn SignatureVerifier>>,
    time: Option<Arc<dyn TimeSource>>,
    rng: Option<Arc<dyn SecureRandom>>,
}

impl TlsConfigBuilder {
    pub fn new() -> Self {
        Self {
            cipher_suites: CipherSuite::ALL.to_vec(),
            groups: alloc::vec![NamedGroup::X25519, NamedGroup::Secp256r1],
            key_share_groups: alloc::vec![NamedGroup::X25519],
            signature_schemes: DefaultSignatureVerifier::supported_schemes().to_vec(),
            alpn_protocols: alloc::vec![b"h2".to_vec(), b"http/1.1".to_vec()],
            padding: RecordPadding::None,
            middlebox_compat: true,
            trust_store: TrustStore::new(),
            validator: None,
            verifier: None,
            time: None,
            rng: None,
        }
    }

    /// Cipher suites in preference order.
    pub fn cipher_suites(mut self, suites: &[CipherSuite]) -> Self {
        self.cipher_suites = suites.to_vec();
        self
    }

    /// Groups offered in `supported_groups`.
    pub fn groups(mut self, groups: &[NamedGroup]) -> Self {
        self.groups = groups.to_vec();
        self
    }

    /// Groups that get a key share in the first ClientHello.
    pub fn key_share_groups(mut self, groups: &[NamedGroup]) -> Self {
        self.key_share_groups = groups.to_vec();
        self
    }

    pub fn signature_schemes(mut self, schemes: &[SignatureScheme]) -> Self {
        self.signature_schemes = schemes.to_vec();
        self
    }

    /// ALPN protocols in preference order; empty disables the extension.
    pub fn alpn_protocols<P: AsRef<[u8]>>(mut self, protocols: &[P]) -> Self {
        self.alpn_protocols = protocols.iter().map(|p| p.as_ref().to_vec()).collect();
        self
    }

    pub fn padding(mut self, padding: RecordPadding) -> Self {
        self.padding = padding;
        self
    }

    pub fn middlebox_compat(mut self, enabled: bool) -> Self {
        self.middlebox_compat = enabled;
        self
    }

    pub fn trust_store(mut self, store: TrustStore) -> Self {
        self.trust_store = store;
        self
    }

    /// Add one DER trust anchor.
    pub fn add_trust_anchor(mut self, der: &[u8]) -> Result<Self, TlsError> {
        self.trust_store.add_der(der)?;
        Ok(self)
    }

    pub fn certificate_validator(mut self, validator: Arc<dyn CertificateValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn signature_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn rng(mut self, rng: Arc<dyn SecureRandom>) -> Self {
        self.rng = Some(rng);
        self
    }

    /// Use a deterministic generator; intended for tests and replay.
    pub fn rng_seed(self, seed: [u8; 32]) -> Self {
        self.rng(Arc::new(ChaChaRng::from_seed(seed)))
    }

    pub fn build(self) -> Result<TlsConfig, TlsError> {
        if self.cipher_suites.is_empty() {
            return Err(config_error("no cipher suites configured"));
        }
        if self.groups.is_empty() {
            return Err(config_error("no groups configured"));
        }
        if self.signature_schemes.is_empty() {
            return Err(config_error("no signature schemes configured"));
        }
        if let Some(group) = self.key_share_groups.iter().find(|g| !self.groups.contains(g)) {
            return Err(config_error(alloc::format!(
                "key share group {:?} is not a supported group",
                group
            )));
        }
        if self
            .alpn_protocols
            .iter()
            .any(|p| p.is_empty() || p.len() > u8::MAX as usize)
        {
            return Err(config_error("ALPN protocol names must be 1..=255 bytes"));
        }

        let verifier = self
            .verifier
            .unwrap_or_else(|| Arc::new(DefaultSignatureVerifier));
        let validator = self
            .validator
            .unwrap_or_else(|| Arc::new(DefaultCertificateValidator::new(verifier.clone())));
        let time = match self.time {
            Some(time) => time,
            None => default_time_source()?,
        };
        let rng = match self.rng {
            Some(rng) => rng,
            None => Arc::new(ChaChaRng::from_hardware()?) as Arc<dyn SecureRandom>,
        };

        Ok(TlsConfig {
            cipher_suites: dedup(self.cipher_suites),
            groups: dedup(self.groups),
            key_share_groups: dedup(self.key_share_groups),
            signature_schemes: dedup(self.signature_schemes),
            alpn_protocols: self.alpn_protocols,
            padding: self.padding,
            middlebox_compat: self.middlebox_compat,
            trust_store: self.trust_store,
            validator,
            verifier,
            time,
            rng,
        })
    }
}

impl Default for TlsConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn config_error(reason: impl Into<String>) -> TlsError {
    TlsError::protocol(AlertDescription::InternalError, reason)
}

fn dedup<T: PartialEq>(items: Vec<T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

#[cfg(feature = "std")]
fn default_time_source() -> Result<Arc<dyn TimeSource>, TlsError> {
    Ok(Arc::new(SystemClock))
}

#[cfg(not(feature = "std"))]
fn default_time_source() -> Result<Arc<dyn TimeSource>, TlsError> {
    Err(config_error("no time source configured"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> TlsConfigBuilder {
        TlsConfig::builder()
            .rng_seed([7; 32])
            .time_source(Arc::new(FixedTime(1_700_000_000)))
    }

    #[test]
    fn test_defaults() {
        let config = base().build().unwrap();
        assert_eq!(config.cipher_suites(), CipherSuite::ALL);
        assert_eq!(config.groups(), [NamedGroup::X25519, NamedGroup::Secp256r1]);
        assert_eq!(config.key_share_groups(), [NamedGroup::X25519]);
        assert_eq!(config.alpn_protocols(), [b"h2".to_vec(), b"http/1.1".to_vec()]);
        assert_eq!(config.padding(), RecordPadding::None);
        assert!(config.middlebox_compat());
        assert!(config.signature_schemes().contains(&SignatureScheme::RsaPssRsaeSha256));
        assert_eq!(config.time.now(), 1_700_000_000);
    }

    #[test]
    fn test_rejects_empty_lists() {
        assert!(base().cipher_suites(&[]).build().is_err());
        assert!(base().groups(&[]).key_share_groups(&[]).build().is_err());
        assert!(base().signature_schemes(&[]).build().is_err());
    }

    #[test]
    fn test_key_share_group_must_be_supported() {
        let err = base()
            .groups(&[NamedGroup::X25519])
            .key_share_groups(&[NamedGroup::Secp256r1])
            .build()
            .unwrap_err();
        assert!(err.reason().contains("key share group"));
        // no initial share at all is allowed: the server asks via HelloRetryRequest
        assert!(base().key_share_groups(&[]).build().is_ok());
    }

    #[test]
    fn test_alpn_validation() {
        assert!(base().alpn_protocols(&[""]).build().is_err());
        let long = alloc::vec![b'a'; 256];
        assert!(base().alpn_protocols(&[long]).build().is_err());
        let config = base().alpn_protocols::<&str>(&[]).build().unwrap();
        assert!(config.alpn_protocols().is_empty());
    }

    #[test]
    fn test_duplicates_collapse() {
        let config = base()
            .cipher_suites(&[CipherSuite::Aes128GcmSha256, CipherSuite::Aes128GcmSha256])
            .build()
            .unwrap();
        assert_eq!(config.cipher_suites(), [CipherSuite::Aes128GcmSha256]);
    }
}
