//! Certificate chain validation collaborator.
//!
//! The session hands the peer's chain, the server name, the trust store and
//! the current time to a `CertificateValidator` and acts only on the
//! verdict; it reads the leaf key back through the same trait.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::alert::AlertDescription;
use crate::error::TlsError;
use crate::verify::{PublicKey, SignatureVerifier};
use crate::x509::X509Certificate;

/// Peer certificates in the order received, leaf first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerCertificateChain {
    certs: Vec<Vec<u8>>,
}

impl PeerCertificateChain {
    pub fn new(certs: Vec<Vec<u8>>) -> Self {
        Self { certs }
    }

    pub fn leaf(&self) -> Option<&[u8]> {
        self.certs.first().map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.certs.iter().map(Vec::as_slice)
    }
}

/// Trust anchors, stored as DER.
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    anchors: Vec<Vec<u8>>,
}

impl TrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an anchor; it must at least parse as a certificate.
    pub fn add_der(&mut self, der: &[u8]) -> Result<(), TlsError> {
        X509Certificate::from_der(der).map_err(|e| {
            TlsError::certificate(AlertDescription::BadCertificate, alloc::format!("trust anchor: {}", e))
        })?;
        if !self.contains(der) {
            self.anchors.push(der.to_vec());
        }
        Ok(())
    }

    pub fn contains(&self, der: &[u8]) -> bool {
        self.anchors.iter().any(|a| a == der)
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.anchors.iter().map(Vec::as_slice)
    }
}

/// Outcome of chain validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerdict {
    pub valid: bool,
    /// Why the chain was rejected; empty when valid.
    pub reason: String,
    /// Alert the session sends when rejecting.
    pub alert: AlertDescription,
}

impl ChainVerdict {
    pub fn valid() -> Self {
        Self {
            valid: true,
            reason: String::new(),
            alert: AlertDescription::CloseNotify,
        }
    }

    pub fn invalid(alert: AlertDescription, reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: reason.into(),
            alert,
        }
    }
}

/// Decides whether a server's chain is acceptable.
pub trait CertificateValidator: Send + Sync {
    /// `now` is seconds since the Unix epoch.
    fn validate_chain(
        &self,
        chain: &PeerCertificateChain,
        server_name: &str,
        trust_store: &TrustStore,
        now: u64,
    ) -> ChainVerdict;

    /// Public key of the leaf, used for CertificateVerify.
    fn leaf_public_key(&self, chain: &PeerCertificateChain) -> Result<PublicKey, TlsError>;
}

/// Path validation over the crate's X.509 parser. Certificate signatures
/// are checked through the configured `SignatureVerifier`.
pub struct DefaultCertificateValidator {
    verifier: Arc<dyn SignatureVerifier>,
}

impl DefaultCertificateValidator {
    pub fn new(verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self { verifier }
    }

    /// Whether `issuer` signed `cert`.
    fn signed_by(&self, cert: &X509Certificate<'_>, issuer: &X509Certificate<'_>) -> bool {
        let (Some(scheme), Some(key)) = (cert.signature_scheme, issuer.public_key.as_ref()) else {
            return false;
        };
        key.is_compatible(scheme) && self.verifier.verify(key, scheme, cert.tbs, cert.signature)
    }

    fn check(
        &self,
        chain: &PeerCertificateChain,
        server_name: &str,
        trust_store: &TrustStore,
        now: u64,
    ) -> Result<(), ChainVerdict> {
        if chain.is_empty() {
            return Err(ChainVerdict::invalid(
                AlertDescription::CertificateRequired,
                "empty certificate chain",
            ));
        }
        let parsed = chain
            .iter()
            .map(X509Certificate::from_der)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ChainVerdict::invalid(AlertDescription::BadCertificate, alloc::format!("{}", e)))?;

        let leaf = &parsed[0];
        if leaf.public_key.is_none() {
            return Err(ChainVerdict::invalid(
                AlertDescription::UnsupportedCertificate,
                "unsupported leaf key algorithm",
            ));
        }
        if !leaf.matches_server_name(server_name) {
            return Err(ChainVerdict::invalid(
                AlertDescription::BadCertificate,
                alloc::format!("certificate does not match {}", server_name),
            ));
        }

        // The path ends at the first certificate that is itself an anchor.
        let anchored_at = chain.iter().position(|der| trust_store.contains(der));
        let path_end = anchored_at.unwrap_or(parsed.len() - 1);

        for (depth, cert) in parsed[..=path_end].iter().enumerate() {
            if Some(depth) == anchored_at {
                break;
            }
            if !cert.is_valid_at(now) {
                return Err(ChainVerdict::invalid(
                    AlertDescription::CertificateExpired,
                    alloc::format!("certificate at depth {} is outside its validity period", depth),
                ));
            }
        }

        for depth in 0..path_end {
            let (cert, issuer) = (&parsed[depth], &parsed[depth + 1]);
            if cert.issuer != issuer.subject {
                return Err(ChainVerdict::invalid(
                    AlertDescription::BadCertificate,
                    alloc::format!("certificate at depth {} is not issued by the next one", depth),
                ));
            }
            if !issuer.is_ca {
                return Err(ChainVerdict::invalid(
                    AlertDescription::BadCertificate,
                    alloc::format!("issuer at depth {} is not a CA", depth + 1),
                ));
            }
            // intermediates between this issuer and the leaf
            if issuer.path_len.is_some_and(|max| depth > max as usize) {
                return Err(ChainVerdict::invalid(
                    AlertDescription::BadCertificate,
                    "path length constraint exceeded",
                ));
            }
            if !self.signed_by(cert, issuer) {
                return Err(ChainVerdict::invalid(
                    AlertDescription::BadCertificate,
                    alloc::format!("bad signature on certificate at depth {}", depth),
                ));
            }
        }

        if anchored_at.is_some() {
            return Ok(());
        }

        // Top of the chain must be signed by a trust anchor.
        let top = &parsed[path_end];
        let anchored = trust_store
            .iter()
            .filter_map(|der| X509Certificate::from_der(der).ok())
            .any(|anchor| anchor.subject == top.issuer && self.signed_by(top, &anchor));
        if anchored {
            Ok(())
        } else {
            Err(ChainVerdict::invalid(
                AlertDescription::UnknownCa,
                "chain does not lead to a trusted root",
            ))
        }
    }
}

impl CertificateValidator for DefaultCertificateValidator {
    fn validate_chain(
        &self,
        chain: &PeerCertificateChain,
        server_name: &str,
        trust_store: &TrustStore,
        now: u64,
    ) -> ChainVerdict {
        match self.check(chain, server_name, trust_store, now) {
            Ok(()) => ChainVerdict::valid(),
            Err(verdict) => verdict,
        }
    }

    fn leaf_public_key(&self, chain: &PeerCertificateChain) -> Result<PublicKey, TlsError> {
        let leaf = chain.leaf().ok_or_else(|| {
            TlsError::certificate(AlertDescription::CertificateRequired, "no leaf certificate")
        })?;
        X509Certificate::from_der(leaf)
            .map_err(|e| TlsError::certificate(AlertDescription::BadCertificate, alloc::format!("{}", e)))?
            .public_key
            .ok_or_else(|| {
                TlsError::certificate(
                    AlertDescription::UnsupportedCertificate,
                    "unsupported leaf key algorithm",
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::DefaultSignatureVerifier;

    const RFC8448_CERT: &[u8] = include_bytes!("../tests/data/rfc8448_server.der");
    const ROOT: &[u8] = include_bytes!("../tests/data/root.der");
    const INTERMEDIATE: &[u8] = include_bytes!("../tests/data/intermediate.der");
    const LEAF: &[u8] = include_bytes!("../tests/data/leaf.der");

    // 2025-06-01
    const NOW: u64 = 1_748_736_000;

    fn validator() -> DefaultCertificateValidator {
        DefaultCertificateValidator::new(Arc::new(DefaultSignatureVerifier))
    }

    fn roots() -> TrustStore {
        let mut store = TrustStore::new();
        store.add_der(ROOT).unwrap();
        store
    }

    fn chain(certs: &[&[u8]]) -> PeerCertificateChain {
        PeerCertificateChain::new(certs.iter().map(|c| c.to_vec()).collect())
    }

    #[test]
    fn test_valid_chain_to_root() {
        let verdict = validator().validate_chain(&chain(&[LEAF, INTERMEDIATE]), "server.test", &roots(), NOW);
        assert_eq!(verdict, ChainVerdict::valid());

        // root included in the chain
        let verdict =
            validator().validate_chain(&chain(&[LEAF, INTERMEDIATE, ROOT]), "www.apps.test", &roots(), NOW);
        assert!(verdict.valid, "{}", verdict.reason);
    }

    #[test]
    fn test_missing_intermediate() {
        let verdict = validator().validate_chain(&chain(&[LEAF]), "server.test", &roots(), NOW);
        assert!(!verdict.valid);
        assert_eq!(verdict.alert, AlertDescription::UnknownCa);
    }

    #[test]
    fn test_wrong_name() {
        let verdict = validator().validate_chain(&chain(&[LEAF, INTERMEDIATE]), "evil.test", &roots(), NOW);
        assert!(!verdict.valid);
        assert_eq!(verdict.alert, AlertDescription::BadCertificate);
    }

    #[test]
    fn test_expired() {
        // leaf expires 2030-01-01, the intermediate in 2034
        let verdict =
            validator().validate_chain(&chain(&[LEAF, INTERMEDIATE]), "server.test", &roots(), 1_900_000_000);
        assert_eq!(verdict.alert, AlertDescription::CertificateExpired);
        let verdict =
            validator().validate_chain(&chain(&[LEAF, INTERMEDIATE]), "server.test", &roots(), 1_600_000_000);
        assert_eq!(verdict.alert, AlertDescription::CertificateExpired);
    }

    #[test]
    fn test_untrusted_and_empty() {
        let verdict =
            validator().validate_chain(&chain(&[LEAF, INTERMEDIATE]), "server.test", &TrustStore::new(), NOW);
        assert_eq!(verdict.alert, AlertDescription::UnknownCa);

        let verdict = validator().validate_chain(&chain(&[]), "server.test", &roots(), NOW);
        assert_eq!(verdict.alert, AlertDescription::CertificateRequired);
    }

    #[test]
    fn test_out_of_order_chain() {
        let verdict = validator().validate_chain(&chain(&[LEAF, ROOT]), "server.test", &TrustStore::new(), NOW);
        assert!(!verdict.valid);
        assert_eq!(verdict.alert, AlertDescription::BadCertificate);
    }

    #[test]
    fn test_anchor_is_leaf() {
        let mut store = TrustStore::new();
        store.add_der(RFC8448_CERT).unwrap();
        let verdict = validator().validate_chain(&chain(&[RFC8448_CERT]), "rsa", &store, NOW);
        assert!(verdict.valid, "{}", verdict.reason);
    }

    #[test]
    fn test_leaf_public_key() {
        let key = validator().leaf_public_key(&chain(&[LEAF, INTERMEDIATE])).unwrap();
        assert!(matches!(key, PublicKey::EcdsaP256(ref p) if p.len() == 65));
        assert!(validator().leaf_public_key(&chain(&[])).is_err());
    }

    #[test]
    fn test_trust_store_rejects_garbage() {
        let mut store = TrustStore::new();
        assert!(store.add_der(&[0x30, 0x00]).is_err());
        store.add_der(ROOT).unwrap();
        store.add_der(ROOT).unwrap();
        assert_eq!(store.len(), 1);
    }
}
