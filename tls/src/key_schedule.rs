//! TLS 1.3 key schedule (RFC 8446 §7.1).
//!
//! ```text
//!              0
//!              |
//!   0 -> HKDF-Extract = Early Secret
//!              |
//!        Derive-Secret(., "derived", "")
//!              |
//! (EC)DHE -> HKDF-Extract = Handshake Secret
//!              +--> "c hs traffic" / "s hs traffic" (ClientHello..ServerHello)
//!        Derive-Secret(., "derived", "")
//!              |
//!   0 -> HKDF-Extract = Master Secret
//!              +--> "c ap traffic" / "s ap traffic" / "exp master"
//!              |     (ClientHello..server Finished)
//!              +--> "res master" (ClientHello..client Finished)
//! ```
//!
//! Every secret is held in a `Zeroizing` buffer and wiped by `wipe()` or on
//! drop.

use alloc::vec::Vec;

use zeroize::{Zeroize, Zeroizing};

use crate::alert::AlertDescription;
use crate::crypto::aead::NONCE_LEN;
use crate::crypto::{derive_secret, hkdf_expand_label, hkdf_extract, hmac, AeadAlgorithm, HashAlgorithm};
use crate::error::TlsError;

type Secret = Zeroizing<Vec<u8>>;

/// Record protection key and static IV for one direction.
pub struct TrafficKeys {
    pub key: Secret,
    pub iv: [u8; NONCE_LEN],
}

impl Drop for TrafficKeys {
    fn drop(&mut self) {
        self.iv.zeroize();
    }
}

impl core::fmt::Debug for TrafficKeys {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("TrafficKeys { .. }")
    }
}

/// Derive the record key and IV from a traffic secret.
pub fn traffic_keys(
    hash: HashAlgorithm,
    aead: AeadAlgorithm,
    secret: &[u8],
) -> Result<TrafficKeys, TlsError> {
    let key = Zeroizing::new(hkdf_expand_label(hash, secret, b"key", b"", aead.key_len())?);
    let iv_bytes = Zeroizing::new(hkdf_expand_label(hash, secret, b"iv", b"", NONCE_LEN)?);
    let mut iv = [0u8; NONCE_LEN];
    iv.copy_from_slice(&iv_bytes);
    Ok(TrafficKeys { key, iv })
}

/// Next-generation traffic secret after a KeyUpdate (RFC 8446 §7.2).
pub fn next_traffic_secret(hash: HashAlgorithm, secret: &[u8]) -> Result<Vec<u8>, TlsError> {
    Ok(hkdf_expand_label(hash, secret, b"traffic upd", b"", hash.output_len())?)
}

/// `HMAC(finished_key, transcript_hash)` with
/// `finished_key = HKDF-Expand-Label(base_key, "finished", "", Hash.length)`.
pub fn finished_verify_data(
    hash: HashAlgorithm,
    base_key: &[u8],
    transcript_hash: &[u8],
) -> Result<Vec<u8>, TlsError> {
    let finished_key = Zeroizing::new(hkdf_expand_label(
        hash,
        base_key,
        b"finished",
        b"",
        hash.output_len(),
    )?);
    Ok(hmac(hash, &finished_key, transcript_hash))
}

/// The secret tree of one connection.
pub struct KeySchedule {
    hash: HashAlgorithm,
    early_secret: Secret,
    handshake_secret: Option<Secret>,
    master_secret: Option<Secret>,
    client_handshake: Option<Secret>,
    server_handshake: Option<Secret>,
    client_application: Option<Secret>,
    server_application: Option<Secret>,
    exporter_master: Option<Secret>,
    resumption_master: Option<Secret>,
}

impl core::fmt::Debug for KeySchedule {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeySchedule")
            .field("hash", &self.hash)
            .field("handshake", &self.handshake_secret.is_some())
            .field("application", &self.client_application.is_some())
            .finish()
    }
}

fn missing(what: &str) -> TlsError {
    TlsError::protocol(
        AlertDescription::InternalError,
        alloc::format!("{} not yet derived", what),
    )
}

impl KeySchedule {
    /// Early secret with no PSK: `HKDF-Extract(0, 0)`.
    pub fn new(hash: HashAlgorithm) -> Self {
        let zeros = Zeroizing::new(alloc::vec![0u8; hash.output_len()]);
        Self {
            hash,
            early_secret: Zeroizing::new(hkdf_extract(hash, &[], &zeros)),
            handshake_secret: None,
            master_secret: None,
            client_handshake: None,
            server_handshake: None,
            client_application: None,
            server_application: None,
            exporter_master: None,
            resumption_master: None,
        }
    }

    pub fn hash(&self) -> HashAlgorithm {
        self.hash
    }

    fn derived(&self, secret: &[u8]) -> Result<Secret, TlsError> {
        let empty = self.hash.hash(b"");
        Ok(Zeroizing::new(derive_secret(self.hash, secret, b"derived", &empty)?))
    }

    /// Mix in the ECDHE shared secret and derive both handshake traffic
    /// secrets over the ClientHello..ServerHello transcript hash.
    pub fn input_shared_secret(
        &mut self,
        shared_secret: &[u8],
        server_hello_hash: &[u8],
    ) -> Result<(), TlsError> {
        let salt = self.derived(&self.early_secret)?;
        let hs = Zeroizing::new(hkdf_extract(self.hash, &salt, shared_secret));
        self.client_handshake = Some(Zeroizing::new(derive_secret(
            self.hash,
            &hs,
            b"c hs traffic",
            server_hello_hash,
        )?));
        self.server_handshake = Some(Zeroizing::new(derive_secret(
            self.hash,
            &hs,
            b"s hs traffic",
            server_hello_hash,
        )?));
        self.handshake_secret = Some(hs);
        Ok(())
    }

    /// Master secret plus application and exporter secrets over the
    /// ClientHello..server Finished transcript hash.
    pub fn derive_application_secrets(&mut self, server_finished_hash: &[u8]) -> Result<(), TlsError> {
        let hs = self
            .handshake_secret
            .as_ref()
            .ok_or_else(|| missing("handshake secret"))?;
        let salt = self.derived(hs)?;
        let zeros = Zeroizing::new(alloc::vec![0u8; self.hash.output_len()]);
        let master = Zeroizing::new(hkdf_extract(self.hash, &salt, &zeros));
        let derive = |label: &[u8]| -> Result<Secret, TlsError> {
            Ok(Zeroizing::new(derive_secret(
                self.hash,
                &master,
                label,
                server_finished_hash,
            )?))
        };
        let client = derive(b"c ap traffic")?;
        let server = derive(b"s ap traffic")?;
        let exporter = derive(b"exp master")?;
        self.client_application = Some(client);
        self.server_application = Some(server);
        self.exporter_master = Some(exporter);
        self.master_secret = Some(master);
        Ok(())
    }

    /// Resumption master secret over the ClientHello..client Finished hash.
    pub fn derive_resumption_master(&mut self, client_finished_hash: &[u8]) -> Result<(), TlsError> {
        let master = self.master_secret.as_ref().ok_or_else(|| missing("master secret"))?;
        self.resumption_master = Some(Zeroizing::new(derive_secret(
            self.hash,
            master,
            b"res master",
            client_finished_hash,
        )?));
        Ok(())
    }

    pub fn handshake_secret(&self) -> Option<&[u8]> {
        self.handshake_secret.as_deref().map(Vec::as_slice)
    }

    pub fn master_secret(&self) -> Option<&[u8]> {
        self.master_secret.as_deref().map(Vec::as_slice)
    }

    pub fn client_handshake_traffic_secret(&self) -> Result<&[u8], TlsError> {
        self.client_handshake
            .as_deref()
            .map(Vec::as_slice)
            .ok_or_else(|| missing("client handshake traffic secret"))
    }

    pub fn server_handshake_traffic_secret(&self) -> Result<&[u8], TlsError> {
        self.server_handshake
            .as_deref()
            .map(Vec::as_slice)
            .ok_or_else(|| missing("server handshake traffic secret"))
    }

    pub fn client_application_traffic_secret(&self) -> Result<&[u8], TlsError> {
        self.client_application
            .as_deref()
            .map(Vec::as_slice)
            .ok_or_else(|| missing("client application traffic secret"))
    }

    pub fn server_application_traffic_secret(&self) -> Result<&[u8], TlsError> {
        self.server_application
            .as_deref()
            .map(Vec::as_slice)
            .ok_or_else(|| missing("server application traffic secret"))
    }

    pub fn exporter_master_secret(&self) -> Result<&[u8], TlsError> {
        self.exporter_master
            .as_deref()
            .map(Vec::as_slice)
            .ok_or_else(|| missing("exporter master secret"))
    }

    pub fn resumption_master_secret(&self) -> Result<&[u8], TlsError> {
        self.resumption_master
            .as_deref()
            .map(Vec::as_slice)
            .ok_or_else(|| missing("resumption master secret"))
    }

    /// Rotate the client application secret; returns the new one.
    pub fn update_client_application_secret(&mut self) -> Result<&[u8], TlsError> {
        let next = next_traffic_secret(self.hash, self.client_application_traffic_secret()?)?;
        self.client_application = Some(Zeroizing::new(next));
        self.client_application_traffic_secret()
    }

    /// Rotate the server application secret; returns the new one.
    pub fn update_server_application_secret(&mut self) -> Result<&[u8], TlsError> {
        let next = next_traffic_secret(self.hash, self.server_application_traffic_secret()?)?;
        self.server_application = Some(Zeroizing::new(next));
        self.server_application_traffic_secret()
    }

    /// PSK for a NewSessionTicket: `HKDF-Expand-Label(res_master,
    /// "resumption", ticket_nonce, Hash.length)` (RFC 8446 §4.6.1).
    pub fn resumption_psk(&self, ticket_nonce: &[u8]) -> Result<Vec<u8>, TlsError> {
        Ok(hkdf_expand_label(
            self.hash,
            self.resumption_master_secret()?,
            b"resumption",
            ticket_nonce,
            self.hash.output_len(),
        )?)
    }

    /// TLS-Exporter(label, context, length) (RFC 8446 §7.5).
    pub fn export(&self, label: &[u8], context: &[u8], length: usize) -> Result<Vec<u8>, TlsError> {
        let empty = self.hash.hash(b"");
        let secret = Zeroizing::new(derive_secret(
            self.hash,
            self.exporter_master_secret()?,
            label,
            &empty,
        )?);
        let context_hash = self.hash.hash(context);
        Ok(hkdf_expand_label(self.hash, &secret, b"exporter", &context_hash, length)?)
    }

    /// Overwrite every secret.
    pub fn wipe(&mut self) {
        self.early_secret.zeroize();
        for secret in [
            &mut self.handshake_secret,
            &mut self.master_secret,
            &mut self.client_handshake,
            &mut self.server_handshake,
            &mut self.client_application,
            &mut self.server_application,
            &mut self.exporter_master,
            &mut self.resumption_master,
        ] {
            if let Some(s) = secret.as_mut() {
                s.zeroize();
            }
            *secret = None;
        }
    }
}
