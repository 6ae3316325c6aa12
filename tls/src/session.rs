//! The client handshake state machine.
//!
//! `ClientSession` is sans-IO: the caller feeds received bytes with
//! `read_tls`, collects bytes to send with `take_output`, and exchanges
//! application data with `write_plaintext` / `take_plaintext`. The driver
//! in `connection` wires it to a `Transport`.
//!
//! Every failure is terminal. The session moves to `Error`, queues a fatal
//! alert (encrypted when a write key exists), wipes its secrets and
//! answers every later call with the same error.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::net::IpAddr;

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

use crate::alert::{Alert, AlertDescription};
use crate::certificate::PeerCertificateChain;
use crate::config::TlsConfig;
use crate::error::TlsError;
use crate::handshake::{
    signed_content, Certificate, CertificateRequest, CertificateVerify, ClientHello,
    EncryptedExtensions, Finished, HandshakeJoiner, HandshakeMessage, KeyShareEntry, KeyUpdate,
    NewSessionTicketMessage, ServerHello, SERVER_SIGNATURE_CONTEXT, TLS13_VERSION,
};
use crate::key_schedule::{finished_verify_data, traffic_keys, KeySchedule};
use crate::kx::KeyShare;
use crate::record::{encode_plaintext, ContentType, Direction, OpaqueRecord, RecordLayer, RecordReader, MAX_PLAINTEXT_LEN};
use crate::suites::{CipherSuite, CipherSuiteParams, NamedGroup, SignatureScheme};
use crate::transcript::{Checkpoint, Transcript};
use crate::verify::PublicKey;

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Uninitialized,
    ClientHelloSent,
    ServerHelloReceived,
    EncryptedExtensionsReceived,
    CertificateReceived,
    CertificateVerifyReceived,
    FinishedReceived,
    Connected,
    Error,
    Closed,
}

impl State {
    /// Between the first ClientHello and the server Finished.
    pub fn is_handshaking(self) -> bool {
        matches!(
            self,
            State::ClientHelloSent
                | State::ServerHelloReceived
                | State::EncryptedExtensionsReceived
                | State::CertificateReceived
                | State::CertificateVerifyReceived
                | State::FinishedReceived
        )
    }
}

/// A session ticket from the server, with the PSK it resumes.
#[derive(Clone)]
pub struct NewSessionTicket {
    pub lifetime: u32,
    pub age_add: u32,
    pub nonce: Vec<u8>,
    pub ticket: Vec<u8>,
    pub max_early_data: Option<u32>,
    pub cipher_suite: CipherSuite,
    /// Seconds since the Unix epoch at receipt.
    pub received_at: u64,
    pub resumption_psk: Zeroizing<Vec<u8>>,
}

impl core::fmt::Debug for NewSessionTicket {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NewSessionTicket")
            .field("lifetime", &self.lifetime)
            .field("ticket_len", &self.ticket.len())
            .field("cipher_suite", &self.cipher_suite)
            .finish_non_exhaustive()
    }
}

/// One TLS 1.3 client connection.
pub struct ClientSession {
    config: Arc<TlsConfig>,
    server_name: String,
    state: State,
    error: Option<TlsError>,

    client_random: [u8; 32],
    session_id: Vec<u8>,
    hello: Option<ClientHello>,
    key_shares: Vec<KeyShare>,
    retried: bool,
    retry_suite: Option<CipherSuite>,

    params: Option<CipherSuiteParams>,
    transcript: Transcript,
    key_schedule: Option<KeySchedule>,
    records: RecordLayer,
    reader: RecordReader,
    joiner: HandshakeJoiner,

    peer_chain: PeerCertificateChain,
    leaf_key: Option<PublicKey>,
    alpn: Option<Vec<u8>>,
    certificate_request: Option<Vec<u8>>,
    ccs_received: bool,

    outgoing: Vec<u8>,
    plaintext: Vec<u8>,
    tickets: Vec<NewSessionTicket>,
}

impl core::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ClientSession")
            .field("server_name", &self.server_name)
            .field("state", &self.state)
            .field("suite", &self.params.map(|p| p.suite))
            .field("records", &self.records)
            .finish_non_exhaustive()
    }
}

impl ClientSession {
    pub fn new(server_name: &str, config: Arc<TlsConfig>) -> Self {
        Self {
            config,
            server_name: server_name.into(),
            state: State::Uninitialized,
            error: None,
            client_random: [0; 32],
            session_id: Vec::new(),
            hello: None,
            key_shares: Vec::new(),
            retried: false,
            retry_suite: None,
            params: None,
            transcript: Transcript::new(),
            key_schedule: None,
            records: RecordLayer::new(),
            reader: RecordReader::new(),
            joiner: HandshakeJoiner::new(),
            peer_chain: PeerCertificateChain::default(),
            leaf_key: None,
            alpn: None,
            certificate_request: None,
            ccs_received: false,
            outgoing: Vec::new(),
            plaintext: Vec::new(),
            tickets: Vec::new(),
        }
    }

    // ── Accessors ───────────────────────────────────────────

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_handshake_complete(&self) -> bool {
        self.state == State::Connected
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// The terminal error, once the session is in `Error`.
    pub fn error(&self) -> Option<&TlsError> {
        self.error.as_ref()
    }

    pub fn negotiated_alpn(&self) -> Option<&[u8]> {
        self.alpn.as_deref()
    }

    pub fn negotiated_cipher_suite(&self) -> Option<CipherSuite> {
        self.params.map(|p| p.suite)
    }

    pub fn peer_certificates(&self) -> &PeerCertificateChain {
        &self.peer_chain
    }

    /// Bytes waiting to be written to the transport.
    pub fn has_output(&self) -> bool {
        !self.outgoing.is_empty()
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.outgoing)
    }

    /// Application data received so far.
    pub fn take_plaintext(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.plaintext)
    }

    pub fn take_session_tickets(&mut self) -> Vec<NewSessionTicket> {
        core::mem::take(&mut self.tickets)
    }

    // ── Public operations ───────────────────────────────────

    /// Queue the first ClientHello.
    pub fn start(&mut self) -> Result<(), TlsError> {
        self.ensure_usable()?;
        if self.state != State::Uninitialized {
            return Err(TlsError::protocol(
                AlertDescription::InternalError,
                "handshake already started",
            ));
        }
        let result = self.send_client_hello();
        self.guard(result)
    }

    /// Feed bytes received from the server.
    pub fn read_tls(&mut self, data: &[u8]) -> Result<(), TlsError> {
        self.ensure_usable()?;
        if self.state == State::Uninitialized {
            let err = TlsError::unexpected("data received before ClientHello");
            return Err(self.fail(err, true));
        }
        self.reader.push(data);
        let result = self.process_records();
        self.guard(result)
    }

    /// Drive the state machine with one already-decoded message. The
    /// message is re-encoded for the transcript.
    pub fn process_message(&mut self, message: HandshakeMessage) -> Result<(), TlsError> {
        self.ensure_usable()?;
        let raw = message.encode();
        let result = self.handle_message(message, &raw).map(|_| ());
        self.guard(result)
    }

    /// Encrypt application data into the output buffer.
    pub fn write_plaintext(&mut self, data: &[u8]) -> Result<(), TlsError> {
        self.ensure_usable()?;
        if self.state != State::Connected {
            return Err(TlsError::protocol(
                AlertDescription::InternalError,
                "handshake not complete",
            ));
        }
        let padding = self.config.padding;
        let result = data.chunks(MAX_PLAINTEXT_LEN).try_for_each(|chunk| {
            let record =
                self.records
                    .encrypt(Direction::Client, chunk, ContentType::ApplicationData, padding)?;
            self.outgoing.extend_from_slice(&record);
            Ok(())
        });
        self.guard(result)
    }

    /// Rotate the client write key with a KeyUpdate, optionally asking the
    /// server to rotate its key too.
    pub fn update_keys(&mut self, request_peer_update: bool) -> Result<(), TlsError> {
        self.ensure_usable()?;
        if self.state != State::Connected {
            return Err(TlsError::protocol(
                AlertDescription::InternalError,
                "handshake not complete",
            ));
        }
        let result = self.send_key_update(request_peer_update);
        self.guard(result)
    }

    /// TLS-Exporter (RFC 8446 §7.5).
    pub fn export_keying_material(
        &self,
        label: &[u8],
        context: &[u8],
        length: usize,
    ) -> Result<Vec<u8>, TlsError> {
        self.ensure_usable()?;
        match (&self.key_schedule, self.state) {
            (Some(schedule), State::Connected) => schedule.export(label, context, length),
            _ => Err(TlsError::protocol(
                AlertDescription::InternalError,
                "handshake not complete",
            )),
        }
    }

    /// Queue `close_notify` and wipe all secrets.
    pub fn close(&mut self) -> Result<(), TlsError> {
        match self.state {
            State::Closed => return Ok(()),
            State::Error => return self.ensure_usable(),
            _ => {}
        }
        self.queue_alert(Alert::close_notify());
        log::debug!("[KPIO TLS] {:?} -> Closed (local close)", self.state);
        self.state = State::Closed;
        self.wipe_secrets();
        Ok(())
    }

    // ── Error plumbing ──────────────────────────────────────

    pub(crate) fn ensure_usable(&self) -> Result<(), TlsError> {
        match self.state {
            State::Error => Err(self
                .error
                .clone()
                .unwrap_or_else(|| TlsError::transport("session failed"))),
            State::Closed => Err(TlsError::transport("session closed")),
            _ => Ok(()),
        }
    }

    /// Fail the session for a reason observed outside it, such as a dead
    /// transport.
    pub(crate) fn abort(&mut self, err: TlsError) -> TlsError {
        self.fail(err, true)
    }

    fn guard<T>(&mut self, result: Result<T, TlsError>) -> Result<T, TlsError> {
        result.map_err(|err| self.fail(err, true))
    }

    /// Enter `Error`, optionally queue the matching alert, and wipe secrets.
    fn fail(&mut self, err: TlsError, send_alert: bool) -> TlsError {
        if self.state == State::Error {
            return self.error.clone().unwrap_or(err);
        }
        log::warn!(
            "[KPIO TLS] {} in state {:?}: {}",
            self.server_name,
            self.state,
            err
        );
        if send_alert {
            if let Some(description) = err.alert() {
                self.queue_alert(Alert::fatal(description));
            }
        }
        self.state = State::Error;
        self.error = Some(err.clone());
        self.wipe_secrets();
        self.plaintext.zeroize();
        self.plaintext.clear();
        err
    }

    fn queue_alert(&mut self, alert: Alert) {
        let bytes = alert.to_bytes();
        if self.records.is_protected(Direction::Client) {
            let padding = self.config.padding;
            match self
                .records
                .encrypt(Direction::Client, &bytes, ContentType::Alert, padding)
            {
                Ok(record) => self.outgoing.extend_from_slice(&record),
                Err(e) => log::warn!("[KPIO TLS] could not protect alert: {}", e),
            }
        } else {
            self.outgoing
                .extend_from_slice(&OpaqueRecord::new(ContentType::Alert, bytes.to_vec()).encode());
        }
    }

    fn wipe_secrets(&mut self) {
        if let Some(mut schedule) = self.key_schedule.take() {
            schedule.wipe();
        }
        self.records.clear();
        self.key_shares.clear();
        self.joiner.clear();
        self.hello = None;
    }

    fn set_state(&mut self, next: State) {
        log::debug!("[KPIO TLS] {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn params(&self) -> Result<CipherSuiteParams, TlsError> {
        self.params.ok_or_else(|| {
            TlsError::protocol(AlertDescription::InternalError, "no cipher suite negotiated")
        })
    }

    fn schedule(&mut self) -> Result<&mut KeySchedule, TlsError> {
        self.key_schedule.as_mut().ok_or_else(|| {
            TlsError::protocol(AlertDescription::InternalError, "key schedule not started")
        })
    }

    // ── Outbound ────────────────────────────────────────────

    fn send_handshake(&mut self, message: &[u8]) -> Result<(), TlsError> {
        if self.records.is_protected(Direction::Client) {
            let padding = self.config.padding;
            for chunk in message.chunks(MAX_PLAINTEXT_LEN) {
                let record =
                    self.records
                        .encrypt(Direction::Client, chunk, ContentType::Handshake, padding)?;
                self.outgoing.extend_from_slice(&record);
            }
        } else {
            self.outgoing
                .extend_from_slice(&encode_plaintext(ContentType::Handshake, message));
        }
        Ok(())
    }

    fn send_client_hello(&mut self) -> Result<(), TlsError> {
        let config = self.config.clone();
        let host = self.server_name.strip_suffix('.').unwrap_or(&self.server_name);
        if host.is_empty() || host.len() > 253 || !host.is_ascii() {
            return Err(TlsError::protocol(
                AlertDescription::InternalError,
                "invalid server name",
            ));
        }
        // IP literals are never sent as SNI (RFC 6066 §3)
        let sni = match host.parse::<IpAddr>() {
            Ok(_) => None,
            Err(_) => Some(host.to_ascii_lowercase()),
        };

        config.rng.fill(&mut self.client_random)?;
        if config.middlebox_compat {
            let mut id = [0u8; 32];
            config.rng.fill(&mut id)?;
            self.session_id = id.to_vec();
        }
        for group in &config.key_share_groups {
            self.key_shares.push(KeyShare::generate(*group, config.rng.as_ref())?);
        }

        let hello = ClientHello {
            random: self.client_random,
            session_id: self.session_id.clone(),
            cipher_suites: config.cipher_suites.iter().map(|s| s.to_u16()).collect(),
            server_name: sni,
            supported_groups: config.groups.iter().map(|g| g.to_u16()).collect(),
            signature_algorithms: config.signature_schemes.iter().map(|s| s.to_u16()).collect(),
            supported_versions: alloc::vec![TLS13_VERSION],
            key_shares: self.key_share_entries(),
            alpn: config.alpn_protocols.clone(),
            cookie: None,
        };
        let raw = hello.encode();
        self.transcript.append(&raw);
        self.send_handshake(&raw)?;
        self.hello = Some(hello);
        self.set_state(State::ClientHelloSent);
        Ok(())
    }

    fn key_share_entries(&self) -> Vec<KeyShareEntry> {
        self.key_shares
            .iter()
            .map(|share| KeyShareEntry {
                group: share.group().to_u16(),
                key_exchange: share.public_key().to_vec(),
            })
            .collect()
    }

    fn send_key_update(&mut self, request_peer_update: bool) -> Result<(), TlsError> {
        let params = self.params()?;
        let raw = KeyUpdate {
            update_requested: request_peer_update,
        }
        .encode();
        self.send_handshake(&raw)?;
        let secret = Zeroizing::new(self.schedule()?.update_client_application_secret()?.to_vec());
        let keys = traffic_keys(params.hash, params.aead, &secret)?;
        self.records.install(Direction::Client, params.aead, &keys)?;
        log::debug!("[KPIO TLS] client application key updated");
        Ok(())
    }

    // ── Inbound records ─────────────────────────────────────

    fn process_records(&mut self) -> Result<(), TlsError> {
        while let Some(record) = self.reader.next_record()? {
            self.process_record(record)?;
            if self.state == State::Closed {
                break;
            }
        }
        Ok(())
    }

    fn process_record(&mut self, record: OpaqueRecord) -> Result<(), TlsError> {
        let protected = self.records.is_protected(Direction::Server);
        match record.content_type {
            ContentType::ChangeCipherSpec => {
                if !self.state.is_handshaking() || self.ccs_received {
                    return Err(TlsError::unexpected("unexpected change_cipher_spec"));
                }
                if record.payload != [0x01] {
                    return Err(TlsError::unexpected("malformed change_cipher_spec"));
                }
                self.ccs_received = true;
                log::trace!("[KPIO TLS] ignoring middlebox change_cipher_spec");
                Ok(())
            }
            _ if protected && record.content_type != ContentType::ApplicationData => {
                Err(TlsError::unexpected("plaintext record after keys were installed"))
            }
            ContentType::ApplicationData if !protected => {
                Err(TlsError::unexpected("protected record before keys were installed"))
            }
            ContentType::ApplicationData => {
                let (inner_type, content) = self.records.decrypt(Direction::Server, &record.payload)?;
                self.process_content(inner_type, content)
            }
            other => self.process_content(other, record.payload),
        }
    }

    fn process_content(&mut self, content_type: ContentType, content: Vec<u8>) -> Result<(), TlsError> {
        match content_type {
            ContentType::Handshake => {
                if content.is_empty() {
                    return Err(TlsError::unexpected("empty handshake record"));
                }
                self.joiner.push(&content);
                self.process_handshake_messages()
            }
            ContentType::Alert => self.handle_alert(&content),
            ContentType::ApplicationData => {
                if self.state != State::Connected {
                    return Err(TlsError::unexpected("application data during handshake"));
                }
                if !self.joiner.is_empty() {
                    return Err(TlsError::unexpected("application data inside a handshake message"));
                }
                self.plaintext.extend_from_slice(&content);
                Ok(())
            }
            ContentType::ChangeCipherSpec => {
                Err(TlsError::unexpected("protected change_cipher_spec"))
            }
        }
    }

    fn process_handshake_messages(&mut self) -> Result<(), TlsError> {
        while let Some(raw) = self.joiner.next_message()? {
            let message = HandshakeMessage::decode_message(&raw)?;
            log::trace!("[KPIO TLS] handshake in: {} ({} bytes)", message.name(), raw.len());
            let key_change = self.handle_message(message, &raw)?;
            // new keys only take effect from the next record
            if key_change && !self.joiner.is_empty() {
                return Err(TlsError::unexpected("handshake message spans a key change"));
            }
            if !matches!(self.state, State::Connected) && !self.state.is_handshaking() {
                break;
            }
        }
        Ok(())
    }

    fn handle_alert(&mut self, content: &[u8]) -> Result<(), TlsError> {
        let alert = Alert::from_bytes(content).ok_or_else(|| TlsError::decode("malformed alert"))?;
        if alert.is_fatal() {
            let err = TlsError::protocol(
                alert.description,
                alloc::format!("peer sent fatal alert {:?}", alert.description),
            );
            // never answer a fatal alert with another one
            self.fail(err.clone(), false);
            return Err(err);
        }
        match alert.description {
            AlertDescription::CloseNotify => {
                log::debug!("[KPIO TLS] close_notify received");
                self.queue_alert(Alert::close_notify());
                self.set_state(State::Closed);
                self.wipe_secrets();
            }
            other => log::warn!("[KPIO TLS] ignoring warning alert {:?}", other),
        }
        Ok(())
    }

    /// Apply one handshake message. Returns whether the server's read
    /// keys changed.
    fn handle_message(&mut self, message: HandshakeMessage, raw: &[u8]) -> Result<bool, TlsError> {
        match (self.state, message) {
            (State::ClientHelloSent, HandshakeMessage::ServerHello(hello)) => {
                if hello.is_retry_request() {
                    self.handle_retry_request(hello, raw)?;
                    Ok(false)
                } else {
                    self.handle_server_hello(hello, raw)?;
                    Ok(true)
                }
            }
            (State::ServerHelloReceived, HandshakeMessage::EncryptedExtensions(ee)) => {
                self.handle_encrypted_extensions(ee, raw)?;
                Ok(false)
            }
            (State::EncryptedExtensionsReceived, HandshakeMessage::CertificateRequest(req))
                if self.certificate_request.is_none() =>
            {
                self.handle_certificate_request(req, raw)?;
                Ok(false)
            }
            (State::EncryptedExtensionsReceived, HandshakeMessage::Certificate(cert)) => {
                self.handle_certificate(cert, raw)?;
                Ok(false)
            }
            (State::CertificateReceived, HandshakeMessage::CertificateVerify(cv)) => {
                self.handle_certificate_verify(cv, raw)?;
                Ok(false)
            }
            (State::CertificateVerifyReceived, HandshakeMessage::Finished(fin)) => {
                self.handle_finished(fin, raw)?;
                Ok(true)
            }
            (State::Connected, HandshakeMessage::NewSessionTicket(ticket)) => {
                self.handle_new_session_ticket(ticket)?;
                Ok(false)
            }
            (State::Connected, HandshakeMessage::KeyUpdate(update)) => {
                self.handle_key_update(update)?;
                Ok(true)
            }
            (state, message) => Err(TlsError::unexpected(alloc::format!(
                "{} not expected in state {:?}",
                message.name(),
                state
            ))),
        }
    }

    // ── ServerHello / HelloRetryRequest ─────────────────────

    /// Checks shared by ServerHello and HelloRetryRequest; returns the
    /// selected suite.
    fn negotiate(&self, hello: &ServerHello) -> Result<CipherSuite, TlsError> {
        if hello.compression_method != 0 {
            return Err(TlsError::illegal("non-null compression method"));
        }
        if hello.session_id_echo != self.session_id {
            return Err(TlsError::illegal("legacy_session_id_echo does not match"));
        }
        match hello.selected_version {
            Some(TLS13_VERSION) => {}
            Some(_) => return Err(TlsError::illegal("server selected a version that was not offered")),
            None => {
                return Err(TlsError::negotiation(
                    AlertDescription::ProtocolVersion,
                    "server did not negotiate TLS 1.3",
                ))
            }
        }
        let suite = CipherSuite::from_u16(hello.cipher_suite)
            .filter(|s| self.config.cipher_suites.contains(s))
            .ok_or_else(|| {
                TlsError::negotiation(
                    AlertDescription::IllegalParameter,
                    alloc::format!(
                        "server selected cipher suite {:#06x} that was not offered",
                        hello.cipher_suite
                    ),
                )
            })?;
        if let Some(retry_suite) = self.retry_suite {
            if retry_suite != suite {
                return Err(TlsError::negotiation(
                    AlertDescription::IllegalParameter,
                    "ServerHello suite differs from HelloRetryRequest",
                ));
            }
        }
        Ok(suite)
    }

    fn handle_retry_request(&mut self, hrr: ServerHello, raw: &[u8]) -> Result<(), TlsError> {
        if self.retried {
            return Err(TlsError::unexpected("second HelloRetryRequest"));
        }
        let suite = self.negotiate(&hrr)?;
        if hrr.selected_group.is_none() && hrr.cookie.is_none() {
            return Err(TlsError::illegal("HelloRetryRequest would not change the ClientHello"));
        }
        let new_group = match hrr.selected_group {
            Some(code) => {
                let group = NamedGroup::from_u16(code)
                    .filter(|g| self.config.groups.contains(g))
                    .ok_or_else(|| {
                        TlsError::negotiation(
                            AlertDescription::IllegalParameter,
                            "HelloRetryRequest selected a group that was not offered",
                        )
                    })?;
                if self.key_shares.iter().any(|k| k.group() == group) {
                    return Err(TlsError::illegal(
                        "HelloRetryRequest selected a group that already has a key share",
                    ));
                }
                Some(group)
            }
            None => None,
        };

        let hash = suite.params().hash;
        self.transcript.rollup_for_retry(hash)?;
        self.transcript.append(raw);
        self.retried = true;
        self.retry_suite = Some(suite);

        if let Some(group) = new_group {
            let share = KeyShare::generate(group, self.config.rng.as_ref())?;
            self.key_shares = alloc::vec![share];
        }
        let entries = self.key_share_entries();
        let mut hello = self.hello.take().ok_or_else(|| {
            TlsError::protocol(AlertDescription::InternalError, "ClientHello not retained")
        })?;
        hello.key_shares = entries;
        hello.cookie = hrr.cookie;
        let raw = hello.encode();
        self.transcript.append(&raw);
        self.send_handshake(&raw)?;
        self.hello = Some(hello);
        log::debug!(
            "[KPIO TLS] HelloRetryRequest: suite={} group={:?}",
            suite.name(),
            new_group
        );
        Ok(())
    }

    fn handle_server_hello(&mut self, hello: ServerHello, raw: &[u8]) -> Result<(), TlsError> {
        let suite = self.negotiate(&hello)?;
        if hello.pre_shared_key.is_some() {
            return Err(TlsError::protocol(
                AlertDescription::UnsupportedExtension,
                "server selected a PSK that was not offered",
            ));
        }
        let share = hello.key_share.as_ref().ok_or_else(|| {
            TlsError::negotiation(AlertDescription::MissingExtension, "ServerHello without key_share")
        })?;
        let ours = self
            .key_shares
            .iter()
            .find(|k| k.group().to_u16() == share.group)
            .ok_or_else(|| {
                TlsError::negotiation(
                    AlertDescription::IllegalParameter,
                    "server key share is for a group the client did not share",
                )
            })?;
        let shared = ours.agree(&share.key_exchange)?;

        let params = suite.params();
        self.transcript.start_hash(params.hash)?;
        self.transcript.append(raw);
        let hello_hash = self.transcript.snapshot(Checkpoint::ServerHello)?;

        let mut schedule = KeySchedule::new(params.hash);
        schedule.input_shared_secret(&shared, &hello_hash)?;
        let server_keys =
            traffic_keys(params.hash, params.aead, schedule.server_handshake_traffic_secret()?)?;
        let client_keys =
            traffic_keys(params.hash, params.aead, schedule.client_handshake_traffic_secret()?)?;
        self.records.install(Direction::Server, params.aead, &server_keys)?;
        self.records.install(Direction::Client, params.aead, &client_keys)?;

        self.key_schedule = Some(schedule);
        self.params = Some(params);
        self.key_shares.clear();
        log::debug!(
            "[KPIO TLS] negotiated {} with {:?}",
            suite.name(),
            NamedGroup::from_u16(share.group)
        );
        self.set_state(State::ServerHelloReceived);
        Ok(())
    }

    // ── Encrypted server flight ─────────────────────────────

    fn handle_encrypted_extensions(&mut self, ee: EncryptedExtensions, raw: &[u8]) -> Result<(), TlsError> {
        let sent_sni = self.hello.as_ref().is_some_and(|h| h.server_name.is_some());
        if ee.server_name_ack && !sent_sni {
            return Err(TlsError::protocol(
                AlertDescription::UnsupportedExtension,
                "server acknowledged SNI that was not sent",
            ));
        }
        if ee.early_data {
            return Err(TlsError::protocol(
                AlertDescription::UnsupportedExtension,
                "early_data accepted but not offered",
            ));
        }
        if let Some(protocol) = &ee.alpn {
            if self.config.alpn_protocols.is_empty() {
                return Err(TlsError::protocol(
                    AlertDescription::UnsupportedExtension,
                    "ALPN selected but not offered",
                ));
            }
            if !self.config.alpn_protocols.contains(protocol) {
                return Err(TlsError::negotiation(
                    AlertDescription::IllegalParameter,
                    "server selected an ALPN protocol that was not offered",
                ));
            }
            log::debug!(
                "[KPIO TLS] ALPN: {}",
                core::str::from_utf8(protocol).unwrap_or("<binary>")
            );
        }
        self.alpn = ee.alpn;
        self.transcript.append(raw);
        self.set_state(State::EncryptedExtensionsReceived);
        Ok(())
    }

    fn handle_certificate_request(&mut self, req: CertificateRequest, raw: &[u8]) -> Result<(), TlsError> {
        log::debug!("[KPIO TLS] server requested a client certificate; none will be sent");
        self.certificate_request = Some(req.context);
        self.transcript.append(raw);
        Ok(())
    }

    fn handle_certificate(&mut self, cert: Certificate, raw: &[u8]) -> Result<(), TlsError> {
        if !cert.context.is_empty() {
            return Err(TlsError::illegal("server certificate_request_context must be empty"));
        }
        if cert.entries.is_empty() {
            return Err(TlsError::decode("server sent an empty certificate list"));
        }
        let chain = PeerCertificateChain::new(cert.entries.into_iter().map(|e| e.cert_data).collect());
        let now = self.config.time.now();
        let verdict =
            self.config
                .validator
                .validate_chain(&chain, &self.server_name, &self.config.trust_store, now);
        if !verdict.valid {
            return Err(TlsError::certificate(verdict.alert, verdict.reason));
        }
        self.leaf_key = Some(self.config.validator.leaf_public_key(&chain)?);
        log::debug!("[KPIO TLS] certificate chain of {} accepted", chain.len());
        self.peer_chain = chain;

        self.transcript.append(raw);
        self.transcript.snapshot(Checkpoint::ServerCertificate)?;
        self.set_state(State::CertificateReceived);
        Ok(())
    }

    fn handle_certificate_verify(&mut self, cv: CertificateVerify, raw: &[u8]) -> Result<(), TlsError> {
        let scheme = SignatureScheme::from_u16(cv.scheme)
            .filter(|s| s.allowed_in_certificate_verify() && self.config.signature_schemes.contains(s))
            .ok_or_else(|| {
                TlsError::negotiation(
                    AlertDescription::IllegalParameter,
                    alloc::format!("CertificateVerify uses scheme {:#06x} that was not offered", cv.scheme),
                )
            })?;
        let key = self.leaf_key.as_ref().ok_or_else(|| {
            TlsError::protocol(AlertDescription::InternalError, "no leaf public key")
        })?;
        if !key.is_compatible(scheme) {
            return Err(TlsError::illegal(alloc::format!(
                "{:?} signature from a {} key",
                scheme,
                key.algorithm_name()
            )));
        }
        let hash = self.transcript.get(Checkpoint::ServerCertificate).ok_or_else(|| {
            TlsError::protocol(AlertDescription::InternalError, "certificate transcript missing")
        })?;
        let content = signed_content(SERVER_SIGNATURE_CONTEXT, hash);
        if !self.config.verifier.verify(key, scheme, &content, &cv.signature) {
            return Err(TlsError::crypto(
                AlertDescription::DecryptError,
                "CertificateVerify signature is invalid",
            ));
        }
        self.transcript.append(raw);
        self.transcript.snapshot(Checkpoint::ServerCertificateVerify)?;
        self.set_state(State::CertificateVerifyReceived);
        Ok(())
    }

    fn handle_finished(&mut self, fin: Finished, raw: &[u8]) -> Result<(), TlsError> {
        let params = self.params()?;
        let hash = self
            .transcript
            .get(Checkpoint::ServerCertificateVerify)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                TlsError::protocol(AlertDescription::InternalError, "verify transcript missing")
            })?;
        let base_key = Zeroizing::new(self.schedule()?.server_handshake_traffic_secret()?.to_vec());
        let expected = Zeroizing::new(finished_verify_data(params.hash, &base_key, &hash)?);
        let matches = expected.len() == fin.verify_data.len()
            && bool::from(expected.as_slice().ct_eq(&fin.verify_data));
        if !matches {
            return Err(TlsError::crypto(
                AlertDescription::DecryptError,
                "server Finished verify_data mismatch",
            ));
        }
        self.transcript.append(raw);
        let server_finished_hash = self.transcript.snapshot(Checkpoint::ServerFinished)?;
        self.set_state(State::FinishedReceived);

        self.schedule()?.derive_application_secrets(&server_finished_hash)?;
        let server_app = traffic_keys(
            params.hash,
            params.aead,
            self.schedule()?.server_application_traffic_secret()?,
        )?;
        self.records.install(Direction::Server, params.aead, &server_app)?;

        self.send_client_finished(params)?;

        let client_app = traffic_keys(
            params.hash,
            params.aead,
            self.schedule()?.client_application_traffic_secret()?,
        )?;
        self.records.install(Direction::Client, params.aead, &client_app)?;
        self.hello = None;
        self.set_state(State::Connected);
        Ok(())
    }

    /// Client flight: optional compat CCS, empty Certificate if one was
    /// requested, then Finished under the client handshake key.
    fn send_client_finished(&mut self, params: CipherSuiteParams) -> Result<(), TlsError> {
        if self.config.middlebox_compat {
            self.outgoing
                .extend_from_slice(&OpaqueRecord::new(ContentType::ChangeCipherSpec, alloc::vec![0x01]).encode());
        }
        if let Some(context) = self.certificate_request.take() {
            let raw = Certificate {
                context,
                entries: Vec::new(),
            }
            .encode();
            self.transcript.append(&raw);
            self.send_handshake(&raw)?;
        }
        let hash = self.transcript.current()?;
        let base_key = Zeroizing::new(self.schedule()?.client_handshake_traffic_secret()?.to_vec());
        let raw = Finished {
            verify_data: finished_verify_data(params.hash, &base_key, &hash)?,
        }
        .encode();
        self.transcript.append(&raw);
        self.send_handshake(&raw)?;
        let client_finished_hash = self.transcript.snapshot(Checkpoint::ClientFinished)?;
        self.schedule()?.derive_resumption_master(&client_finished_hash)?;
        Ok(())
    }

    // ── Post-handshake ──────────────────────────────────────

    fn handle_new_session_ticket(&mut self, ticket: NewSessionTicketMessage) -> Result<(), TlsError> {
        let params = self.params()?;
        let psk = Zeroizing::new(self.schedule()?.resumption_psk(&ticket.nonce)?);
        log::debug!(
            "[KPIO TLS] session ticket received (lifetime {}s)",
            ticket.lifetime
        );
        self.tickets.push(NewSessionTicket {
            lifetime: ticket.lifetime,
            age_add: ticket.age_add,
            nonce: ticket.nonce,
            ticket: ticket.ticket,
            max_early_data: ticket.max_early_data,
            cipher_suite: params.suite,
            received_at: self.config.time.now(),
            resumption_psk: psk,
        });
        Ok(())
    }

    fn handle_key_update(&mut self, update: KeyUpdate) -> Result<(), TlsError> {
        let params = self.params()?;
        let secret = Zeroizing::new(self.schedule()?.update_server_application_secret()?.to_vec());
        let keys = traffic_keys(params.hash, params.aead, &secret)?;
        self.records.install(Direction::Server, params.aead, &keys)?;
        log::debug!("[KPIO TLS] server application key updated");
        if update.update_requested {
            self.send_key_update(false)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FixedTime;
    use crate::error::ErrorKind;
    use crate::handshake::{CertificateEntry, HS_CLIENT_HELLO, HRR_RANDOM};
    use crate::record::RecordReader;

    fn config() -> Arc<TlsConfig> {
        Arc::new(
            TlsConfig::builder()
                .rng_seed([0x42; 32])
                .time_source(Arc::new(FixedTime(1_750_000_000)))
                .build()
                .unwrap(),
        )
    }

    fn started() -> (ClientSession, ClientHello) {
        let mut session = ClientSession::new("server.test", config());
        session.start().unwrap();
        let out = session.take_output();
        let mut reader = RecordReader::new();
        reader.push(&out);
        let record = reader.next_record().unwrap().unwrap();
        assert_eq!(record.content_type, ContentType::Handshake);
        assert_eq!(record.payload[0], HS_CLIENT_HELLO);
        let hello = ClientHello::decode(&record.payload[4..]).unwrap();
        (session, hello)
    }

    fn server_hello_for(hello: &ClientHello) -> ServerHello {
        ServerHello {
            random: [0x55; 32],
            session_id_echo: hello.session_id.clone(),
            cipher_suite: 0x1301,
            selected_version: Some(TLS13_VERSION),
            key_share: Some(KeyShareEntry {
                group: 0x001d,
                key_exchange: crate::crypto::x25519_base(&[9; 32]).to_vec(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_client_hello_contents() {
        let (session, hello) = started();
        assert_eq!(session.state(), State::ClientHelloSent);
        assert_eq!(hello.server_name.as_deref(), Some("server.test"));
        assert_eq!(hello.cipher_suites, [0x1301, 0x1302, 0x1303]);
        assert_eq!(hello.supported_versions, [TLS13_VERSION]);
        assert_eq!(hello.supported_groups, [0x001d, 0x0017]);
        assert_eq!(hello.key_shares.len(), 1);
        assert_eq!(hello.key_shares[0].group, 0x001d);
        assert_eq!(hello.session_id.len(), 32);
        assert_eq!(hello.alpn, [b"h2".to_vec(), b"http/1.1".to_vec()]);
        assert!(hello.cookie.is_none());
    }

    #[test]
    fn test_ip_literal_has_no_sni() {
        let mut session = ClientSession::new("192.0.2.7", config());
        session.start().unwrap();
        let out = session.take_output();
        let hello = ClientHello::decode(&out[9..]).unwrap();
        assert_eq!(hello.server_name, None);
    }

    #[test]
    fn test_start_twice_is_rejected_without_failing() {
        let (mut session, _) = started();
        assert!(session.start().is_err());
        // misuse of the API is not a protocol failure
        assert_eq!(session.state(), State::ClientHelloSent);
        assert!(session.take_output().is_empty());
    }

    #[test]
    fn test_server_hello_installs_handshake_keys() {
        let (mut session, hello) = started();
        session
            .process_message(HandshakeMessage::ServerHello(server_hello_for(&hello)))
            .unwrap();
        assert_eq!(session.state(), State::ServerHelloReceived);
        assert_eq!(session.negotiated_cipher_suite(), Some(CipherSuite::Aes128GcmSha256));
        assert!(session.records.is_protected(Direction::Server));
        assert!(session.records.is_protected(Direction::Client));
    }

    #[test]
    fn test_unoffered_suite_is_negotiation_error() {
        let config = Arc::new(
            TlsConfig::builder()
                .rng_seed([1; 32])
                .time_source(Arc::new(FixedTime(0)))
                .cipher_suites(&[CipherSuite::ChaCha20Poly1305Sha256])
                .build()
                .unwrap(),
        );
        let mut session = ClientSession::new("server.test", config);
        session.start().unwrap();
        let out = session.take_output();
        let hello = ClientHello::decode(&out[9..]).unwrap();
        let err = session
            .process_message(HandshakeMessage::ServerHello(server_hello_for(&hello)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Negotiation);
        assert_eq!(session.state(), State::Error);
        // plaintext fatal alert queued
        assert_eq!(session.take_output(), [21, 3, 3, 0, 2, 2, 47]);
        // terminal error is sticky
        assert_eq!(session.read_tls(&[]).unwrap_err(), err);
    }

    #[test]
    fn test_session_id_echo_must_match() {
        let (mut session, hello) = started();
        let mut sh = server_hello_for(&hello);
        sh.session_id_echo = alloc::vec![0; 32];
        let err = session.process_message(HandshakeMessage::ServerHello(sh)).unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::IllegalParameter));
    }

    #[test]
    fn test_missing_supported_versions() {
        let (mut session, hello) = started();
        let mut sh = server_hello_for(&hello);
        sh.selected_version = None;
        let err = session.process_message(HandshakeMessage::ServerHello(sh)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Negotiation);
        assert_eq!(err.alert(), Some(AlertDescription::ProtocolVersion));
    }

    #[test]
    fn test_low_order_server_share() {
        let (mut session, hello) = started();
        let mut sh = server_hello_for(&hello);
        sh.key_share = Some(KeyShareEntry { group: 0x001d, key_exchange: alloc::vec![0; 32] });
        let err = session.process_message(HandshakeMessage::ServerHello(sh)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Crypto);
    }

    #[test]
    fn test_retry_request_resends_hello() {
        let (mut session, hello) = started();
        let hrr = ServerHello {
            random: HRR_RANDOM,
            session_id_echo: hello.session_id.clone(),
            cipher_suite: 0x1301,
            selected_version: Some(TLS13_VERSION),
            selected_group: Some(0x0017),
            cookie: Some(alloc::vec![0xc0, 0x0c]),
            ..Default::default()
        };
        session.process_message(HandshakeMessage::ServerHello(hrr.clone())).unwrap();
        assert_eq!(session.state(), State::ClientHelloSent);

        let out = session.take_output();
        let second = ClientHello::decode(&out[9..]).unwrap();
        assert_eq!(second.random, hello.random);
        assert_eq!(second.session_id, hello.session_id);
        assert_eq!(second.cookie.as_deref(), Some(&[0xc0, 0x0c][..]));
        assert_eq!(second.key_shares.len(), 1);
        assert_eq!(second.key_shares[0].group, 0x0017);
        assert_eq!(second.key_shares[0].key_exchange.len(), 65);

        // a second retry is fatal
        let err = session.process_message(HandshakeMessage::ServerHello(hrr)).unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::UnexpectedMessage));
    }

    #[test]
    fn test_retry_for_already_shared_group() {
        let (mut session, hello) = started();
        let hrr = ServerHello {
            random: HRR_RANDOM,
            session_id_echo: hello.session_id.clone(),
            cipher_suite: 0x1301,
            selected_version: Some(TLS13_VERSION),
            selected_group: Some(0x001d),
            ..Default::default()
        };
        let err = session.process_message(HandshakeMessage::ServerHello(hrr)).unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::IllegalParameter));
    }

    #[test]
    fn test_finished_before_certificate_is_rejected() {
        let (mut session, hello) = started();
        session
            .process_message(HandshakeMessage::ServerHello(server_hello_for(&hello)))
            .unwrap();
        session
            .process_message(HandshakeMessage::EncryptedExtensions(EncryptedExtensions::default()))
            .unwrap();
        let err = session
            .process_message(HandshakeMessage::Finished(Finished { verify_data: alloc::vec![0; 32] }))
            .unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::UnexpectedMessage));
        assert_eq!(session.state(), State::Error);
        // the alert went out under the client handshake key
        let out = session.take_output();
        assert_eq!(out[0], 23);
        assert!(session.key_schedule.is_none());
    }

    #[test]
    fn test_unoffered_alpn_rejected() {
        let (mut session, hello) = started();
        session
            .process_message(HandshakeMessage::ServerHello(server_hello_for(&hello)))
            .unwrap();
        let ee = EncryptedExtensions { alpn: Some(b"spdy/3".to_vec()), ..Default::default() };
        let err = session.process_message(HandshakeMessage::EncryptedExtensions(ee)).unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::IllegalParameter));
    }

    #[test]
    fn test_untrusted_certificate_is_certificate_error() {
        let (mut session, hello) = started();
        session
            .process_message(HandshakeMessage::ServerHello(server_hello_for(&hello)))
            .unwrap();
        session
            .process_message(HandshakeMessage::EncryptedExtensions(EncryptedExtensions::default()))
            .unwrap();
        let cert = Certificate {
            context: Vec::new(),
            entries: alloc::vec![CertificateEntry {
                cert_data: include_bytes!("../tests/data/leaf.der").to_vec(),
                extensions: Vec::new(),
            }],
        };
        let err = session.process_message(HandshakeMessage::Certificate(cert)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Certificate);
        assert_eq!(err.alert(), Some(AlertDescription::UnknownCa));
    }

    #[test]
    fn test_plaintext_handshake_after_keys() {
        let (mut session, hello) = started();
        session
            .process_message(HandshakeMessage::ServerHello(server_hello_for(&hello)))
            .unwrap();
        let ee = EncryptedExtensions::default().encode();
        let err = session.read_tls(&encode_plaintext(ContentType::Handshake, &ee)).unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::UnexpectedMessage));
    }

    #[test]
    fn test_close_and_closed_errors() {
        let (mut session, _) = started();
        session.close().unwrap();
        assert_eq!(session.state(), State::Closed);
        assert_eq!(session.take_output(), [21, 3, 3, 0, 2, 1, 0]);
        let err = session.write_plaintext(b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(session.close().is_ok());
    }

    #[test]
    fn test_fatal_alert_from_server() {
        let (mut session, _) = started();
        let err = session.read_tls(&[21, 3, 3, 0, 2, 2, 40]).unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::HandshakeFailure));
        assert_eq!(session.state(), State::Error);
        // no alert is sent in reply
        assert!(session.take_output().is_empty());
    }

    #[test]
    fn test_compat_change_cipher_spec_ignored_once() {
        let (mut session, _) = started();
        session.read_tls(&[20, 3, 3, 0, 1, 1]).unwrap();
        assert_eq!(session.state(), State::ClientHelloSent);
        let err = session.read_tls(&[20, 3, 3, 0, 1, 1]).unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::UnexpectedMessage));
    }

    #[test]
    fn test_data_before_start() {
        let mut session = ClientSession::new("server.test", config());
        assert!(session.read_tls(&[22, 3, 3, 0, 0]).is_err());
        assert_eq!(session.state(), State::Error);
    }
}
