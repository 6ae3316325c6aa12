//! A scripted TLS 1.3 server assembled from the crate's own building
//! blocks, plus the client-side fixtures the integration tests share.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use kpio_tls::crypto::{ChaChaRng, HashAlgorithm, SecureRandom};
use kpio_tls::handshake::{
    signed_content, Certificate, CertificateEntry, CertificateRequest, CertificateVerify,
    ClientHello, EncryptedExtensions, Finished, HandshakeJoiner, HandshakeMessage, KeyShareEntry,
    KeyUpdate, NewSessionTicketMessage, ServerHello, HRR_RANDOM, SERVER_SIGNATURE_CONTEXT,
    TLS13_VERSION,
};
use kpio_tls::key_schedule::{finished_verify_data, traffic_keys, KeySchedule};
use kpio_tls::kx::KeyShare;
use kpio_tls::record::{encode_plaintext, ContentType, Direction, OpaqueRecord, RecordLayer, RecordReader};
use kpio_tls::transcript::Transcript;
use kpio_tls::{
    CipherSuite, ClientSession, DefaultSignatureVerifier, FixedTime, NamedGroup, PublicKey,
    RecordPadding, SignatureScheme, SignatureVerifier, TlsConfig, TlsConfigBuilder, TlsError,
    Transport, TransportRead,
};

pub const ROOT: &[u8] = include_bytes!("../data/root.der");
pub const INTERMEDIATE: &[u8] = include_bytes!("../data/intermediate.der");
pub const LEAF: &[u8] = include_bytes!("../data/leaf.der");

/// 2025-06-15, inside every fixture's validity window.
pub const NOW: u64 = 1_750_000_000;

const TEST_SIGNATURE_PREFIX: &[u8] = b"test-sig:";

/// Stand-in for a CertificateVerify signature: the fixtures ship no private
/// keys, so the server "signs" with a digest the test verifier recognises.
pub fn test_signature(message: &[u8]) -> Vec<u8> {
    let mut sig = TEST_SIGNATURE_PREFIX.to_vec();
    sig.extend_from_slice(&HashAlgorithm::Sha256.hash(message));
    sig
}

/// Accepts `test_signature` values; everything else, including every
/// certificate signature in the chain, goes to the real verifier.
pub struct TestVerifier;

impl SignatureVerifier for TestVerifier {
    fn verify(&self, key: &PublicKey, scheme: SignatureScheme, message: &[u8], signature: &[u8]) -> bool {
        if signature.starts_with(TEST_SIGNATURE_PREFIX) {
            return key.is_compatible(scheme) && signature == test_signature(message).as_slice();
        }
        DefaultSignatureVerifier.verify(key, scheme, message, signature)
    }
}

pub fn client_builder() -> TlsConfigBuilder {
    TlsConfig::builder()
        .rng_seed([0x5a; 32])
        .time_source(Arc::new(FixedTime(NOW)))
        .signature_verifier(Arc::new(TestVerifier))
        .add_trust_anchor(ROOT)
        .unwrap()
}

pub fn client_config() -> Arc<TlsConfig> {
    Arc::new(client_builder().build().unwrap())
}

// ── Server ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub suite: CipherSuite,
    pub group: NamedGroup,
    pub alpn: Option<Vec<u8>>,
    pub chain: Vec<Vec<u8>>,
    /// Answer the first ClientHello with a HelloRetryRequest for `group`.
    pub hello_retry: bool,
    pub cookie: Option<Vec<u8>>,
    pub middlebox_ccs: bool,
    pub certificate_request: bool,
    /// One handshake message per record instead of one record for all.
    pub split_flight: bool,
    pub omit_certificate: bool,
    pub bad_signature: bool,
    pub corrupt_finished: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            suite: CipherSuite::Aes128GcmSha256,
            group: NamedGroup::X25519,
            alpn: None,
            chain: vec![LEAF.to_vec(), INTERMEDIATE.to_vec()],
            hello_retry: false,
            cookie: None,
            middlebox_ccs: true,
            certificate_request: false,
            split_flight: false,
            omit_certificate: false,
            bad_signature: false,
            corrupt_finished: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitHello,
    AwaitFinished,
    Connected,
}

pub struct TestServer {
    opts: ServerOptions,
    rng: ChaChaRng,
    phase: Phase,
    retried: bool,
    reader: RecordReader,
    joiner: HandshakeJoiner,
    records: RecordLayer,
    transcript: Transcript,
    schedule: Option<KeySchedule>,
    session_id: Vec<u8>,

    /// Bytes queued for the client.
    pub outbound: VecDeque<Vec<u8>>,
    /// Report `Closed` once `outbound` drains.
    pub hang_up: bool,
    pub client_hellos: Vec<ClientHello>,
    pub client_certificate: Option<Certificate>,
    pub client_finished_ok: bool,
    pub key_updates_received: usize,
    pub ccs_seen: usize,
    pub alerts: Vec<(u8, u8)>,
    pub received: Vec<u8>,
    /// Lengths of protected records received from the client.
    pub protected_record_lengths: Vec<usize>,
}

impl TestServer {
    pub fn new(opts: ServerOptions) -> Self {
        Self {
            opts,
            rng: ChaChaRng::from_seed([0xa5; 32]),
            phase: Phase::AwaitHello,
            retried: false,
            reader: RecordReader::new(),
            joiner: HandshakeJoiner::new(),
            records: RecordLayer::new(),
            transcript: Transcript::new(),
            schedule: None,
            session_id: Vec::new(),
            outbound: VecDeque::new(),
            hang_up: false,
            client_hellos: Vec::new(),
            client_certificate: None,
            client_finished_ok: false,
            key_updates_received: 0,
            ccs_seen: 0,
            alerts: Vec::new(),
            received: Vec::new(),
            protected_record_lengths: Vec::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.phase == Phase::Connected
    }

    /// Everything queued for the client, as one byte string.
    pub fn drain_outbound(&mut self) -> Vec<u8> {
        self.outbound.drain(..).flatten().collect()
    }

    /// Process bytes written by the client.
    pub fn receive(&mut self, bytes: &[u8]) {
        self.reader.push(bytes);
        while let Some(record) = self.reader.next_record().expect("client record framing") {
            match record.content_type {
                ContentType::ChangeCipherSpec => {
                    assert_eq!(record.payload, [1]);
                    self.ccs_seen += 1;
                }
                ContentType::Alert => self.alerts.push((record.payload[0], record.payload[1])),
                ContentType::Handshake => {
                    self.joiner.push(&record.payload);
                    while let Some(raw) = self.joiner.next_message().expect("client handshake framing") {
                        self.on_client_hello(&raw);
                    }
                }
                ContentType::ApplicationData => {
                    self.protected_record_lengths.push(record.payload.len());
                    let (content_type, content) = self
                        .records
                        .decrypt(Direction::Client, &record.payload)
                        .expect("client record decrypts");
                    match content_type {
                        ContentType::Handshake => {
                            self.joiner.push(&content);
                            while let Some(raw) = self.joiner.next_message().expect("client handshake framing") {
                                self.on_protected_handshake(&raw);
                            }
                        }
                        ContentType::Alert => self.alerts.push((content[0], content[1])),
                        ContentType::ApplicationData => self.received.extend_from_slice(&content),
                        ContentType::ChangeCipherSpec => panic!("protected change_cipher_spec"),
                    }
                }
            }
        }
    }

    // ── Handshake ───────────────────────────────────────────

    fn on_client_hello(&mut self, raw: &[u8]) {
        assert_eq!(self.phase, Phase::AwaitHello, "unexpected plaintext handshake");
        let hello = ClientHello::decode(&raw[4..]).expect("ClientHello decodes");
        self.session_id = hello.session_id.clone();
        self.transcript.append(raw);
        let params = self.opts.suite.params();

        if self.opts.hello_retry && !self.retried {
            self.retried = true;
            self.transcript.rollup_for_retry(params.hash).unwrap();
            let hrr = ServerHello {
                random: HRR_RANDOM,
                session_id_echo: self.session_id.clone(),
                cipher_suite: self.opts.suite.to_u16(),
                selected_version: Some(TLS13_VERSION),
                selected_group: Some(self.opts.group.to_u16()),
                cookie: self.opts.cookie.clone(),
                ..Default::default()
            }
            .encode();
            self.transcript.append(&hrr);
            self.outbound.push_back(encode_plaintext(ContentType::Handshake, &hrr));
            self.client_hellos.push(hello);
            return;
        }

        let client_share = hello
            .key_shares
            .iter()
            .find(|k| k.group == self.opts.group.to_u16())
            .expect("client sent a share for the server's group");
        let share = KeyShare::generate(self.opts.group, &self.rng).unwrap();
        let shared = share.agree(&client_share.key_exchange).unwrap();
        let mut random = [0u8; 32];
        self.rng.fill(&mut random).unwrap();
        let server_hello = ServerHello {
            random,
            session_id_echo: self.session_id.clone(),
            cipher_suite: self.opts.suite.to_u16(),
            selected_version: Some(TLS13_VERSION),
            key_share: Some(KeyShareEntry {
                group: self.opts.group.to_u16(),
                key_exchange: share.public_key().to_vec(),
            }),
            ..Default::default()
        }
        .encode();
        self.client_hellos.push(hello);

        self.transcript.start_hash(params.hash).unwrap();
        self.transcript.append(&server_hello);
        let hello_hash = self.transcript.current().unwrap();
        let mut schedule = KeySchedule::new(params.hash);
        schedule.input_shared_secret(&shared, &hello_hash).unwrap();
        let server_keys =
            traffic_keys(params.hash, params.aead, schedule.server_handshake_traffic_secret().unwrap()).unwrap();
        let client_keys =
            traffic_keys(params.hash, params.aead, schedule.client_handshake_traffic_secret().unwrap()).unwrap();
        self.records.install(Direction::Server, params.aead, &server_keys).unwrap();
        self.records.install(Direction::Client, params.aead, &client_keys).unwrap();

        self.outbound.push_back(encode_plaintext(ContentType::Handshake, &server_hello));
        if self.opts.middlebox_ccs {
            self.outbound
                .push_back(OpaqueRecord::new(ContentType::ChangeCipherSpec, vec![1]).encode());
        }

        let mut flight = Vec::new();
        flight.push(EncryptedExtensions { alpn: self.opts.alpn.clone(), ..Default::default() }.encode());
        if self.opts.certificate_request {
            flight.push(
                CertificateRequest {
                    context: vec![7],
                    signature_algorithms: vec![SignatureScheme::EcdsaSecp256r1Sha256.to_u16()],
                }
                .encode(),
            );
        }
        for message in &flight {
            self.transcript.append(message);
        }
        if !self.opts.omit_certificate {
            let certificate = Certificate {
                context: Vec::new(),
                entries: self
                    .opts
                    .chain
                    .iter()
                    .map(|der| CertificateEntry { cert_data: der.clone(), extensions: Vec::new() })
                    .collect(),
            }
            .encode();
            self.transcript.append(&certificate);
            flight.push(certificate);

            let content = signed_content(SERVER_SIGNATURE_CONTEXT, &self.transcript.current().unwrap());
            let signature = if self.opts.bad_signature {
                let mut sig = test_signature(&content);
                let last = sig.len() - 1;
                sig[last] ^= 0x80;
                sig
            } else {
                test_signature(&content)
            };
            let verify = CertificateVerify {
                scheme: SignatureScheme::EcdsaSecp256r1Sha256.to_u16(),
                signature,
            }
            .encode();
            self.transcript.append(&verify);
            flight.push(verify);
        }

        let mut verify_data = finished_verify_data(
            params.hash,
            schedule.server_handshake_traffic_secret().unwrap(),
            &self.transcript.current().unwrap(),
        )
        .unwrap();
        if self.opts.corrupt_finished {
            verify_data[0] ^= 0x01;
        }
        let finished = Finished { verify_data }.encode();
        self.transcript.append(&finished);
        flight.push(finished);

        if self.opts.split_flight {
            for message in &flight {
                self.seal(ContentType::Handshake, message);
            }
        } else {
            self.seal(ContentType::Handshake, &flight.concat());
        }

        schedule
            .derive_application_secrets(&self.transcript.current().unwrap())
            .unwrap();
        let server_app =
            traffic_keys(params.hash, params.aead, schedule.server_application_traffic_secret().unwrap()).unwrap();
        self.records.install(Direction::Server, params.aead, &server_app).unwrap();
        self.schedule = Some(schedule);
        self.phase = Phase::AwaitFinished;
    }

    fn on_protected_handshake(&mut self, raw: &[u8]) {
        let params = self.opts.suite.params();
        let message = HandshakeMessage::decode_message(raw).expect("client handshake decodes");
        match (self.phase, message) {
            (Phase::AwaitFinished, HandshakeMessage::Certificate(cert)) => {
                self.transcript.append(raw);
                self.client_certificate = Some(cert);
            }
            (Phase::AwaitFinished, HandshakeMessage::Finished(fin)) => {
                let schedule = self.schedule.as_mut().unwrap();
                let expected = finished_verify_data(
                    params.hash,
                    schedule.client_handshake_traffic_secret().unwrap(),
                    &self.transcript.current().unwrap(),
                )
                .unwrap();
                self.client_finished_ok = expected == fin.verify_data;
                self.transcript.append(raw);
                schedule
                    .derive_resumption_master(&self.transcript.current().unwrap())
                    .unwrap();
                let client_app = traffic_keys(
                    params.hash,
                    params.aead,
                    schedule.client_application_traffic_secret().unwrap(),
                )
                .unwrap();
                self.records.install(Direction::Client, params.aead, &client_app).unwrap();
                self.phase = Phase::Connected;
            }
            (Phase::Connected, HandshakeMessage::KeyUpdate(update)) => {
                self.key_updates_received += 1;
                let schedule = self.schedule.as_mut().unwrap();
                let secret = schedule.update_client_application_secret().unwrap().to_vec();
                let keys = traffic_keys(params.hash, params.aead, &secret).unwrap();
                self.records.install(Direction::Client, params.aead, &keys).unwrap();
                if update.update_requested {
                    self.send_key_update(false);
                }
            }
            (phase, other) => panic!("server got {} in {:?}", other.name(), phase),
        }
    }

    // ── Post-handshake ──────────────────────────────────────

    fn seal(&mut self, content_type: ContentType, data: &[u8]) {
        for chunk in data.chunks(1 << 14) {
            let record = self
                .records
                .encrypt(Direction::Server, chunk, content_type, RecordPadding::None)
                .unwrap();
            self.outbound.push_back(record);
        }
    }

    pub fn send_application_data(&mut self, data: &[u8]) {
        self.seal(ContentType::ApplicationData, data);
    }

    pub fn send_new_session_ticket(&mut self, ticket: &NewSessionTicketMessage) {
        self.seal(ContentType::Handshake, &ticket.encode());
    }

    /// Send KeyUpdate, then switch to the next server write key.
    pub fn send_key_update(&mut self, update_requested: bool) {
        let params = self.opts.suite.params();
        self.seal(ContentType::Handshake, &KeyUpdate { update_requested }.encode());
        let schedule = self.schedule.as_mut().unwrap();
        let secret = schedule.update_server_application_secret().unwrap().to_vec();
        let keys = traffic_keys(params.hash, params.aead, &secret).unwrap();
        self.records.install(Direction::Server, params.aead, &keys).unwrap();
    }

    pub fn send_alert(&mut self, level: u8, description: u8) {
        if self.records.is_protected(Direction::Server) {
            self.seal(ContentType::Alert, &[level, description]);
        } else {
            self.outbound
                .push_back(OpaqueRecord::new(ContentType::Alert, vec![level, description]).encode());
        }
    }

    pub fn resumption_psk(&self, nonce: &[u8]) -> Vec<u8> {
        self.schedule.as_ref().unwrap().resumption_psk(nonce).unwrap()
    }

    pub fn export(&self, label: &[u8], context: &[u8], length: usize) -> Vec<u8> {
        self.schedule.as_ref().unwrap().export(label, context, length).unwrap()
    }
}

// ── Plumbing ────────────────────────────────────────────────

/// In-memory transport whose peer is a `TestServer`.
pub struct Loopback {
    pub server: Rc<RefCell<TestServer>>,
    /// Deliver at most this many bytes per read.
    pub chunk: usize,
    /// Report `Closed` after this many bytes in total.
    pub limit: usize,
    delivered: usize,
    inbox: Vec<u8>,
}

impl Loopback {
    pub fn new(server: Rc<RefCell<TestServer>>) -> Self {
        Self { server, chunk: usize::MAX, limit: usize::MAX, delivered: 0, inbox: Vec::new() }
    }

    pub fn truncate_after(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk;
        self
    }
}

impl Transport for Loopback {
    fn read_bytes(&mut self) -> Result<TransportRead, TlsError> {
        let mut server = self.server.borrow_mut();
        let queued = server.drain_outbound();
        self.inbox.extend_from_slice(&queued);
        if self.delivered >= self.limit {
            return Ok(TransportRead::Closed);
        }
        if self.inbox.is_empty() {
            return Ok(if server.hang_up { TransportRead::Closed } else { TransportRead::WouldBlock });
        }
        let n = self.inbox.len().min(self.chunk).min(self.limit - self.delivered);
        self.delivered += n;
        Ok(TransportRead::Data(self.inbox.drain(..n).collect()))
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, TlsError> {
        self.server.borrow_mut().receive(data);
        Ok(data.len())
    }
}

pub fn server(opts: ServerOptions) -> Rc<RefCell<TestServer>> {
    Rc::new(RefCell::new(TestServer::new(opts)))
}

/// Shuttle bytes between a sans-IO session and the server until both go
/// quiet or the client fails.
pub fn pump(client: &mut ClientSession, server: &mut TestServer) -> Result<(), TlsError> {
    loop {
        let out = client.take_output();
        if !out.is_empty() {
            server.receive(&out);
        }
        let inbound = server.drain_outbound();
        if inbound.is_empty() {
            return Ok(());
        }
        client.read_tls(&inbound)?;
    }
}
