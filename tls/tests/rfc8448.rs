//! Replay of the RFC 8448 §3 "Simple 1-RTT Handshake" trace.
//!
//! The client's ephemeral key is fixed by the trace, so the session itself
//! cannot be replayed; instead each layer the session uses is fed the
//! published bytes and checked against the published secrets.

use hex_literal::hex;

use kpio_tls::crypto::{AeadAlgorithm, HashAlgorithm};
use kpio_tls::handshake::{
    signed_content, Finished, HandshakeJoiner, HandshakeMessage, ServerHello,
    SERVER_SIGNATURE_CONTEXT,
};
use kpio_tls::key_schedule::{finished_verify_data, traffic_keys, KeySchedule};
use kpio_tls::record::{ContentType, Direction, RecordLayer, RecordReader};
use kpio_tls::transcript::{Checkpoint, Transcript};
use kpio_tls::x509::X509Certificate;
use kpio_tls::{CipherSuite, DefaultSignatureVerifier, SignatureScheme, SignatureVerifier};

const CLIENT_HELLO: &[u8] = include_bytes!("data/rfc8448_client_hello.bin");
const SERVER_HELLO: &[u8] = include_bytes!("data/rfc8448_server_hello.bin");
const SERVER_FLIGHT: &[u8] = include_bytes!("data/rfc8448_server_flight.bin");
const SERVER_CERT: &[u8] = include_bytes!("data/rfc8448_server.der");

const SHARED_SECRET: [u8; 32] =
    hex!("8bd4054fb55b9d63fdfbacf9f04b9f0d35e6d63f537563efd46272900f89492d");

struct Replay {
    transcript: Transcript,
    schedule: KeySchedule,
    records: RecordLayer,
}

fn after_server_hello() -> Replay {
    let mut transcript = Transcript::new();
    transcript.append(CLIENT_HELLO);
    transcript.start_hash(HashAlgorithm::Sha256).unwrap();
    transcript.append(SERVER_HELLO);
    let hash = transcript.snapshot(Checkpoint::ServerHello).unwrap();
    assert_eq!(hash, hex!("860c06edc07858ee8e78f0e7428c58edd6b43f2ca3e6e95f02ed063cf0e1cad8"));

    let mut schedule = KeySchedule::new(HashAlgorithm::Sha256);
    schedule.input_shared_secret(&SHARED_SECRET, &hash).unwrap();
    let keys = traffic_keys(
        HashAlgorithm::Sha256,
        AeadAlgorithm::Aes128Gcm,
        schedule.server_handshake_traffic_secret().unwrap(),
    )
    .unwrap();
    let mut records = RecordLayer::new();
    records.install(Direction::Server, AeadAlgorithm::Aes128Gcm, &keys).unwrap();
    Replay { transcript, schedule, records }
}

/// The four messages of the encrypted server flight, header included.
fn server_flight(replay: &mut Replay) -> Vec<Vec<u8>> {
    let mut reader = RecordReader::new();
    reader.push(SERVER_FLIGHT);
    let record = reader.next_record().unwrap().unwrap();
    assert!(reader.next_record().unwrap().is_none());
    assert_eq!(record.content_type, ContentType::ApplicationData);

    let (content_type, plaintext) = replay.records.decrypt(Direction::Server, &record.payload).unwrap();
    assert_eq!(content_type, ContentType::Handshake);
    assert_eq!(plaintext.len(), 657);

    let mut joiner = HandshakeJoiner::new();
    joiner.push(&plaintext);
    let mut messages = Vec::new();
    while let Some(raw) = joiner.next_message().unwrap() {
        messages.push(raw);
    }
    messages
}

#[test]
fn server_hello_fields() {
    let hello = ServerHello::decode(&SERVER_HELLO[4..]).unwrap();
    assert!(!hello.is_retry_request());
    assert_eq!(CipherSuite::from_u16(hello.cipher_suite), Some(CipherSuite::Aes128GcmSha256));
    assert_eq!(hello.selected_version, Some(0x0304));
    let share = hello.key_share.unwrap();
    assert_eq!(share.group, 0x001d);
    assert_eq!(
        share.key_exchange,
        hex!("c9828876112095fe66762bdbf7c672e156d6cc253b833df1dd69b1b04e751f0f")
    );
}

#[test]
fn handshake_traffic_secrets() {
    let replay = after_server_hello();
    assert_eq!(
        replay.schedule.client_handshake_traffic_secret().unwrap(),
        hex!("b3eddb126e067f35a780b3abf45e2d8f3b1a950738f52e9600746a0e27a55a21")
    );
    assert_eq!(
        replay.schedule.server_handshake_traffic_secret().unwrap(),
        hex!("b67b7d690cc16c4e75e54213cb2d37b4e9c912bcded9105d42befd59d391ad38")
    );
}

#[test]
fn server_flight_decrypts_and_decodes() {
    let mut replay = after_server_hello();
    let messages = server_flight(&mut replay);
    let names: Vec<_> = messages
        .iter()
        .map(|raw| HandshakeMessage::decode_message(raw).unwrap().name())
        .collect();
    assert_eq!(names, ["EncryptedExtensions", "Certificate", "CertificateVerify", "Finished"]);
    assert_eq!(replay.records.sequence_number(Direction::Server), Some(1));
}

#[test]
fn certificate_verify_and_finished() {
    let mut replay = after_server_hello();
    let messages = server_flight(&mut replay);

    let HandshakeMessage::Certificate(cert) = HandshakeMessage::decode_message(&messages[1]).unwrap() else {
        panic!("expected Certificate");
    };
    assert_eq!(cert.entries.len(), 1);
    assert_eq!(cert.entries[0].cert_data, SERVER_CERT);
    let leaf = X509Certificate::from_der(&cert.entries[0].cert_data).unwrap();
    let key = leaf.public_key.clone().unwrap();

    replay.transcript.append(&messages[0]);
    replay.transcript.append(&messages[1]);
    let cert_hash = replay.transcript.snapshot(Checkpoint::ServerCertificate).unwrap();

    let HandshakeMessage::CertificateVerify(cv) = HandshakeMessage::decode_message(&messages[2]).unwrap() else {
        panic!("expected CertificateVerify");
    };
    let scheme = SignatureScheme::from_u16(cv.scheme).unwrap();
    assert_eq!(scheme, SignatureScheme::RsaPssRsaeSha256);
    let content = signed_content(SERVER_SIGNATURE_CONTEXT, &cert_hash);
    let verifier = DefaultSignatureVerifier;
    assert!(verifier.verify(&key, scheme, &content, &cv.signature));
    // bound to the transcript: a different hash must not verify
    let other = signed_content(SERVER_SIGNATURE_CONTEXT, &[0u8; 32]);
    assert!(!verifier.verify(&key, scheme, &other, &cv.signature));

    replay.transcript.append(&messages[2]);
    let cv_hash = replay.transcript.snapshot(Checkpoint::ServerCertificateVerify).unwrap();
    assert_eq!(cv_hash, hex!("edb7725fa7a3473b031ec8ef65a2485493900138a2b91291407d7951a06110ed"));

    let HandshakeMessage::Finished(fin) = HandshakeMessage::decode_message(&messages[3]).unwrap() else {
        panic!("expected Finished");
    };
    let expected = finished_verify_data(
        HashAlgorithm::Sha256,
        replay.schedule.server_handshake_traffic_secret().unwrap(),
        &cv_hash,
    )
    .unwrap();
    assert_eq!(expected, fin.verify_data);
    assert_eq!(
        fin.verify_data,
        hex!("9b9b141d906337fbd2cbdce71df4deda4ab42c309572cb7fffee5454b78f0718")
    );
}

#[test]
fn application_and_resumption_secrets() {
    let mut replay = after_server_hello();
    for raw in server_flight(&mut replay) {
        replay.transcript.append(&raw);
    }
    let sf_hash = replay.transcript.snapshot(Checkpoint::ServerFinished).unwrap();
    assert_eq!(sf_hash, hex!("9608102a0f1ccc6db6250b7b7e417b1a000eaada3daae4777a7686c9ff83df13"));
    replay.schedule.derive_application_secrets(&sf_hash).unwrap();
    assert_eq!(
        replay.schedule.server_application_traffic_secret().unwrap(),
        hex!("a11af9f05531f856ad47116b45a950328204b4f44bfb6b3a4b4f1f3fcb631643")
    );
    assert_eq!(
        replay.schedule.client_application_traffic_secret().unwrap(),
        hex!("9e40646ce79a7f9dc05af8889bce6552875afa0b06df0087f792ebb7c17504a5")
    );

    let client_finished = Finished {
        verify_data: finished_verify_data(
            HashAlgorithm::Sha256,
            replay.schedule.client_handshake_traffic_secret().unwrap(),
            &sf_hash,
        )
        .unwrap(),
    };
    assert_eq!(
        client_finished.verify_data,
        hex!("a8ec436d677634ae525ac1fcebe11a039ec17694fac6e98527b642f2edd5ce61")
    );
    replay.transcript.append(&client_finished.encode());
    let cf_hash = replay.transcript.snapshot(Checkpoint::ClientFinished).unwrap();
    assert_eq!(cf_hash, hex!("209145a96ee8e2a122ff810047cc952684658d6049e86429426db87c54ad143d"));

    replay.schedule.derive_resumption_master(&cf_hash).unwrap();
    assert_eq!(
        replay.schedule.resumption_master_secret().unwrap(),
        hex!("7df235f2031d2a051287d02b0241b0bfdaf86cc856231f2d5aba46c434ec196c")
    );
    assert_eq!(
        replay.schedule.resumption_psk(&[0, 0]).unwrap(),
        hex!("4ecd0eb6ec3b4d87f5d6028f922ca4c5851a277fd41311c9e62d2c9492e1c4f3")
    );

    let keys = traffic_keys(
        HashAlgorithm::Sha256,
        AeadAlgorithm::Aes128Gcm,
        replay.schedule.server_application_traffic_secret().unwrap(),
    )
    .unwrap();
    assert_eq!(keys.key.as_slice(), hex!("9f02283b6c9c07efc26bb9f2ac92e356"));
    assert_eq!(keys.iv, hex!("cf782b88dd83549aadf1e984"));
}

#[test]
fn tampered_flight_fails_authentication() {
    let mut replay = after_server_hello();
    let mut record = SERVER_FLIGHT.to_vec();
    record[100] ^= 0x01;
    let err = replay.records.decrypt(Direction::Server, &record[5..]).unwrap_err();
    assert_eq!(err.kind(), kpio_tls::ErrorKind::Crypto);
}
