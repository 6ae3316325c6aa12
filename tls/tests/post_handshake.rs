//! Traffic after `Connected`: tickets, key updates, exporters, closure.

mod common;

use common::{client_config, server, Loopback, ServerOptions};
use kpio_tls::handshake::NewSessionTicketMessage;
use kpio_tls::{connect, AlertDescription, CipherSuite, ErrorKind, Incoming, State};

fn connected(opts: ServerOptions) -> (kpio_tls::TlsStream<Loopback>, std::rc::Rc<std::cell::RefCell<common::TestServer>>) {
    let server = server(opts);
    let stream = connect("server.test", Loopback::new(server.clone()), client_config()).unwrap();
    assert!(stream.is_handshake_complete());
    (stream, server)
}

#[test]
fn session_tickets_carry_resumption_psk() {
    for suite in [CipherSuite::Aes128GcmSha256, CipherSuite::Aes256GcmSha384] {
        let (mut stream, server) = connected(ServerOptions { suite, ..Default::default() });
        let ticket = NewSessionTicketMessage {
            lifetime: 7200,
            age_add: 0x0102_0304,
            nonce: vec![0, 1],
            ticket: vec![0xaa; 48],
            max_early_data: None,
        };
        server.borrow_mut().send_new_session_ticket(&ticket);
        server.borrow_mut().send_application_data(b"after ticket");

        assert_eq!(stream.receive().unwrap(), Incoming::Data(b"after ticket".to_vec()));
        assert_eq!(stream.state(), State::Connected);

        let tickets = stream.take_session_tickets();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].lifetime, 7200);
        assert_eq!(tickets[0].age_add, 0x0102_0304);
        assert_eq!(tickets[0].ticket, ticket.ticket);
        assert_eq!(tickets[0].cipher_suite, suite);
        assert_eq!(tickets[0].received_at, common::NOW);
        assert_eq!(
            tickets[0].resumption_psk.as_slice(),
            server.borrow().resumption_psk(&[0, 1]).as_slice()
        );
        assert_eq!(tickets[0].resumption_psk.len(), suite.params().hash_len());
        assert!(stream.take_session_tickets().is_empty());
    }
}

#[test]
fn server_key_update_with_request() {
    let (mut stream, server) = connected(ServerOptions::default());
    server.borrow_mut().send_key_update(true);
    server.borrow_mut().send_application_data(b"new keys");
    assert_eq!(stream.receive().unwrap(), Incoming::Data(b"new keys".to_vec()));

    // the client answered with its own KeyUpdate
    assert_eq!(server.borrow().key_updates_received, 1);
    stream.send(b"still talking").unwrap();
    assert_eq!(server.borrow().received, b"still talking");
}

#[test]
fn server_key_update_without_request() {
    let (mut stream, server) = connected(ServerOptions::default());
    server.borrow_mut().send_key_update(false);
    server.borrow_mut().send_application_data(b"rotated");
    assert_eq!(stream.receive().unwrap(), Incoming::Data(b"rotated".to_vec()));
    assert_eq!(server.borrow().key_updates_received, 0);
}

#[test]
fn client_initiated_key_updates() {
    let (mut stream, server) = connected(ServerOptions::default());
    stream.update_keys(false).unwrap();
    stream.send(b"one").unwrap();
    assert_eq!(server.borrow().key_updates_received, 1);

    stream.update_keys(true).unwrap();
    stream.send(b"two").unwrap();
    assert_eq!(server.borrow().key_updates_received, 2);
    assert_eq!(server.borrow().received, b"onetwo");

    // the server rotated in response; its next record uses the new key
    server.borrow_mut().send_application_data(b"three");
    assert_eq!(stream.receive().unwrap(), Incoming::Data(b"three".to_vec()));
}

#[test]
fn exporter_matches_server() {
    let (stream, server) = connected(ServerOptions::default());
    let ours = stream.export_keying_material(b"EXPERIMENTAL kpio", b"context", 48).unwrap();
    assert_eq!(ours.len(), 48);
    assert_eq!(ours, server.borrow().export(b"EXPERIMENTAL kpio", b"context", 48));
    let other = stream.export_keying_material(b"EXPERIMENTAL kpio", b"", 48).unwrap();
    assert_ne!(ours, other);
}

#[test]
fn server_close_notify() {
    let (mut stream, server) = connected(ServerOptions::default());
    server.borrow_mut().send_application_data(b"bye");
    server.borrow_mut().send_alert(1, AlertDescription::CloseNotify as u8);

    assert_eq!(stream.receive().unwrap(), Incoming::Data(b"bye".to_vec()));
    assert_eq!(stream.receive().unwrap(), Incoming::Closed);
    assert_eq!(stream.state(), State::Closed);
    assert_eq!(server.borrow().alerts, [(1, 0)]);

    let err = stream.send(b"late").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(stream.export_keying_material(b"EXPERIMENTAL kpio", b"", 16).is_err());
}

#[test]
fn client_close() {
    let (mut stream, server) = connected(ServerOptions::default());
    stream.close().unwrap();
    assert_eq!(stream.state(), State::Closed);
    assert_eq!(server.borrow().alerts, [(1, 0)]);
    // closing twice is harmless
    stream.close().unwrap();
}

#[test]
fn user_canceled_is_ignored() {
    let (mut stream, server) = connected(ServerOptions::default());
    server.borrow_mut().send_alert(1, AlertDescription::UserCanceled as u8);
    server.borrow_mut().send_application_data(b"continuing");
    assert_eq!(stream.receive().unwrap(), Incoming::Data(b"continuing".to_vec()));
}

#[test]
fn fatal_alert_after_handshake() {
    let (mut stream, server) = connected(ServerOptions::default());
    server.borrow_mut().send_alert(2, AlertDescription::InternalError as u8);
    let err = stream.receive().unwrap_err();
    assert_eq!(err.alert(), Some(AlertDescription::InternalError));
    assert_eq!(stream.state(), State::Error);
    assert_eq!(stream.send(b"x").unwrap_err(), err);
}
