//! KPIO TLS 1.3 client
//!
//! This crate provides the client side of TLS 1.3 (RFC 8446) for the KPIO
//! network stack. It is `no_std` + `alloc` so it links into the kernel; the
//! `std` feature adds host conveniences used by tools and tests.
//!
//! # Architecture
//!
//! The client is organized bottom-up into:
//!
//! - `crypto`: Hash, MAC, KDF, AEAD, key exchange and signature primitives
//! - `transcript`: Running handshake hash with labelled snapshots
//! - `key_schedule`: RFC 8446 §7.1 secret tree and traffic keys
//! - `kx`: Ephemeral ECDHE key shares (X25519, P-256)
//! - `record`: Record framing and AEAD record protection
//! - `handshake`: Handshake message codec
//! - `x509` / `certificate` / `verify`: Chain validation and signature
//!   verification collaborators
//! - `session`: The handshake state machine (`ClientSession`)
//! - `connection` / `transport`: The I/O driver (`connect`, `TlsStream`)

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

pub mod alert;
pub mod certificate;
pub mod codec;
pub mod config;
pub mod connection;
pub mod crypto;
pub(crate) mod der;
pub mod error;
pub mod handshake;
pub mod key_schedule;
pub mod kx;
pub mod record;
pub mod session;
pub mod suites;
pub mod transcript;
pub mod transport;
pub mod verify;
pub mod x509;

pub use alert::{AlertDescription, AlertLevel};
pub use certificate::{
    CertificateValidator, ChainVerdict, DefaultCertificateValidator, PeerCertificateChain,
    TrustStore,
};
pub use config::{FixedTime, RecordPadding, TimeSource, TlsConfig, TlsConfigBuilder};
#[cfg(feature = "std")]
pub use config::SystemClock;
pub use connection::{connect, Incoming, TlsStream};
pub use error::{ErrorKind, TlsError};
pub use session::{ClientSession, NewSessionTicket, State};
pub use suites::{CipherSuite, CipherSuiteParams, NamedGroup, SignatureScheme};
pub use transport::{Transport, TransportRead};
#[cfg(feature = "std")]
pub use transport::IoTransport;
#[cfg(feature = "smoltcp")]
pub use transport::TcpTransport;
pub use verify::{DefaultSignatureVerifier, PublicKey, SignatureVerifier};
