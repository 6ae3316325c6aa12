//! Running handshake transcript hash (RFC 8446 §4.4.1).
//!
//! Messages are appended as raw wire bytes (handshake header + body). The
//! hash function is only known once the server picks a suite, so until
//! then the bytes are buffered. Digests taken at protocol milestones are
//! stored under a `Checkpoint` label so hash-at-ServerHello and
//! hash-at-Finished can never be mixed up.

use alloc::vec::Vec;

use crate::alert::AlertDescription;
use crate::crypto::{HashAlgorithm, HashContext};
use crate::error::TlsError;

/// Handshake type of the synthetic message that replaces ClientHello1
/// after a HelloRetryRequest.
const MESSAGE_HASH: u8 = 254;

/// Labelled points in the handshake at which the digest is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// ClientHello..ServerHello: input to the handshake traffic secrets.
    ServerHello,
    /// ClientHello..Certificate: signed by CertificateVerify.
    ServerCertificate,
    /// ClientHello..CertificateVerify: MACed by the server Finished.
    ServerCertificateVerify,
    /// ClientHello..server Finished: input to the application secrets.
    ServerFinished,
    /// ClientHello..client Finished: input to the resumption secret.
    ClientFinished,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub checkpoint: Checkpoint,
    pub digest: Vec<u8>,
}

#[derive(Clone)]
enum Accumulator {
    Buffered(Vec<u8>),
    Hashing(HashContext),
}

/// Append-only transcript hash.
#[derive(Clone)]
pub struct Transcript {
    acc: Accumulator,
    snapshots: Vec<Snapshot>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    /// Empty transcript whose hash function is chosen later.
    pub fn new() -> Self {
        Self {
            acc: Accumulator::Buffered(Vec::new()),
            snapshots: Vec::new(),
        }
    }

    /// Empty transcript over a known hash function.
    pub fn with_hash(alg: HashAlgorithm) -> Self {
        Self {
            acc: Accumulator::Hashing(alg.new_context()),
            snapshots: Vec::new(),
        }
    }

    pub fn hash_algorithm(&self) -> Option<HashAlgorithm> {
        match &self.acc {
            Accumulator::Buffered(_) => None,
            Accumulator::Hashing(ctx) => Some(ctx.algorithm()),
        }
    }

    /// Fix the hash function, feeding it everything buffered so far.
    /// Choosing a different function after hashing has started is an error.
    pub fn start_hash(&mut self, alg: HashAlgorithm) -> Result<(), TlsError> {
        match &mut self.acc {
            Accumulator::Buffered(buf) => {
                let mut ctx = alg.new_context();
                ctx.update(buf);
                self.acc = Accumulator::Hashing(ctx);
                Ok(())
            }
            Accumulator::Hashing(ctx) if ctx.algorithm() == alg => Ok(()),
            Accumulator::Hashing(_) => Err(TlsError::illegal("transcript hash changed mid-handshake")),
        }
    }

    /// Append the wire bytes of one handshake message.
    pub fn append(&mut self, message: &[u8]) {
        match &mut self.acc {
            Accumulator::Buffered(buf) => buf.extend_from_slice(message),
            Accumulator::Hashing(ctx) => ctx.update(message),
        }
    }

    /// Digest of everything appended so far.
    pub fn current(&self) -> Result<Vec<u8>, TlsError> {
        match &self.acc {
            Accumulator::Hashing(ctx) => Ok(ctx.peek()),
            Accumulator::Buffered(_) => Err(TlsError::protocol(
                AlertDescription::InternalError,
                "transcript hash requested before suite negotiation",
            )),
        }
    }

    /// Record the current digest under `checkpoint` and return it.
    pub fn snapshot(&mut self, checkpoint: Checkpoint) -> Result<Vec<u8>, TlsError> {
        let digest = self.current()?;
        self.snapshots.retain(|s| s.checkpoint != checkpoint);
        self.snapshots.push(Snapshot {
            checkpoint,
            digest: digest.clone(),
        });
        Ok(digest)
    }

    pub fn get(&self, checkpoint: Checkpoint) -> Option<&[u8]> {
        self.snapshots
            .iter()
            .find(|s| s.checkpoint == checkpoint)
            .map(|s| s.digest.as_slice())
    }

    /// After a HelloRetryRequest: replace ClientHello1 with
    /// `message_hash(Hash(ClientHello1))` (RFC 8446 §4.4.1). Must be called
    /// before the HelloRetryRequest itself is appended.
    pub fn rollup_for_retry(&mut self, alg: HashAlgorithm) -> Result<(), TlsError> {
        self.start_hash(alg)?;
        let digest = self.current()?;
        let mut ctx = alg.new_context();
        ctx.update(&[MESSAGE_HASH, 0, 0, digest.len() as u8]);
        ctx.update(&digest);
        self.acc = Accumulator::Hashing(ctx);
        Ok(())
    }
}
