//! Handshake driver: pumps bytes between a `ClientSession` and a
//! `Transport`.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::config::TlsConfig;
use crate::error::{ErrorKind, TlsError};
use crate::session::{ClientSession, NewSessionTicket, State};
use crate::suites::CipherSuite;
use crate::transport::{Transport, TransportRead};

/// Result of `TlsStream::receive`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Data(Vec<u8>),
    WouldBlock,
    /// The server sent `close_notify`.
    Closed,
}

/// A TLS connection over `T`.
pub struct TlsStream<T: Transport> {
    session: ClientSession,
    transport: T,
    /// Output the transport has not accepted yet.
    pending: Vec<u8>,
}

impl<T: Transport> core::fmt::Debug for TlsStream<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TlsStream")
            .field("session", &self.session)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Start a handshake with `hostname` and drive it until it completes or
/// the transport would block.
///
/// On a non-blocking transport the returned stream may still be
/// handshaking; call `poll_handshake` when more bytes can arrive.
pub fn connect<T: Transport>(
    hostname: &str,
    transport: T,
    config: Arc<TlsConfig>,
) -> Result<TlsStream<T>, TlsError> {
    log::debug!("[KPIO TLS] connecting to {}", hostname);
    let mut stream = TlsStream {
        session: ClientSession::new(hostname, config),
        transport,
        pending: Vec::new(),
    };
    stream.session.start()?;
    stream.poll_handshake()?;
    Ok(stream)
}

impl<T: Transport> TlsStream<T> {
    pub fn is_handshake_complete(&self) -> bool {
        self.session.is_handshake_complete()
    }

    pub fn state(&self) -> State {
        self.session.state()
    }

    pub fn negotiated_alpn(&self) -> Option<&[u8]> {
        self.session.negotiated_alpn()
    }

    pub fn negotiated_cipher_suite(&self) -> Option<CipherSuite> {
        self.session.negotiated_cipher_suite()
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ClientSession {
        &mut self.session
    }

    pub fn take_session_tickets(&mut self) -> Vec<NewSessionTicket> {
        self.session.take_session_tickets()
    }

    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    /// Advance the handshake as far as the transport allows. Returns
    /// whether the session is connected.
    pub fn poll_handshake(&mut self) -> Result<bool, TlsError> {
        self.session.ensure_usable()?;
        loop {
            self.flush()?;
            if self.session.is_handshake_complete() {
                return Ok(true);
            }
            match self.read_transport()? {
                TransportRead::Data(bytes) => self.feed(&bytes)?,
                TransportRead::WouldBlock => return Ok(false),
                TransportRead::Closed => {
                    return Err(self.abort(TlsError::transport(
                        "connection closed during handshake",
                    )))
                }
            }
        }
    }

    /// Encrypt and send application data.
    pub fn send(&mut self, data: &[u8]) -> Result<(), TlsError> {
        self.session.write_plaintext(data)?;
        self.flush()?;
        Ok(())
    }

    /// Return decrypted application data, reading from the transport
    /// until some arrives, it would block, or the server closes.
    pub fn receive(&mut self) -> Result<Incoming, TlsError> {
        loop {
            let buffered = self.session.take_plaintext();
            if !buffered.is_empty() {
                return Ok(Incoming::Data(buffered));
            }
            if self.session.state() == State::Closed {
                self.flush_best_effort();
                return Ok(Incoming::Closed);
            }
            if !self.session.is_handshake_complete() && !self.poll_handshake()? {
                return Ok(Incoming::WouldBlock);
            }
            match self.read_transport()? {
                TransportRead::Data(bytes) => {
                    self.feed(&bytes)?;
                    // KeyUpdate replies and close_notify go out immediately
                    self.flush()?;
                }
                TransportRead::WouldBlock => return Ok(Incoming::WouldBlock),
                TransportRead::Closed => {
                    return Err(self.abort(TlsError::transport(
                        "connection closed without close_notify",
                    )))
                }
            }
        }
    }

    /// Rotate the client write key, optionally asking the server to do
    /// the same.
    pub fn update_keys(&mut self, request_peer_update: bool) -> Result<(), TlsError> {
        self.session.update_keys(request_peer_update)?;
        self.flush()?;
        Ok(())
    }

    pub fn export_keying_material(
        &self,
        label: &[u8],
        context: &[u8],
        length: usize,
    ) -> Result<Vec<u8>, TlsError> {
        self.session.export_keying_material(label, context, length)
    }

    /// Send `close_notify` and wipe the session's secrets.
    pub fn close(&mut self) -> Result<(), TlsError> {
        self.session.close()?;
        self.flush_best_effort();
        Ok(())
    }

    /// Bytes still waiting for the transport.
    pub fn pending_output(&self) -> usize {
        self.pending.len()
    }

    // ── Plumbing ────────────────────────────────────────────

    fn feed(&mut self, bytes: &[u8]) -> Result<(), TlsError> {
        log::trace!("[KPIO TLS] {} bytes from transport", bytes.len());
        if let Err(err) = self.session.read_tls(bytes) {
            // the session queued a fatal alert if one applies
            self.flush_best_effort();
            return Err(err);
        }
        Ok(())
    }

    fn read_transport(&mut self) -> Result<TransportRead, TlsError> {
        self.transport.read_bytes().map_err(|e| self.abort(e))
    }

    /// Write out everything the session produced. Returns whether the
    /// transport accepted all of it.
    fn flush(&mut self) -> Result<bool, TlsError> {
        self.try_flush().map_err(|e| self.abort(e))
    }

    fn flush_best_effort(&mut self) {
        if let Err(e) = self.try_flush() {
            log::warn!("[KPIO TLS] could not flush final records: {}", e);
        }
    }

    fn try_flush(&mut self) -> Result<bool, TlsError> {
        let out = self.session.take_output();
        self.pending.extend_from_slice(&out);
        while !self.pending.is_empty() {
            let written = self.transport.write_bytes(&self.pending)?;
            if written == 0 {
                return Ok(false);
            }
            self.pending.drain(..written.min(self.pending.len()));
        }
        Ok(true)
    }

    fn abort(&mut self, err: TlsError) -> TlsError {
        debug_assert_eq!(err.kind(), ErrorKind::Transport);
        self.session.abort(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FixedTime;
    use alloc::collections::VecDeque;

    /// Scripted reads, writes capped by a byte budget.
    struct ScriptedTransport {
        reads: VecDeque<TransportRead>,
        written: Vec<u8>,
        write_budget: usize,
    }

    impl ScriptedTransport {
        fn new(reads: Vec<TransportRead>, write_budget: usize) -> Self {
            Self { reads: reads.into(), written: Vec::new(), write_budget }
        }
    }

    impl Transport for ScriptedTransport {
        fn read_bytes(&mut self) -> Result<TransportRead, TlsError> {
            Ok(self.reads.pop_front().unwrap_or(TransportRead::WouldBlock))
        }

        fn write_bytes(&mut self, data: &[u8]) -> Result<usize, TlsError> {
            let n = data.len().min(self.write_budget).min(7);
            self.write_budget -= n;
            self.written.extend_from_slice(&data[..n]);
            Ok(n)
        }
    }

    fn config() -> Arc<TlsConfig> {
        Arc::new(
            TlsConfig::builder()
                .rng_seed([7; 32])
                .time_source(Arc::new(FixedTime(1_750_000_000)))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_would_block_leaves_handshake_pending() {
        let stream = connect("server.test", ScriptedTransport::new(Vec::new(), usize::MAX), config()).unwrap();
        assert!(!stream.is_handshake_complete());
        assert_eq!(stream.state(), State::ClientHelloSent);
        assert_eq!(stream.pending_output(), 0);
        // ClientHello record went out in small writes
        assert_eq!(stream.get_ref().written[0], 22);
    }

    #[test]
    fn test_partial_writes_are_kept() {
        let mut stream = connect("server.test", ScriptedTransport::new(Vec::new(), 20), config()).unwrap();
        assert_eq!(stream.get_ref().written.len(), 20);
        let remaining = stream.pending_output();
        assert!(remaining > 0);
        stream.transport.write_budget = usize::MAX;
        assert!(!stream.poll_handshake().unwrap());
        assert_eq!(stream.pending_output(), 0);
        assert_eq!(stream.get_ref().written.len(), 20 + remaining);
    }

    #[test]
    fn test_closed_during_handshake_is_transport_error() {
        let transport = ScriptedTransport::new(alloc::vec![TransportRead::Closed], usize::MAX);
        let err = connect("server.test", transport, config()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_send_before_handshake_fails() {
        let mut stream = connect("server.test", ScriptedTransport::new(Vec::new(), usize::MAX), config()).unwrap();
        assert!(stream.send(b"early").is_err());
        assert_eq!(stream.receive().unwrap(), Incoming::WouldBlock);
    }

    #[test]
    fn test_server_alert_fails_stream() {
        let alert = alloc::vec![21, 3, 3, 0, 2, 2, 40];
        let mut stream = connect("server.test", ScriptedTransport::new(Vec::new(), usize::MAX), config()).unwrap();
        stream.transport.reads.push_back(TransportRead::Data(alert));
        let err = stream.poll_handshake().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(stream.state(), State::Error);
        // refused from now on
        assert_eq!(stream.poll_handshake().unwrap_err(), err);
    }
}
