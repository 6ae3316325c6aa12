//! Byte-stream transport seam.
//!
//! The session never touches a socket. `TlsStream` moves bytes between a
//! `ClientSession` and anything implementing `Transport`: a `std::io`
//! stream on the host, or a smoltcp TCP socket in the kernel.

use alloc::vec::Vec;

use crate::error::TlsError;

/// Read size used by the adapters; one maximal ciphertext record plus header.
pub const READ_CHUNK: usize = 16 * 1024 + 256 + 5;

/// Outcome of one non-blocking read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportRead {
    /// At least one byte arrived.
    Data(Vec<u8>),
    /// Nothing available yet; try again later.
    WouldBlock,
    /// The peer closed its side of the stream.
    Closed,
}

/// A reliable, ordered byte stream.
pub trait Transport {
    fn read_bytes(&mut self) -> Result<TransportRead, TlsError>;

    /// Write a prefix of `data` and return how many bytes were accepted.
    /// Zero means the stream cannot take more right now.
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, TlsError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn read_bytes(&mut self) -> Result<TransportRead, TlsError> {
        (**self).read_bytes()
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, TlsError> {
        (**self).write_bytes(data)
    }
}

// ── std::io adapter ────────────────────────────────────────

/// Adapts any `Read + Write` stream, blocking or non-blocking.
#[cfg(feature = "std")]
#[derive(Debug)]
pub struct IoTransport<S> {
    stream: S,
}

#[cfg(feature = "std")]
impl<S: std::io::Read + std::io::Write> IoTransport<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(feature = "std")]
impl<S: std::io::Read + std::io::Write> Transport for IoTransport<S> {
    fn read_bytes(&mut self) -> Result<TransportRead, TlsError> {
        use std::io::ErrorKind;

        let mut buf = alloc::vec![0u8; READ_CHUNK];
        match self.stream.read(&mut buf) {
            Ok(0) => Ok(TransportRead::Closed),
            Ok(n) => {
                buf.truncate(n);
                Ok(TransportRead::Data(buf))
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(TransportRead::WouldBlock)
            }
            Err(e) => Err(TlsError::transport(alloc::format!("read failed: {}", e))),
        }
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, TlsError> {
        use std::io::ErrorKind;

        match self.stream.write(data) {
            Ok(0) if !data.is_empty() => Err(TlsError::transport("stream refused write")),
            Ok(n) => {
                self.stream
                    .flush()
                    .map_err(|e| TlsError::transport(alloc::format!("flush failed: {}", e)))?;
                Ok(n)
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(0),
            Err(e) => Err(TlsError::transport(alloc::format!("write failed: {}", e))),
        }
    }
}

// ── smoltcp adapter ────────────────────────────────────────

/// Borrows a smoltcp TCP socket for the duration of a poll.
///
/// The caller keeps polling its `Interface`; this adapter only moves bytes
/// in and out of the socket buffers.
#[cfg(feature = "smoltcp")]
pub struct TcpTransport<'s, 'a> {
    socket: &'s mut smoltcp::socket::tcp::Socket<'a>,
}

#[cfg(feature = "smoltcp")]
impl<'s, 'a> TcpTransport<'s, 'a> {
    pub fn new(socket: &'s mut smoltcp::socket::tcp::Socket<'a>) -> Self {
        Self { socket }
    }
}

#[cfg(feature = "smoltcp")]
impl Transport for TcpTransport<'_, '_> {
    fn read_bytes(&mut self) -> Result<TransportRead, TlsError> {
        use smoltcp::socket::tcp::RecvError;

        if !self.socket.can_recv() {
            return Ok(if self.socket.may_recv() {
                TransportRead::WouldBlock
            } else {
                TransportRead::Closed
            });
        }
        let mut buf = alloc::vec![0u8; READ_CHUNK];
        match self.socket.recv_slice(&mut buf) {
            Ok(0) => Ok(TransportRead::WouldBlock),
            Ok(n) => {
                buf.truncate(n);
                Ok(TransportRead::Data(buf))
            }
            Err(RecvError::Finished) => Ok(TransportRead::Closed),
            Err(RecvError::InvalidState) => Err(TlsError::transport("tcp socket not connected")),
        }
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, TlsError> {
        if !self.socket.may_send() {
            return Err(TlsError::transport("tcp socket cannot send"));
        }
        if !self.socket.can_send() {
            return Ok(0);
        }
        self.socket
            .send_slice(data)
            .map_err(|_| TlsError::transport("tcp send failed"))
    }
}
