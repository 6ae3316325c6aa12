//! Error taxonomy.
//!
//! Every failure a session can hit is fatal and falls into one of five
//! kinds. The variant also records which alert was (or would be) sent to
//! the peer so the driver can emit it without re-deriving the cause.

use alloc::string::String;

use thiserror::Error;

use crate::alert::AlertDescription;
use crate::crypto::CryptoError;

/// Broad classification of a fatal session error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed, out-of-order or oversized message.
    Protocol,
    /// No common version, cipher suite or group.
    Negotiation,
    /// The certificate chain was rejected.
    Certificate,
    /// Signature, Finished MAC or AEAD tag verification failed.
    Crypto,
    /// The underlying byte stream failed or closed.
    Transport,
}

/// TLS error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TlsError {
    /// Malformed, out-of-order or oversized message.
    #[error("protocol error: {reason}")]
    Protocol {
        alert: AlertDescription,
        reason: String,
    },
    /// No acceptable version, cipher suite, group or parameter.
    #[error("negotiation error: {reason}")]
    Negotiation {
        alert: AlertDescription,
        reason: String,
    },
    /// Certificate chain validation failed.
    #[error("certificate error: {reason}")]
    Certificate {
        alert: AlertDescription,
        reason: String,
    },
    /// A cryptographic check failed.
    #[error("crypto error: {reason}")]
    Crypto {
        alert: AlertDescription,
        reason: String,
    },
    /// The transport failed or was closed.
    #[error("transport error: {0}")]
    Transport(String),
}

impl TlsError {
    /// Taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TlsError::Protocol { .. } => ErrorKind::Protocol,
            TlsError::Negotiation { .. } => ErrorKind::Negotiation,
            TlsError::Certificate { .. } => ErrorKind::Certificate,
            TlsError::Crypto { .. } => ErrorKind::Crypto,
            TlsError::Transport(_) => ErrorKind::Transport,
        }
    }

    /// Alert to send to the peer, if any.
    pub fn alert(&self) -> Option<AlertDescription> {
        match self {
            TlsError::Protocol { alert, .. }
            | TlsError::Negotiation { alert, .. }
            | TlsError::Certificate { alert, .. }
            | TlsError::Crypto { alert, .. } => Some(*alert),
            TlsError::Transport(_) => None,
        }
    }

    /// Human-readable reason.
    pub fn reason(&self) -> &str {
        match self {
            TlsError::Protocol { reason, .. }
            | TlsError::Negotiation { reason, .. }
            | TlsError::Certificate { reason, .. }
            | TlsError::Crypto { reason, .. } => reason,
            TlsError::Transport(reason) => reason,
        }
    }

    pub fn protocol(alert: AlertDescription, reason: impl Into<String>) -> Self {
        TlsError::Protocol { alert, reason: reason.into() }
    }

    /// Malformed message (`decode_error`).
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::protocol(AlertDescription::DecodeError, reason)
    }

    /// Message not valid in the current state (`unexpected_message`).
    pub fn unexpected(reason: impl Into<String>) -> Self {
        Self::protocol(AlertDescription::UnexpectedMessage, reason)
    }

    /// Syntactically valid but semantically wrong field (`illegal_parameter`).
    pub fn illegal(reason: impl Into<String>) -> Self {
        Self::protocol(AlertDescription::IllegalParameter, reason)
    }

    pub fn negotiation(alert: AlertDescription, reason: impl Into<String>) -> Self {
        TlsError::Negotiation { alert, reason: reason.into() }
    }

    pub fn certificate(alert: AlertDescription, reason: impl Into<String>) -> Self {
        TlsError::Certificate { alert, reason: reason.into() }
    }

    pub fn crypto(alert: AlertDescription, reason: impl Into<String>) -> Self {
        TlsError::Crypto { alert, reason: reason.into() }
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        TlsError::Transport(reason.into())
    }
}

impl From<CryptoError> for TlsError {
    fn from(err: CryptoError) -> Self {
        let alert = match err {
            CryptoError::AuthenticationFailed => AlertDescription::BadRecordMac,
            CryptoError::InvalidPoint | CryptoError::LowOrderPoint => {
                AlertDescription::IllegalParameter
            }
            CryptoError::InvalidLength | CryptoError::EntropyUnavailable => {
                AlertDescription::InternalError
            }
        };
        TlsError::Crypto { alert, reason: alloc::format!("{}", err) }
    }
}
