use std::fmt;
use std::io;

use thiserror::Error;

use crate::message::MessageType;
use crate::HandshakeState;

/// Errors produced while setting up or driving a handshake.
#[derive(Debug, Error)]
pub enum Error {
    /// Neither supported address family parses the given host, or the local and
    /// remote addresses belong to different families.
    #[error("address resolution: {0}")]
    AddressResolution(String),

    /// Bind, connect, send or receive failed at the transport boundary.
    #[error("socket: {0}")]
    Socket(#[from] io::Error),

    /// The retransmission budget for a flight, or the whole handshake, ran out.
    #[error("timeout exceeded: {0}")]
    TimeoutExceeded(String),

    /// A message arrived out of sequence and is not a stale retransmission.
    #[error("protocol order violation: {0}")]
    ProtocolOrderViolation(String),

    /// The server selected a version, suite, group or profile we did not offer.
    #[error("negotiation mismatch: {0}")]
    NegotiationMismatch(String),

    /// Malformed or truncated record/fragment, or conflicting overlapping fragments.
    #[error("decode: {0}")]
    Decode(String),

    /// Certificate rejected, bad signature or `Finished` verification mismatch.
    #[error("authentication failure: {0}")]
    AuthenticationFailure(String),

    /// The peer sent a fatal alert.
    #[error("alert received: level {0}, description {1}")]
    AlertReceived(u8, u8),

    /// The crypto provider failed.
    #[error("crypto: {0}")]
    Crypto(String),

    /// Invalid configuration.
    #[error("config: {0}")]
    Config(String),

    /// The caller aborted the handshake.
    #[error("handshake aborted")]
    Aborted,

    /// Outgoing datagrams are not being polled fast enough.
    #[error("transmit queue full")]
    TransmitQueueFull,
}

/// Classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AddressResolution,
    Socket,
    TimeoutExceeded,
    ProtocolOrderViolation,
    NegotiationMismatch,
    Decode,
    AuthenticationFailure,
    AlertReceived,
    Crypto,
    Config,
    Aborted,
    TransmitQueueFull,
}

impl Error {
    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AddressResolution(_) => ErrorKind::AddressResolution,
            Error::Socket(_) => ErrorKind::Socket,
            Error::TimeoutExceeded(_) => ErrorKind::TimeoutExceeded,
            Error::ProtocolOrderViolation(_) => ErrorKind::ProtocolOrderViolation,
            Error::NegotiationMismatch(_) => ErrorKind::NegotiationMismatch,
            Error::Decode(_) => ErrorKind::Decode,
            Error::AuthenticationFailure(_) => ErrorKind::AuthenticationFailure,
            Error::AlertReceived(_, _) => ErrorKind::AlertReceived,
            Error::Crypto(_) => ErrorKind::Crypto,
            Error::Config(_) => ErrorKind::Config,
            Error::Aborted => ErrorKind::Aborted,
            Error::TransmitQueueFull => ErrorKind::TransmitQueueFull,
        }
    }

    /// The TLS alert description we send to the peer for this error, if any.
    pub(crate) fn alert_description(&self) -> Option<u8> {
        let d = match self {
            Error::ProtocolOrderViolation(_) => 10, // unexpected_message
            Error::NegotiationMismatch(_) => 40,    // handshake_failure
            Error::Decode(_) => 50,                 // decode_error
            Error::AuthenticationFailure(_) => 42,  // bad_certificate
            Error::Crypto(_) => 80,                 // internal_error
            _ => return None,
        };
        Some(d)
    }
}

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for Error {
    fn from(value: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        match value {
            nom::Err::Incomplete(_) => Error::Decode("incomplete input".into()),
            nom::Err::Error(e) | nom::Err::Failure(e) => Error::Decode(format!(
                "{:?} with {} bytes remaining",
                e.code,
                e.input.len()
            )),
        }
    }
}

/// Terminal outcome of a failed handshake attempt.
///
/// Carries the error kind plus the state the handshake was in and the
/// handshake message it was waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeFailure {
    pub kind: ErrorKind,
    pub state: HandshakeState,
    pub expected: Option<MessageType>,
    pub reason: String,
}

impl HandshakeFailure {
    pub(crate) fn new(error: &Error, state: HandshakeState, expected: Option<MessageType>) -> Self {
        HandshakeFailure {
            kind: error.kind(),
            state,
            expected,
            reason: error.to_string(),
        }
    }
}

impl fmt::Display for HandshakeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in state {:?}", self.reason, self.state)?;
        if let Some(expected) = self.expected {
            write!(f, " (expecting {:?})", expected)?;
        }
        Ok(())
    }
}

impl std::error::Error for HandshakeFailure {}
