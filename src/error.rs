use thiserror::Error;

use crate::crypto::CryptoError;
use crate::types::ContentType;

/// Errors surfaced by the engine, the session cache and credential setup.
///
/// Every variant belongs to exactly one [`ErrorKind`]. Anything that is not
/// [`ErrorKind::TransientBuffer`] or [`ErrorKind::Configuration`] is fatal to
/// the engine that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid PAKE option: {0}")]
    InvalidPakeOption(String),

    #[error("Ambiguous PAKE link table: {0}")]
    AmbiguousPakeLink(String),

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Handshake failure: {0}")]
    HandshakeFailure(String),

    #[error("No PAKE option matches the presented client/server identifiers")]
    NoMatchingPakeOption,

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Malformed handshake message: {0}")]
    MalformedMessage(String),

    #[error("Unsupported protocol version {0:#06x}")]
    UnsupportedVersion(u16),

    #[error("Unexpected content type {0:?}")]
    BadContentType(ContentType),

    #[error("Record payload too large: {0} bytes")]
    RecordTooLarge(usize),

    #[error("Renegotiation refused by trust policy")]
    RenegotiationRefused,

    #[error("Peer sent alert: {0}")]
    PeerAlert(u8),

    #[error("Buffer overflow")]
    BufferOverflow,

    #[error("Incomplete record")]
    Incomplete,

    #[error("Record authentication failed")]
    AuthFailure,

    #[error("Signature verification failed")]
    BadSignature,

    #[error("Finished verification failed")]
    BadFinished,

    #[error("PAKE confirmation failed")]
    PakeAuthFailure,

    #[error("Peer certificate rejected: {0}")]
    CertificateRejected(String),

    #[error("Crypto provider error: {0}")]
    CryptoError(String),

    #[error("Engine is closed")]
    EngineClosed,

    #[error("Session store error: {0}")]
    StoreError(String),
}

/// The error taxonomy callers use to decide what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad credential or engine setup. Surfaced immediately, never retried.
    Configuration,
    /// Malformed input or negotiation failure. Tear down and reconnect.
    Protocol,
    /// Expected steady-state signal. Retry with more space or more input.
    TransientBuffer,
    /// Authentication of records, signatures or PAKE confirmations failed.
    Cryptographic,
    /// The engine was already closed.
    Closed,
    /// The persistent session tier failed.
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        use Error::*;
        match self {
            ConfigError(_) | InvalidPakeOption(_) | AmbiguousPakeLink(_) => ErrorKind::Configuration,

            UnexpectedMessage(_)
            | HandshakeFailure(_)
            | NoMatchingPakeOption
            | MalformedRecord(_)
            | MalformedMessage(_)
            | UnsupportedVersion(_)
            | BadContentType(_)
            | RecordTooLarge(_)
            | RenegotiationRefused
            | PeerAlert(_)
            | CertificateRejected(_) => ErrorKind::Protocol,

            BufferOverflow | Incomplete => ErrorKind::TransientBuffer,

            AuthFailure | BadSignature | BadFinished | PakeAuthFailure | CryptoError(_) => {
                ErrorKind::Cryptographic
            }

            EngineClosed => ErrorKind::Closed,

            StoreError(_) => ErrorKind::Io,
        }
    }

    /// Whether this error tears down the engine that raised it.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::TransientBuffer | ErrorKind::Configuration
        )
    }
}

impl From<CryptoError> for Error {
    fn from(value: CryptoError) -> Self {
        match value {
            CryptoError::Authentication => Error::AuthFailure,
            CryptoError::InvalidInput(s) | CryptoError::Backend(s) => Error::CryptoError(s),
        }
    }
}

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for Error {
    fn from(value: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        match value {
            nom::Err::Incomplete(_) => Error::MalformedMessage("truncated".into()),
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                Error::MalformedMessage(format!("{:?} at {} bytes left", e.code, e.input.len()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy() {
        assert_eq!(Error::AmbiguousPakeLink("x".into()).kind(), ErrorKind::Configuration);
        assert_eq!(Error::NoMatchingPakeOption.kind(), ErrorKind::Protocol);
        assert_eq!(Error::Incomplete.kind(), ErrorKind::TransientBuffer);
        assert_eq!(Error::AuthFailure.kind(), ErrorKind::Cryptographic);
        assert_eq!(Error::EngineClosed.kind(), ErrorKind::Closed);

        assert!(!Error::BufferOverflow.is_fatal());
        assert!(Error::BadFinished.is_fatal());
        assert!(Error::UnexpectedMessage("hi".into()).is_fatal());
    }

    #[test]
    fn crypto_error_maps_authentication() {
        let e: Error = CryptoError::Authentication.into();
        assert_eq!(e, Error::AuthFailure);
        let e: Error = CryptoError::Backend("boom".into()).into();
        assert_eq!(e.kind(), ErrorKind::Cryptographic);
    }
}
