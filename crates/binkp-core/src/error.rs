//! Error types for the binkp core protocol.
//!
//! Session failures follow a fixed taxonomy so that callers can decide what
//! to do next without parsing messages:
//!
//! - **Local detection** (`Decode`, `ProtocolViolation`, `AuthenticationFailed`,
//!   `File`): the engine sends a best-effort ERR before closing
//! - **Peer decision** (`PeerBusy`, `PeerError`): the peer already said why
//! - **Link failure** (`Timeout`, `ConnectionClosed`): nothing can be sent
//!
//! # Example
//!
//! ```
//! use binkp_core::SessionError;
//!
//! fn schedule(err: &SessionError) {
//!     if err.is_retriable() {
//!         println!("will call again later: {}", err);
//!     } else {
//!         println!("needs attention: {}", err);
//!     }
//! }
//! # schedule(&SessionError::PeerBusy("too many sessions".into()));
//! ```

use binkp_files::FileError;
use binkp_transport::ConnectionError;
use std::borrow::Cow;
use std::time::Duration;
use thiserror::Error;

/// Frame and command decoding errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Not enough bytes for a complete header or payload
    #[error("frame truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes needed
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Payload longer than the permitted maximum
    #[error("frame payload of {len} bytes exceeds maximum of {max}")]
    Oversized {
        /// Declared payload length
        len: usize,
        /// Maximum accepted length
        max: usize,
    },

    /// Command frame without a command byte
    #[error("empty command frame")]
    EmptyCommand,

    /// Command code outside the known set
    #[error("unknown command code {0}")]
    UnknownCommand(u8),

    /// Command arguments could not be parsed
    #[error("invalid {command} arguments: {reason}")]
    InvalidArguments {
        /// Command name
        command: &'static str,
        /// What was wrong
        reason: Cow<'static, str>,
    },
}

/// Errors reading or writing frames on a connection
#[derive(Debug, Error)]
pub enum CodecError {
    /// The peer's byte stream is malformed
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The connection timed out or failed
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// FTN address parsing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid address {input:?}: {reason}")]
pub struct AddressError {
    /// Text that failed to parse
    pub input: String,
    /// What was wrong
    pub reason: &'static str,
}

impl AddressError {
    pub(crate) fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }
}

/// Why a session ended unsuccessfully
#[derive(Debug, Error)]
pub enum SessionError {
    /// Malformed frame from the peer
    #[error("decode error: {0}")]
    Decode(#[from] FrameError),

    /// Well-formed frame that is illegal in the current phase
    #[error("protocol violation: {0}")]
    ProtocolViolation(Cow<'static, str>),

    /// Password or address check failed
    #[error("authentication failed: {0}")]
    AuthenticationFailed(Cow<'static, str>),

    /// Peer sent BSY
    #[error("peer busy: {0}")]
    PeerBusy(String),

    /// Peer sent ERR
    #[error("peer error: {0}")]
    PeerError(String),

    /// No progress within the inactivity budget
    #[error("session timed out after {0:?} without progress")]
    Timeout(Duration),

    /// Transport failure or peer hang-up
    #[error("connection closed: {0}")]
    ConnectionClosed(Cow<'static, str>),

    /// Local storage failure while a file was in flight
    #[error("file error: {0}")]
    File(#[from] FileError),
}

impl SessionError {
    /// Check if the engine should try to send ERR before closing.
    ///
    /// True for conditions detected locally; false when the peer ended the
    /// session or the link is gone.
    #[must_use]
    pub fn notify_peer(&self) -> bool {
        matches!(
            self,
            Self::Decode(_)
                | Self::ProtocolViolation(_)
                | Self::AuthenticationFailed(_)
                | Self::File(_)
        )
    }

    /// Check if calling the peer again later may succeed.
    ///
    /// The engine never retries by itself; this is advice for schedulers.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::PeerBusy(_) | Self::Timeout(_) | Self::ConnectionClosed(_)
        )
    }

    /// Short stable name for logs and reports
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::ProtocolViolation(_) => "protocol-violation",
            Self::AuthenticationFailed(_) => "authentication-failed",
            Self::PeerBusy(_) => "peer-busy",
            Self::PeerError(_) => "peer-error",
            Self::Timeout(_) => "timeout",
            Self::ConnectionClosed(_) => "connection-closed",
            Self::File(_) => "file",
        }
    }

    pub(crate) fn violation(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    pub(crate) fn auth(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::AuthenticationFailed(msg.into())
    }
}

impl From<ConnectionError> for SessionError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Timeout(d) => Self::Timeout(d),
            ConnectionError::Closed => Self::ConnectionClosed(Cow::Borrowed("closed by peer")),
            ConnectionError::Io(e) => Self::ConnectionClosed(Cow::Owned(e.to_string())),
        }
    }
}

impl From<CodecError> for SessionError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Frame(e) => Self::Decode(e),
            CodecError::Connection(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_peer_only_for_local_faults() {
        assert!(SessionError::Decode(FrameError::EmptyCommand).notify_peer());
        assert!(SessionError::violation("data before FILE").notify_peer());
        assert!(SessionError::auth("bad password").notify_peer());

        assert!(!SessionError::PeerBusy("later".into()).notify_peer());
        assert!(!SessionError::PeerError("bye".into()).notify_peer());
        assert!(!SessionError::Timeout(Duration::from_secs(1)).notify_peer());
        assert!(!SessionError::ConnectionClosed("reset".into()).notify_peer());
    }

    #[test]
    fn test_is_retriable() {
        assert!(SessionError::PeerBusy("x".into()).is_retriable());
        assert!(SessionError::Timeout(Duration::from_secs(5)).is_retriable());
        assert!(SessionError::ConnectionClosed("x".into()).is_retriable());
        assert!(!SessionError::auth("x").is_retriable());
        assert!(!SessionError::PeerError("x".into()).is_retriable());
    }

    #[test]
    fn test_from_connection_error() {
        let err: SessionError = ConnectionError::Closed.into();
        assert!(matches!(err, SessionError::ConnectionClosed(_)));

        let err: SessionError = ConnectionError::Timeout(Duration::from_secs(3)).into();
        assert!(matches!(err, SessionError::Timeout(d) if d == Duration::from_secs(3)));

        let err: SessionError = CodecError::Frame(FrameError::EmptyCommand).into();
        assert_eq!(err.kind(), "decode");
    }

    #[test]
    fn test_display() {
        let err = FrameError::Oversized { len: 40000, max: 32767 };
        assert_eq!(
            err.to_string(),
            "frame payload of 40000 bytes exceeds maximum of 32767"
        );

        let err = SessionError::PeerError("incorrect password".into());
        assert_eq!(err.to_string(), "peer error: incorrect password");
    }
}
