//! Error types for the signature library.
//!
//! This module defines all error types that can occur during signing and
//! verification. The verification orchestrator never surfaces these to its
//! caller; signing propagates them.

/// Result type alias for signature library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur during signing and verification.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid PDF header (expected '%PDF-')
    #[error("Invalid PDF header: expected '%PDF-', found '{0}'")]
    InvalidHeader(String),

    /// Malformed input at specific byte offset (CMS, CRL, OCSP, timestamp
    /// token, or PDF structure). Always recoverable by the caller.
    #[error("Failed to parse {what} at byte {offset}: {reason}")]
    Parse {
        /// What was being parsed
        what: &'static str,
        /// Byte offset where parsing failed
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// ByteRange/placeholder invariant violated during signing. Fatal: the
    /// document must not be saved in this state.
    #[error("Signing protocol violation: {0}")]
    Protocol(String),

    /// Certificate chain could not be validated. Only ever an `Err` inside
    /// internal plumbing; verification converts it into a state.
    #[error("Trust failure: {0}")]
    Trust(String),

    /// Failed revocation fetch or failed signer callback.
    #[error("I/O failure during {context}: {reason}")]
    Remote {
        /// Operation that was in flight
        context: &'static str,
        /// Underlying failure
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// UTF-8 decoding error
    #[error("UTF-8 decoding error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),

    /// Unsupported algorithm or container shape
    #[error("Unsupported feature: {0}")]
    Unsupported(String),
}

impl Error {
    /// Shorthand for a parse error without a meaningful offset.
    pub(crate) fn parse(what: &'static str, reason: impl Into<String>) -> Self {
        Error::Parse {
            what,
            offset: 0,
            reason: reason.into(),
        }
    }

    /// Shorthand for a parse error anchored at a byte offset.
    pub(crate) fn parse_at(what: &'static str, offset: usize, reason: impl Into<String>) -> Self {
        Error::Parse {
            what,
            offset,
            reason: reason.into(),
        }
    }
}

impl From<der::Error> for Error {
    fn from(err: der::Error) -> Self {
        Error::Parse {
            what: "DER structure",
            offset: err.position().map(|p| u32::from(p) as usize).unwrap_or(0),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_message() {
        let err = Error::parse_at("CMS container", 1234, "invalid tag");
        let msg = format!("{}", err);
        assert!(msg.contains("1234"));
        assert!(msg.contains("invalid tag"));
        assert!(msg.contains("CMS container"));
    }

    #[test]
    fn test_protocol_error_message() {
        let err = Error::Protocol("signature exceeds reserved placeholder".to_string());
        assert!(format!("{}", err).contains("protocol violation"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
