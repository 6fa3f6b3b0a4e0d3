//! Error types for the wraith crate.

use std::io;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while issuing HTTP requests.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid option value, rejected before any socket activity.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// Proxy URL lacking a usable scheme, host, or port.
    #[error("proxy parse error: {0}")]
    ProxyParse(String),

    /// I/O-level failure during connect, write, or body read.
    #[error("transport error: {0}")]
    Transport(#[source] io::Error),

    /// Malformed status line, header line, or chunk framing.
    #[error("HTTP protocol error: {0}")]
    Protocol(String),

    /// Connect, read, or write deadline exceeded.
    #[error("{phase} timeout exceeded")]
    Timeout { phase: &'static str },

    /// Response status outside the accepted set.
    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    /// The stub registry had no entry matching a mocked request.
    #[error("stub not found: {0}")]
    StubNotFound(String),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl Error {
    /// Create an argument error.
    pub fn argument(message: impl Into<String>) -> Self {
        Self::Argument(message.into())
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create an HTTP status error.
    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            message: message.into(),
        }
    }

    /// Classify an I/O failure from the socket boundary: expired deadlines
    /// surface as timeouts, everything else as a transport error.
    pub(crate) fn from_io(err: io::Error, phase: &'static str) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::Timeout { phase },
            _ => Self::Transport(err),
        }
    }

    /// Whether the orchestrator may transparently retry an idempotent request
    /// after this error.
    ///
    /// The retryable set is explicit: transport and protocol failures,
    /// timeouts, and HTTP status errors raised by the expectation middleware.
    /// Status errors stay retryable so that an idempotent request against a
    /// flapping backend converges without caller intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Protocol(_) | Self::Timeout { .. } | Self::HttpStatus { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        let err = Error::from_io(io::Error::from(io::ErrorKind::TimedOut), "read");
        assert!(matches!(err, Error::Timeout { phase: "read" }));

        let err = Error::from_io(io::Error::from(io::ErrorKind::WouldBlock), "write");
        assert!(matches!(err, Error::Timeout { phase: "write" }));

        let err = Error::from_io(io::Error::from(io::ErrorKind::ConnectionReset), "read");
        assert!(matches!(err, Error::Transport(_)));
    }

    #[test]
    fn test_retryable_classes() {
        assert!(Error::Transport(io::Error::other("boom")).is_retryable());
        assert!(Error::protocol("bad chunk").is_retryable());
        assert!(Error::Timeout { phase: "connect" }.is_retryable());
        assert!(Error::http_status(500, "unexpected").is_retryable());

        assert!(!Error::argument("bad option").is_retryable());
        assert!(!Error::ProxyParse("no host".into()).is_retryable());
        assert!(!Error::StubNotFound("GET /".into()).is_retryable());
    }
}
