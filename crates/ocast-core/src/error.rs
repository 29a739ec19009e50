//! Error taxonomy shared by every OCast crate.
//!
//! The taxonomy is kinds, not types: Transport, Protocol, State, Input. Every
//! crate boundary returns this `Error`, carrying a numeric code, a message,
//! and the underlying cause when one is available.

use std::fmt;

/// Broad category of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Socket not open, send failure, WebSocket close, HTTP non-2xx, DIAL "cannot stop".
    Transport,
    /// Unparseable frame, missing required field, unknown status, reply type mismatch, orphan reply.
    Protocol,
    /// Command issued in the wrong session state, application name unset, latch timeout.
    State,
    /// Malformed URL or out-of-range parameter supplied by the caller.
    Input,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::State => "state",
            ErrorKind::Input => "input",
        };
        f.write_str(s)
    }
}

/// The error type returned across every OCast crate boundary.
#[derive(Debug, thiserror::Error)]
#[error("[{kind}:{code}] {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub code: i32,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    pub fn new(kind: ErrorKind, code: i32, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Attach an underlying cause to an already-built error.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn transport(code: i32, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, code, message)
    }

    pub fn protocol(code: i32, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, code, message)
    }

    pub fn state(code: i32, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::State, code, message)
    }

    pub fn input(code: i32, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Input, code, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_code() {
        let err = Error::transport(-3, "socket disconnected");
        assert_eq!(err.to_string(), "[transport:-3] socket disconnected");
    }

    #[test]
    fn with_source_is_retrievable_via_error_trait() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = Error::transport(-3, "send failed").with_source(io_err);
        assert!(std::error::Error::source(&err).is_some());
    }
}
