//! Error values used across the engine.
//!
//! Recoverable failures are plain values: the parser reports a coded
//! [`ParseError`], configuration problems surface as [`ConfigError`], and the
//! response builder rejects codes outside the status table with
//! [`BuildError`]. Invariant violations (double registration of a connection,
//! use of a released pooled object) are panics, not errors.

use std::{fmt, io, net::SocketAddr};
use thiserror::Error;

/// Stable numeric codes carried by [`ParseError`].
///
/// The numeric values are part of the public contract and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    /// Something the parser did not anticipate.
    Unknown = 0,
    /// The request line is not `METHOD SP PATH SP VERSION`.
    RequestLineSyntax = 1,
    /// A header line has no colon or an empty value.
    HeaderSyntax = 2,
    /// The same header name (compared case-insensitively) appeared twice.
    DuplicateHeader = 3,
    /// A header the parser interprets carried an unusable value.
    InvalidHeaderValue = 4,
}

impl ErrorCode {
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// A recoverable request parsing failure: `{ code, message }`.
///
/// Returned by [`Parser::parse`](crate::Parser::parse). The pipeline turns
/// every `ParseError` into `400 Bad Request`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error {code}: {message}")]
pub struct ParseError {
    code: ErrorCode,
    message: &'static str,
}

impl ParseError {
    #[inline]
    pub(crate) const fn new(code: ErrorCode, message: &'static str) -> Self {
        Self { code, message }
    }

    pub(crate) const fn request_line(message: &'static str) -> Self {
        Self::new(ErrorCode::RequestLineSyntax, message)
    }

    pub(crate) const fn header_syntax(message: &'static str) -> Self {
        Self::new(ErrorCode::HeaderSyntax, message)
    }

    pub(crate) const fn duplicate_header() -> Self {
        Self::new(ErrorCode::DuplicateHeader, "header already present")
    }

    pub(crate) const fn invalid_header_value(message: &'static str) -> Self {
        Self::new(ErrorCode::InvalidHeaderValue, message)
    }

    /// Stable error code.
    #[inline]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    /// Human readable description.
    #[inline]
    pub const fn message(&self) -> &'static str {
        self.message
    }
}

/// Misuse of a pooled object handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("pooled object was already released")]
    AlreadyReleased,
}

/// Rejected server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("workers_count must be at least 1")]
    InvalidWorkersCount,

    #[error("invalid limit `{field}`: {reason}")]
    InvalidLimit {
        field: &'static str,
        reason: &'static str,
    },

    #[error("address cannot change while the listener is bound")]
    ListenerActive,
}

impl ConfigError {
    pub(crate) const fn limit(field: &'static str, reason: &'static str) -> Self {
        Self::InvalidLimit { field, reason }
    }
}

/// Failure to serialize a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("unknown response code {0}")]
    UnknownResponseCode(u16),
}

/// Failure while starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to build the runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("failed to start the heartbeat thread: {0}")]
    Heartbeat(#[source] io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("accept loop terminated abnormally")]
    AcceptLoop,
}
