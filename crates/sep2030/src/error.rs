// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error taxonomy for the engine.
//!
//! Transport, protocol, codec, and scheduling errors are ordinary
//! [`Result`] values; a mismatch between a [`crate::retrieve::DepFunc`]
//! table entry and the actual response type is a programmer error and
//! is reported as [`Error::Inconsistent`] so the caller can choose to
//! abort rather than continue with a corrupted dependency graph.

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All error conditions the engine can report.
#[derive(Debug)]
pub enum Error {
    // -- Transport --
    /// The peer refused, reset, or otherwise tore down the connection.
    ConnectionClosed,
    /// TLS handshake failed.
    TlsHandshake(String),
    /// Underlying I/O error.
    Io(std::io::Error),
    /// A connection was torn down mid-pipeline; carries a description of
    /// the original cause for requests that were in flight at the time.
    Transport(String),

    // -- Protocol --
    /// Malformed HTTP status/header framing.
    MalformedHttp(String),
    /// A header line exceeded the connection's fixed buffer.
    HeaderTooLarge,
    /// A non-2xx/301/404/410 response was received.
    HttpStatus(u16),

    // -- Codec --
    /// Malformed XML or binary document.
    MalformedDocument(String),
    /// Document used an element or type outside the schema.
    SchemaViolation(String),
    /// Input ended with no more bytes coming, mid-document.
    Truncated,

    // -- Scheduling --
    /// `end <= start` for a scheduled event.
    EventInvalid,
    /// Event start is further in the past than the engine will accept.
    EventExpired,
    /// Event primacy or type this device does not implement.
    EventInapplicable,

    // -- Programmer --
    /// A [`crate::retrieve::DepFunc`] ran against a response of an
    /// unexpected type. The engine aborts rather than continue.
    Inconsistent(String),

    /// URI could not be parsed.
    InvalidUri(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConnectionClosed => write!(f, "connection closed"),
            Error::TlsHandshake(s) => write!(f, "TLS handshake failed: {s}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Transport(s) => write!(f, "transport lost: {s}"),
            Error::MalformedHttp(s) => write!(f, "malformed HTTP: {s}"),
            Error::HeaderTooLarge => write!(f, "HTTP header exceeded buffer"),
            Error::HttpStatus(code) => write!(f, "HTTP status {code}"),
            Error::MalformedDocument(s) => write!(f, "malformed document: {s}"),
            Error::SchemaViolation(s) => write!(f, "schema violation: {s}"),
            Error::Truncated => write!(f, "document truncated"),
            Error::EventInvalid => write!(f, "EventInvalid"),
            Error::EventExpired => write!(f, "EventExpired"),
            Error::EventInapplicable => write!(f, "EventInapplicable"),
            Error::Inconsistent(s) => write!(f, "inconsistent dependency graph: {s}"),
            Error::InvalidUri(s) => write!(f, "invalid URI: {s}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
