//! Error taxonomy for the control-plane client.
//!
//! [`KiteError`] is what every public operation returns. Protocol
//! violations (by the daemon or by a corrupted packet) are grouped under
//! [`ProtocolError`] so callers can tell "the peer misbehaved" apart from
//! "we could not reach the peer" and "the caller asked for something
//! impossible".

// Rust guideline compliant 2026-02

use std::path::PathBuf;

use crate::protocol::ResponseCode;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, KiteError>;

/// A violation of the wire protocol, or a domain-level failure reported by
/// the daemon through a response code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Bytes on the wire could not be parsed (truncated header, declared
    /// length beyond the buffer, bad text, ...).
    Malformed(String),
    /// A response lacked an attribute the operation requires.
    MissingAttribute(&'static str),
    /// A fixed-size attribute arrived with the wrong payload length.
    WrongLength {
        /// Attribute name.
        attr: &'static str,
        /// Expected payload length in bytes.
        expected: usize,
        /// Actual payload length in bytes.
        actual: usize,
    },
    /// A reply did not carry the response bit, or answered another request.
    UnexpectedOpcode {
        /// Opcode we were waiting for (with the response bit set).
        expected: u16,
        /// Opcode that arrived.
        actual: u16,
    },
    /// The daemon answered with a non-success response code.
    ServerError(ResponseCode),
    /// An outgoing value cannot be represented on the wire.
    Encoding(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "malformed packet: {msg}"),
            Self::MissingAttribute(attr) => write!(f, "missing attribute in response: {attr}"),
            Self::WrongLength { attr, expected, actual } => {
                write!(f, "attribute {attr} has length {actual}, expected {expected}")
            }
            Self::UnexpectedOpcode { expected, actual } => {
                write!(f, "unexpected reply opcode 0x{actual:04x} (expected 0x{expected:04x})")
            }
            Self::ServerError(code) => write!(f, "daemon reported error code {}", code.0),
            Self::Encoding(msg) => write!(f, "cannot encode attribute: {msg}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Errors returned by the control-plane client.
#[derive(Debug)]
pub enum KiteError {
    /// The control socket is missing or refuses us: the caller lacks the
    /// privilege to reach the control plane.
    Permission(PathBuf),
    /// The daemon violated the protocol or reported a failure.
    Protocol(ProtocolError),
    /// Application registration streamed back a textual error.
    ApplicationFetch(String),
    /// The caller supplied an invalid combination of arguments.
    Config(String),
    /// A stored manifest exists but could not be parsed.
    Manifest {
        /// Manifest file name.
        name: String,
        /// Parse failure.
        source: serde_json::Error,
    },
    /// A stored token exists but is not valid JSON.
    Token {
        /// Token file name.
        name: String,
        /// Parse failure.
        source: serde_json::Error,
    },
    /// Any other I/O failure.
    Io(std::io::Error),
}

impl KiteError {
    /// Returns `true` when the error means "not permitted to reach the
    /// control plane" rather than an operational failure.
    pub fn is_permission(&self) -> bool {
        matches!(self, Self::Permission(_))
    }

    /// The daemon's response code, when the failure carries one.
    pub fn response_code(&self) -> Option<ResponseCode> {
        match self {
            Self::Protocol(ProtocolError::ServerError(code)) => Some(*code),
            _ => None,
        }
    }
}

impl std::fmt::Display for KiteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Permission(path) => write!(
                f,
                "control socket {} is not reachable; run with appliance privileges",
                path.display()
            ),
            Self::Protocol(err) => write!(f, "protocol error: {err}"),
            Self::ApplicationFetch(msg) => write!(f, "application fetch failed: {msg}"),
            Self::Config(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Manifest { name, source } => write!(f, "invalid manifest {name}: {source}"),
            Self::Token { name, source } => write!(f, "invalid token {name}: {source}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for KiteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Protocol(err) => Some(err),
            Self::Manifest { source, .. } | Self::Token { source, .. } => Some(source),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ProtocolError> for KiteError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

impl From<std::io::Error> for KiteError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
