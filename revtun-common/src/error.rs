//! Error types for revtun

use revtun_protocol::{CodecError, ProtocolError, Reply};
use thiserror::Error;

/// Main error type for revtun operations
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Socket read/write/dial failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer violated the wire format
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// JOIN rejected because the name is taken
    #[error("Duplicate agent name: {0}")]
    DuplicateAgentName(String),

    /// JOIN rejected with an unrecognised reply
    #[error("Join rejected with reply {0:?}")]
    JoinRejected(Reply),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection error
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Per-agent connection id space ran out
    #[error("Connection id space exhausted")]
    IdExhausted,
}

impl TunnelError {
    /// Whether this error came from the socket rather than the peer's bytes.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Timeout(_) | Self::Connection(_))
    }
}

impl From<CodecError> for TunnelError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => Self::Io(e),
            CodecError::Protocol(e) => Self::Protocol(e),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, TunnelError>;
