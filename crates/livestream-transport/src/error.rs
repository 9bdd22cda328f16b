//! Error types for the transport module.

use thiserror::Error;

/// Synchronous errors returned to the caller of a start request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LiveStreamError {
    /// A required input is missing or malformed.
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// The request is not valid in the current state.
    #[error("Illegal operation: {0}")]
    IllegalOperation(String),
}

/// Errors that can occur inside a transport engine.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection error (general).
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server refused the connection or the publish request.
    #[error("Connection rejected: {0}")]
    Rejected(String),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Send error.
    #[error("Send error: {0}")]
    Send(String),

    /// Not connected.
    #[error("Not connected")]
    NotConnected,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
