//! Error types for the Lyra voice client

use thiserror::Error;

/// Result type alias for Lyra operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Connect attempt or mid-stream transport failure
    #[error("connection error: {0}")]
    Connection(String),

    /// A send was attempted while the connection was down
    #[error("not connected")]
    NotConnected,

    /// Audio device error (open/read/write)
    #[error("audio device error: {0}")]
    Device(String),

    /// Malformed inbound control message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Wake word recognizer unavailable or failed
    #[error("recognizer error: {0}")]
    Recognizer(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
