//! Error types for medchat-core

use thiserror::Error;

/// Main error type for the medchat-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Local storage database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Socket transport error (handshake, network, closed link)
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed Engine.IO / Socket.IO frame
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Key-value storage error not covered by the database variant
    #[error("storage error: {0}")]
    Storage(String),

    /// The chat driver loop has shut down
    #[error("chat session closed")]
    Closed,
}

/// Result type alias for medchat-core
pub type Result<T> = std::result::Result<T, Error>;
