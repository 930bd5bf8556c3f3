//! Error types for the Earshot node.

use thiserror::Error;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in node operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Engine configuration rejected by the core
    #[error("Engine error: {0}")]
    Engine(#[from] earshot_core::Error),

    /// Transport error talking to the chat platform
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The chat platform answered with a non-success status
    #[error("Upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    /// A collaborator could not serve the request
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
