//! Error types for perpetual-core

use thiserror::Error;

/// Result type alias using perpetual-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the chat client
#[derive(Error, Debug)]
pub enum Error {
    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network failure or non-success status from the completions endpoint.
    /// Fatal to the current turn.
    #[error("{0}")]
    Transport(String),

    /// Decoder method invoked after the stream terminated. A contract
    /// violation in the orchestration, not a user-facing condition.
    #[error("stream decoder used after terminal event")]
    InvalidState,

    /// Imported document is missing required fields
    #[error("invalid import: {0}")]
    ImportFormat(String),
}

impl Error {
    /// Create a transport error from a human-readable reason
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport(reason.into())
    }
}
