//! Error types for the Mercury host.

use std::path::PathBuf;

/// Host error type.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Mercury core error.
    #[error("Core error: {0}")]
    Core(#[from] mercury_core::Error),

    /// The registry actor has stopped.
    #[error("Registry mailbox is closed")]
    MailboxClosed,

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error at {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<std::io::Error> for HostError {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::new(),
            message: e.to_string(),
        }
    }
}

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;
