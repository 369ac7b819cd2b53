//! Error types shared across the PayScope workspace

use thiserror::Error;

/// Result type alias for PayScope operations
pub type Result<T> = std::result::Result<T, PayscopeError>;

/// Main error type for cross-cutting PayScope failures
#[derive(Error, Debug)]
pub enum PayscopeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}
