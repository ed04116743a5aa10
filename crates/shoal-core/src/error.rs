//! Error types for Shoal

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("invalid header")]
    InvalidHeader,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Refused: {0}")]
    Refused(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Tracker unavailable: {0}")]
    TrackerUnavailable(String),
}

pub type Result<T> = std::result::Result<T, Error>;
