//! Error types for the companion agent

use thiserror::Error;

/// Result type alias for companion operations
pub type Result<T> = std::result::Result<T, CompanionError>;

#[derive(Error, Debug)]
pub enum CompanionError {

    // =============================
    // Core Engine Errors
    // =============================

    #[error("Session error: {0}")]
    SessionError(String),

    #[error("Extraction error: {0}")]
    ExtractionError(String),

    #[error("Malformed extraction output: {0}")]
    MalformedExtraction(String),

    #[error("Invalid candidate: {0}")]
    InvalidCandidate(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("UUID parse error: {0}")]
    UuidError(#[from] uuid::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
