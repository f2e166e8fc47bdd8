//! Error types for cambia-upload

use thiserror::Error;

/// Upload pipeline error type
#[derive(Debug, Error)]
pub enum UploadError {
    /// Server base URL could not be turned into a socket endpoint
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    /// Server reply failed to decode or matched neither reply shape
    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    /// Wire id or upload frame had the wrong length
    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    /// Background task failed to complete
    #[error("Task failed: {0}")]
    Task(String),
}

/// Result type for the upload pipeline
pub type UploadResult<T> = Result<T, UploadError>;
