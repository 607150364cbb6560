//! Error types for the chunk upload server

use thiserror::Error;

use crate::kv::KvError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
///
/// Covers process bootstrap and the shared store/sink clients. Per-request
/// upload failures use [`crate::upload::UploadError`] instead.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("S3 error: {0}")]
    Storage(#[from] StorageError),

    #[error("Session store error: {0}")]
    Store(#[from] KvError),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("S3 connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Failed to read artifact {path}: {message}")]
    ArtifactUnreadable { path: String, message: String },

    #[error("S3 SDK error: {0}")]
    SdkError(String),
}
