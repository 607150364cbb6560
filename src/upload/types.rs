//! Upload types for resumable chunked uploads

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use axum::body::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageError;
use crate::kv::KvError;

// ============================================================================
// Client Identity
// ============================================================================

/// Network address + user agent of the uploading client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFingerprint {
    pub address: String,
    pub user_agent: String,
}

impl ClientFingerprint {
    pub fn new(address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            user_agent: user_agent.into(),
        }
    }
}

impl std::fmt::Display for ClientFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.address, self.user_agent)
    }
}

// ============================================================================
// Request Types
// ============================================================================

/// Descriptor sent with every chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRequestMeta {
    pub file_name: String,

    /// Declared file type, used as the artifact extension
    pub file_type: String,

    pub file_size: u64,

    pub file_size_unit: String,

    pub total_chunks: u32,

    /// 1-based chunk index
    pub chunk_number: u32,

    /// Client asks the server to finalize after this chunk
    #[serde(default)]
    pub compile_status: bool,
}

/// One inbound chunk, as handed over by the HTTP layer
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    /// Session token from the cookie, absent on first contact
    pub session_token: Option<String>,
    pub fingerprint: ClientFingerprint,
    pub meta: ChunkRequestMeta,
    pub data: Bytes,
}

// ============================================================================
// Session Types
// ============================================================================

/// File descriptor fixed at session creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub name: String,
    pub file_type: String,
    pub size: u64,
    pub size_unit: String,
    pub total_chunks: u32,
}

impl From<&ChunkRequestMeta> for FileMeta {
    fn from(meta: &ChunkRequestMeta) -> Self {
        Self {
            name: meta.file_name.clone(),
            file_type: meta.file_type.clone(),
            size: meta.file_size,
            size_unit: meta.file_size_unit.clone(),
            total_chunks: meta.total_chunks,
        }
    }
}

/// Upload session state, as persisted in the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub id: Uuid,

    pub fingerprint: ClientFingerprint,

    pub file: FileMeta,

    /// Chunk indices staged successfully; only grows
    pub received_chunks: BTreeSet<u32>,

    /// Chunk indices whose latest staging attempt failed, one entry per failure
    pub failed_chunks: Vec<u32>,

    pub created_at: DateTime<Utc>,

    /// Absolute expiry; never extended by activity
    pub expires_at: DateTime<Utc>,

    /// Set once a finalize attempt has claimed the session
    #[serde(default)]
    pub finalizing: bool,
}

impl UploadSession {
    /// Create a new upload session
    pub fn new(fingerprint: ClientFingerprint, file: FileMeta, ttl: Duration) -> Self {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));

        Self {
            id: Uuid::new_v4(),
            fingerprint,
            file,
            received_chunks: BTreeSet::new(),
            failed_chunks: Vec::new(),
            created_at: now,
            expires_at: now + ttl,
            finalizing: false,
        }
    }

    /// Time left until `expires_at`, `None` once it has passed
    pub fn remaining_ttl(&self) -> Option<Duration> {
        (self.expires_at - Utc::now())
            .to_std()
            .ok()
            .filter(|d| !d.is_zero())
    }

    /// Check whether `index` lies in `1..=total_chunks`
    pub fn is_valid_index(&self, index: u32) -> bool {
        (1..=self.file.total_chunks).contains(&index)
    }

    /// Record a successful staging of `index`
    ///
    /// Also clears earlier failures for the same index: the latest attempt wins.
    pub fn mark_chunk_received(&mut self, index: u32) {
        self.received_chunks.insert(index);
        self.failed_chunks.retain(|i| *i != index);
    }

    /// Record a failed staging of `index`
    pub fn mark_chunk_failed(&mut self, index: u32) {
        self.failed_chunks.push(index);
    }

    /// Check if all chunks have been received
    pub fn is_complete(&self) -> bool {
        self.received_chunks.len() == self.file.total_chunks as usize
    }

    /// Get indices of chunks that still need to be uploaded
    pub fn missing_chunks(&self) -> Vec<u32> {
        (1..=self.file.total_chunks)
            .filter(|i| !self.received_chunks.contains(i))
            .collect()
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Result of handling one chunk request
#[derive(Debug, Clone)]
pub struct UploadReply {
    pub session_id: Uuid,

    /// A session was created by this request; the caller issues the token
    pub new_session: bool,

    pub outcome: UploadOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Chunk staged; upload still in progress
    Accepted(ChunkReceipt),
    /// Chunk could not be staged; the client should retry this index
    StageFailed(ChunkReceipt),
    /// Artifact compiled and published; session gone
    Completed(CompletionReceipt),
    /// Finalize refused because some chunks failed; session gone
    PartialFailure(PartialFailureReceipt),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkReceipt {
    pub session_id: Uuid,
    pub chunk_number: u32,
    pub staged: bool,
    pub chunks_received: usize,
    pub total_chunks: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionReceipt {
    pub session_id: Uuid,
    pub bucket: String,
    pub object_key: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cleanup_errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialFailureReceipt {
    pub session_id: Uuid,
    pub failed_chunk_list: Vec<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cleanup_errors: Vec<String>,
}

/// Sidecar record attached to a published object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedMetadata {
    pub session_id: Uuid,
    pub ip_address: String,
    pub user_agent: String,
    pub file_details: FileMeta,
    pub creation_time: DateTime<Utc>,
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("Invalid session token: {0}")]
    SessionInvalidToken(String),

    #[error("Session is being finalized: {0}")]
    SessionFinalizing(Uuid),

    #[error("Chunk index out of range: {index} (expected 1..={total})")]
    ChunkIndexOutOfRange { index: u32, total: u32 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to stage chunk {index}: {source}")]
    ChunkStageFailure {
        index: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Compile failed: {0}")]
    CompileFailure(#[from] CompileError),

    #[error("Publish failed: {0}")]
    PublishFailure(#[from] StorageError),

    #[error("Session store error: {0}")]
    Store(#[from] KvError),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::SessionExpired(_) => StatusCode::UNAUTHORIZED,
            Self::SessionInvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::SessionFinalizing(_) => StatusCode::CONFLICT,
            Self::ChunkIndexOutOfRange { .. } => StatusCode::BAD_REQUEST,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::ChunkStageFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::CompileFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::PublishFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionExpired(_) => "SESSION_EXPIRED",
            Self::SessionInvalidToken(_) => "SESSION_INVALID_TOKEN",
            Self::SessionFinalizing(_) => "SESSION_FINALIZING",
            Self::ChunkIndexOutOfRange { .. } => "CHUNK_INDEX_OUT_OF_RANGE",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::ChunkStageFailure { .. } => "CHUNK_STAGE_FAILURE",
            Self::CompileFailure(_) => "COMPILE_FAILURE",
            Self::PublishFailure(_) => "PUBLISH_FAILURE",
            Self::Store(_) => "STORE_ERROR",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to hand to clients
    ///
    /// Store, sink and filesystem details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::SessionExpired(_) | Self::SessionInvalidToken(_) => {
                "Invalid credentials.".to_string()
            }
            Self::SessionFinalizing(_)
            | Self::ChunkIndexOutOfRange { .. }
            | Self::InvalidRequest(_) => self.to_string(),
            Self::ChunkStageFailure { index, .. } => format!("Chunk {} could not be stored", index),
            Self::CompileFailure(_) | Self::PublishFailure(_) => {
                "Upload could not be finalized".to_string()
            }
            Self::Store(_) | Self::InternalError(_) => "Internal server error.".to_string(),
        }
    }
}

/// Chunk concatenation errors
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("Staged chunk {index} is missing")]
    MissingChunk { index: u32 },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One failed step of a cleanup run
#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    #[error("Failed to remove {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete session record: {0}")]
    Registry(#[from] KvError),
}
