//! Shared fixtures for upload integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use parking_lot::Mutex;
use tempfile::TempDir;

use chunk_upload_server::error::StorageError;
use chunk_upload_server::kv::MemoryStore;
use chunk_upload_server::storage::ObjectSink;
use chunk_upload_server::upload::{
    ArtifactLayout, ChunkRequest, ChunkRequestMeta, ClientFingerprint, Publisher, SessionRegistry,
    UploadService,
};

#[allow(unused_imports)]
pub use chunk_upload_server::upload::{UploadError, UploadOutcome, UploadReply};

pub const BUCKET: &str = "test-bucket";

// ============================================================================
// Sinks
// ============================================================================

/// Object captured by [`RecordingSink`]
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub content_type: String,
    pub body: Vec<u8>,
    pub metadata: HashMap<String, String>,
}

/// Sink that keeps every object in memory
#[derive(Default)]
pub struct RecordingSink {
    objects: Mutex<Vec<StoredObject>>,
}

impl RecordingSink {
    pub fn objects(&self) -> Vec<StoredObject> {
        self.objects.lock().clone()
    }
}

#[async_trait::async_trait]
impl ObjectSink for RecordingSink {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        file_path: &Path,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<(), StorageError> {
        let body = tokio::fs::read(file_path)
            .await
            .map_err(|e| StorageError::ArtifactUnreadable {
                path: file_path.display().to_string(),
                message: e.to_string(),
            })?;

        self.objects.lock().push(StoredObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_type: content_type.to_string(),
            body,
            metadata,
        });
        Ok(())
    }
}

/// Sink that rejects every upload
pub struct FailingSink;

#[async_trait::async_trait]
impl ObjectSink for FailingSink {
    async fn put_object(
        &self,
        bucket: &str,
        _key: &str,
        _file_path: &Path,
        _content_type: &str,
        _metadata: HashMap<String, String>,
    ) -> Result<(), StorageError> {
        Err(StorageError::AccessDenied(bucket.to_string()))
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub temp: TempDir,
    pub store: MemoryStore,
    pub registry: SessionRegistry,
    pub layout: ArtifactLayout,
    pub service: UploadService,
}

impl Harness {
    pub fn new(sink: Arc<dyn ObjectSink>) -> Self {
        Self::with_ttl(sink, Duration::from_secs(60))
    }

    pub fn with_ttl(sink: Arc<dyn ObjectSink>, ttl: Duration) -> Self {
        let temp = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(temp.path().join("staging"), temp.path().join("final"));
        let store = MemoryStore::new();
        let registry = SessionRegistry::new(Arc::new(store.clone()));
        let publisher = Publisher::new(sink, BUCKET, "uploads/");
        let service = UploadService::new(registry.clone(), layout.clone(), publisher, ttl);

        Self {
            temp,
            store,
            registry,
            layout,
            service,
        }
    }

    pub fn staging_root(&self) -> PathBuf {
        self.temp.path().join("staging")
    }

    pub fn final_root(&self) -> PathBuf {
        self.temp.path().join("final")
    }
}

// ============================================================================
// Requests
// ============================================================================

pub fn fingerprint() -> ClientFingerprint {
    ClientFingerprint::new("203.0.113.10", "uploader/1.0")
}

pub fn meta(total_chunks: u32, chunk_number: u32, finalize: bool) -> ChunkRequestMeta {
    ChunkRequestMeta {
        file_name: "report.txt".to_string(),
        file_type: "txt".to_string(),
        file_size: 3,
        file_size_unit: "KB".to_string(),
        total_chunks,
        chunk_number,
        compile_status: finalize,
    }
}

pub fn chunk(
    token: Option<String>,
    total_chunks: u32,
    chunk_number: u32,
    finalize: bool,
    data: &'static [u8],
) -> ChunkRequest {
    ChunkRequest {
        session_token: token,
        fingerprint: fingerprint(),
        meta: meta(total_chunks, chunk_number, finalize),
        data: Bytes::from_static(data),
    }
}
