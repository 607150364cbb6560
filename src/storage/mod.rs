//! Durable object sink
//!
//! Final artifacts are published to an S3-compatible bucket (MinIO,
//! Cloudflare R2, Backblaze B2, AWS S3). The sink is a trait so the publish
//! path can be exercised without a live bucket.

mod s3_client;

use std::collections::HashMap;
use std::path::Path;

use crate::error::StorageError;

pub use s3_client::S3Client;

/// Destination for finalized artifacts
#[async_trait::async_trait]
pub trait ObjectSink: Send + Sync {
    /// Upload the file at `file_path` to `bucket/key`
    ///
    /// Writing an existing key replaces the object.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        file_path: &Path,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<(), StorageError>;
}
