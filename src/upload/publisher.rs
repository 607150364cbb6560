//! Publisher
//!
//! Uploads a compiled artifact to the object sink under a key derived from
//! the session id, with the published metadata record attached.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use super::staging::extension;
use super::types::{PublishedMetadata, UploadSession};
use crate::error::StorageError;
use crate::storage::ObjectSink;

/// Object metadata entry holding the JSON-encoded [`PublishedMetadata`]
pub const METADATA_KEY: &str = "upload-metadata";

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Location of a published artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedObject {
    pub bucket: String,
    pub key: String,
}

#[derive(Clone)]
pub struct Publisher {
    sink: Arc<dyn ObjectSink>,
    bucket: String,
    key_prefix: String,
}

impl Publisher {
    pub fn new(sink: Arc<dyn ObjectSink>, bucket: impl Into<String>, key_prefix: impl Into<String>) -> Self {
        Self {
            sink,
            bucket: bucket.into(),
            key_prefix: key_prefix.into(),
        }
    }

    /// Object key for a session; stable so re-publishing overwrites
    pub fn object_key(&self, session: &UploadSession) -> String {
        format!("{}{}", self.key_prefix, session.id)
    }

    pub async fn publish(
        &self,
        artifact: &Path,
        session: &UploadSession,
    ) -> Result<PublishedObject, StorageError> {
        let key = self.object_key(session);
        let content_type = content_type_for(&session.file.file_type);

        let record = PublishedMetadata {
            session_id: session.id,
            ip_address: session.fingerprint.address.clone(),
            user_agent: session.fingerprint.user_agent.clone(),
            file_details: session.file.clone(),
            creation_time: Utc::now(),
        };
        let encoded = serde_json::to_string(&record)
            .map_err(|e| StorageError::SdkError(format!("Failed to encode metadata: {}", e)))?;

        let mut metadata = HashMap::new();
        metadata.insert(METADATA_KEY.to_string(), encoded);

        self.sink
            .put_object(&self.bucket, &key, artifact, &content_type, metadata)
            .await?;

        tracing::info!(
            session_id = %session.id,
            bucket = %self.bucket,
            key = %key,
            content_type = %content_type,
            "Published artifact"
        );

        Ok(PublishedObject {
            bucket: self.bucket.clone(),
            key,
        })
    }
}

/// Content type for a declared file type
pub fn content_type_for(file_type: &str) -> String {
    mime_guess::from_ext(extension(file_type))
        .first_raw()
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}
