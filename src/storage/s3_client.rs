//! S3-compatible storage client
//!
//! Wraps the AWS SDK for S3-compatible storage access.

use std::collections::HashMap;
use std::path::Path;

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    Client,
};

use crate::config::StorageConfig;
use crate::error::StorageError;

use super::ObjectSink;

/// S3-compatible storage client
#[derive(Clone)]
pub struct S3Client {
    client: Client,
}

impl S3Client {
    /// Create a new S3 client from configuration
    pub async fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "chunk-upload-server",
        );

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO and other S3-compatible services
            .build();

        let client = Client::from_conf(s3_config);

        // Test connection by checking if bucket exists
        let bucket = &config.bucket;
        match client.head_bucket().bucket(bucket).send().await {
            Ok(_) => {
                tracing::info!("Connected to S3 bucket: {}", bucket);
            }
            Err(e) => {
                tracing::warn!(
                    "Could not verify bucket {}: {}. Will attempt operations anyway.",
                    bucket,
                    e
                );
            }
        }

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl ObjectSink for S3Client {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        file_path: &Path,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<(), StorageError> {
        let body = ByteStream::from_path(file_path)
            .await
            .map_err(|e| StorageError::ArtifactUnreadable {
                path: file_path.display().to_string(),
                message: e.to_string(),
            })?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .set_metadata(Some(metadata))
            .send()
            .await
            .map_err(|e| {
                let message = DisplayErrorContext(&e).to_string();
                if message.contains("NoSuchBucket") {
                    StorageError::BucketNotFound(bucket.to_string())
                } else if message.contains("AccessDenied") {
                    StorageError::AccessDenied(format!("{}/{}", bucket, key))
                } else if message.contains("dispatch failure") {
                    StorageError::ConnectionFailed(message)
                } else {
                    StorageError::SdkError(format!("Failed to put object {}: {}", key, message))
                }
            })?;

        tracing::debug!(bucket = %bucket, key = %key, content_type = %content_type, "Stored object");

        Ok(())
    }
}
