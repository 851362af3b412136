use std::sync::Arc;

use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};

use crate::models::job::Artifact;
use crate::services::batch::{ArtifactSink, SinkError};

/// Client for Cloudflare R2 object storage (S3-compatible).
pub struct R2Client {
    bucket: Box<Bucket>,
}

impl R2Client {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self { bucket })
    }

    pub fn bucket_name(&self) -> String {
        self.bucket.name()
    }

    /// Upload an object, replacing any existing object under `key`.
    pub async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, data, content_type)
            .await?;

        let code = response.status_code();
        if !(200..300).contains(&code) {
            return Err(StorageError::Status { key: key.to_string(), code });
        }
        Ok(())
    }
}

/// Join a folder prefix and an entry name into an object key.
pub fn object_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Batch sink uploading each artifact under `<prefix>/<name>`.
pub struct StorageSink {
    client: Arc<R2Client>,
    prefix: String,
    uploaded: Vec<String>,
}

impl StorageSink {
    pub fn new(client: Arc<R2Client>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
            uploaded: Vec::new(),
        }
    }

    /// Keys written so far, in upload order.
    pub fn uploaded(&self) -> &[String] {
        &self.uploaded
    }
}

#[async_trait]
impl ArtifactSink for StorageSink {
    async fn put(&mut self, name: &str, artifact: &Artifact) -> Result<(), SinkError> {
        let key = object_key(&self.prefix, name);
        let bytes = artifact.read_all().await?;

        self.client.upload(&key, &bytes, &artifact.content_type).await?;
        tracing::info!(key = %key, size_bytes = bytes.len(), "Uploaded artifact");

        self.uploaded.push(key);
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Upload of {key} rejected with HTTP {code}")]
    Status { key: String, code: u16 },

    #[error("Storage configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("tours/lisbon", "image_1.jpg"), "tours/lisbon/image_1.jpg");
        assert_eq!(object_key("/tours/", "image_2.jpg"), "tours/image_2.jpg");
        assert_eq!(object_key("", "image_3.jpg"), "image_3.jpg");
    }

    #[test]
    fn test_client_builds_without_network() {
        let client = R2Client::new(
            "media",
            "https://account.r2.cloudflarestorage.com",
            "access",
            "secret",
        )
        .unwrap();
        assert_eq!(client.bucket_name(), "media");

        let sink = StorageSink::new(Arc::new(client), "tours");
        assert!(sink.uploaded().is_empty());
    }
}
