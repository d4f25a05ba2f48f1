//! Process-local storage over `object_store`'s in-memory backend, plus the
//! connection settings shared with the S3 client.
//!
//! Objects here have no ACL or content type; nothing outside the process
//! can read them.

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{memory::InMemory, path::Path, ObjectStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

use webshot_common::{ShotError, ShotResult};

use crate::{AssetStore, StorageKey};

/// Connection settings for S3 and S3-compatible stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStorageConfig {
    /// S3/MinIO endpoint URL (None for AWS)
    pub endpoint: Option<String>,
    /// Bucket name
    pub bucket: String,
    /// Access key ID
    pub access_key_id: Option<String>,
    /// Secret access key
    pub secret_access_key: Option<String>,
    /// AWS region (use "us-east-1" for MinIO)
    pub region: String,
    /// Host (or base URL) published objects are reachable at
    pub public_host: String,
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            bucket: "webshot".to_string(),
            access_key_id: None,
            secret_access_key: None,
            region: "us-east-1".to_string(),
            public_host: "s3.amazonaws.com".to_string(),
        }
    }
}

/// In-memory object store for rendered images.
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    public_host: String,
}

impl ObjectStorage {
    /// In-memory store, used for local runs and tests.
    pub fn in_memory(bucket: &str, public_host: &str) -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            bucket: bucket.to_string(),
            public_host: public_host.to_string(),
        }
    }

    /// Write bytes to a path in the bucket.
    #[instrument(skip(self, data), fields(bucket = %self.bucket, path = %path))]
    pub async fn put(&self, path: &str, data: Bytes) -> ShotResult<()> {
        let location = Path::from(path);
        debug!(size = data.len(), "Writing object");

        self.store
            .put(&location, data.into())
            .await
            .map_err(|e| ShotError::StorageError(format!("Failed to write {}: {}", path, e)))?;

        Ok(())
    }

    /// Read bytes from a path.
    #[instrument(skip(self), fields(bucket = %self.bucket, path = %path))]
    pub async fn get(&self, path: &str) -> ShotResult<Bytes> {
        let location = Path::from(path);

        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| ShotError::StorageError(format!("Failed to read {}: {}", path, e)))?;

        let bytes = result
            .bytes()
            .await
            .map_err(|e| ShotError::StorageError(format!("Failed to read bytes: {}", e)))?;

        debug!(size = bytes.len(), "Read object");
        Ok(bytes)
    }

    /// List object keys with a given prefix, sorted.
    pub async fn list(&self, prefix: &str) -> ShotResult<Vec<String>> {
        use futures::TryStreamExt;

        let prefix_path = Path::from(prefix);
        let mut paths = Vec::new();

        let mut stream = self.store.list(Some(&prefix_path));
        while let Some(meta) = stream
            .try_next()
            .await
            .map_err(|e| ShotError::StorageError(format!("List failed: {}", e)))?
        {
            paths.push(meta.location.to_string());
        }

        paths.sort();
        Ok(paths)
    }
}

#[async_trait]
impl AssetStore for ObjectStorage {
    async fn put_public(&self, key: &str, data: Bytes, _content_type: &str) -> ShotResult<String> {
        self.put(key, data).await?;
        Ok(self.public_url(key))
    }

    fn public_url(&self, key: &str) -> String {
        StorageKey::public_url(&self.public_host, &self.bucket, key)
    }
}
