//! Storage abstractions for webshot services.
//!
//! Provides one publishing interface over:
//! - S3 and S3-compatible endpoints such as MinIO via the official SDK
//!   (canned `public-read` ACL, content type)
//! - An in-memory `object_store` backend for local runs and tests

pub mod object_store;
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;

use webshot_common::ShotResult;

pub use self::object_store::{ObjectStorage, ObjectStorageConfig};
pub use s3::S3Storage;

/// Durable, publicly readable object storage for rendered images.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Upload `data` under `key` as a public object and return its public URL.
    async fn put_public(&self, key: &str, data: Bytes, content_type: &str) -> ShotResult<String>;

    /// Public URL an object under `key` is reachable at.
    fn public_url(&self, key: &str) -> String;
}

/// Key builder for a consistent bucket layout.
pub struct StorageKey;

impl StorageKey {
    /// Object key for a file name under the configured prefix.
    /// Format: {prefix}/{name}
    pub fn object(prefix: &str, name: &str) -> String {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", prefix, name)
        }
    }

    /// Public URL for a key.
    /// Format: {public_base}/{bucket}/{key}
    pub fn public_url(public_base: &str, bucket: &str, key: &str) -> String {
        let base = public_base.trim_end_matches('/');
        let base = if base.contains("://") {
            base.to_string()
        } else {
            format!("https://{}", base)
        };
        format!("{}/{}/{}", base, bucket, key)
    }
}
