//! S3 storage through the official SDK: AWS itself, or an S3-compatible
//! endpoint such as MinIO.

use async_trait::async_trait;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use bytes::Bytes;
use tracing::{debug, instrument};

use webshot_common::{ShotError, ShotResult};

use crate::{AssetStore, ObjectStorageConfig, StorageKey};

/// S3 client that uploads objects with a `public-read` ACL.
pub struct S3Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
    public_host: String,
}

impl S3Storage {
    /// Build a client from config; falls back to the default AWS credential chain.
    pub async fn connect(config: &ObjectStorageConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        if let (Some(key), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                key.clone(),
                secret.clone(),
                None,
                None,
                "webshot-config",
            ));
        }
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }

        let sdk_config = loader.load().await;
        // Custom endpoints (MinIO) address buckets by path, not by subdomain.
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.endpoint.is_some())
            .build();

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            public_host: config.public_host.clone(),
        }
    }
}

#[async_trait]
impl AssetStore for S3Storage {
    #[instrument(skip(self, data), fields(bucket = %self.bucket, key = %key))]
    async fn put_public(&self, key: &str, data: Bytes, content_type: &str) -> ShotResult<String> {
        debug!(size = data.len(), "Uploading object");

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .acl(ObjectCannedAcl::PublicRead)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| {
                ShotError::StorageError(format!(
                    "Failed to upload {}: {}",
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;

        Ok(self.public_url(key))
    }

    fn public_url(&self, key: &str) -> String {
        StorageKey::public_url(&self.public_host, &self.bucket, key)
    }
}
