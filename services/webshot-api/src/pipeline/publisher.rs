//! Fan-out of a rendered image into published variants.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, instrument, warn};

use storage::{AssetStore, StorageKey};
use webshot_common::{ArtifactPaths, Dimension, OutputFormat, RenderRequest, ShotError, ShotResult};

use super::resize::{image_size, resize_image};
use crate::metrics;

/// One published rendition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantUpload {
    pub width: u32,
    pub height: u32,
    #[serde(skip)]
    pub key: String,
    pub url: String,
}

/// A requested rendition that could not be produced or uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantFailure {
    pub width: u32,
    pub height: u32,
    pub error: String,
}

/// Outcome of publishing one render.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishReport {
    /// No extra dimensions were requested: one object under the render's own name.
    Single(VariantUpload),
    /// Resized variants in request order followed by the default variant.
    Variants {
        uploads: Vec<VariantUpload>,
        failed: Vec<VariantFailure>,
    },
}

impl PublishReport {
    pub fn uploads(&self) -> Vec<&VariantUpload> {
        match self {
            PublishReport::Single(upload) => vec![upload],
            PublishReport::Variants { uploads, .. } => uploads.iter().collect(),
        }
    }
}

/// Uploads the default variant and every requested resize to object storage.
pub struct AssetPublisher {
    store: Arc<dyn AssetStore>,
    prefix: String,
}

impl AssetPublisher {
    pub fn new(store: Arc<dyn AssetStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// Publish `data`, the full content of the render at `paths`.
    ///
    /// The caller holds the bytes in memory, so the local file may be deleted
    /// as soon as this returns. The default variant and every resize are
    /// uploaded concurrently and each outcome lands in the report; this only
    /// fails when nothing at all could be uploaded.
    #[instrument(skip_all, fields(fingerprint = %paths.fingerprint))]
    pub async fn publish(
        &self,
        request: &RenderRequest,
        paths: &ArtifactPaths,
        data: Bytes,
    ) -> ShotResult<PublishReport> {
        let start = Instant::now();
        let format = paths.format;

        let report = if request.dimensions.is_empty() {
            // The original goes up unmodified; its size is informational only.
            let default_size = match self.default_size(request, &data).await {
                Ok(size) => size,
                Err(e) => {
                    warn!(error = %e, "Could not read render size");
                    Dimension::new(request.width.unwrap_or(0), request.height.unwrap_or(0))
                }
            };
            let key = StorageKey::object(&self.prefix, &paths.file_name);
            let upload = self.upload_default(key, default_size, data, format).await?;
            PublishReport::Single(upload)
        } else {
            let default_size = self.default_size(request, &data).await?;
            let key = StorageKey::object(
                &self.prefix,
                &paths.variant_name(default_size.width, default_size.height),
            );

            // A resize to the default size would land on the default's key.
            let mut variants: Vec<Dimension> = Vec::with_capacity(request.dimensions.len());
            for dim in &request.dimensions {
                if *dim != default_size && !variants.contains(dim) {
                    variants.push(*dim);
                }
            }

            let (default, results) = futures::join!(
                self.upload_default(key, default_size, data.clone(), format),
                join_all(
                    variants
                        .iter()
                        .map(|dim| self.upload_variant(paths, *dim, data.clone(), format)),
                ),
            );

            let mut uploads = Vec::with_capacity(results.len() + 1);
            let mut failed = Vec::new();
            let outcomes = variants.iter().zip(results).chain(std::iter::once((&default_size, default)));
            for (dim, result) in outcomes {
                match result {
                    Ok(upload) => uploads.push(upload),
                    Err(e) => {
                        warn!(width = dim.width, height = dim.height, error = %e, "Variant upload failed");
                        failed.push(VariantFailure {
                            width: dim.width,
                            height: dim.height,
                            error: e.to_string(),
                        });
                    }
                }
            }

            if uploads.is_empty() {
                let reasons: Vec<String> = failed
                    .iter()
                    .map(|f| format!("{}x{}: {}", f.width, f.height, f.error))
                    .collect();
                return Err(ShotError::PublishFailed(reasons.join("; ")));
            }
            PublishReport::Variants { uploads, failed }
        };

        metrics::record_publish(start.elapsed());
        info!(
            uploads = report.uploads().len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Published render"
        );
        Ok(report)
    }

    /// Size of the default variant: the requested size, with missing sides
    /// read from the image header.
    async fn default_size(&self, request: &RenderRequest, data: &Bytes) -> ShotResult<Dimension> {
        if let (Some(width), Some(height)) = (request.width, request.height) {
            return Ok(Dimension::new(width, height));
        }
        let data = data.clone();
        let native = tokio::task::spawn_blocking(move || image_size(&data))
            .await
            .map_err(|e| ShotError::Internal(format!("Size read task failed: {}", e)))??;
        Ok(Dimension::new(
            request.width.unwrap_or(native.width),
            request.height.unwrap_or(native.height),
        ))
    }

    async fn upload_default(
        &self,
        key: String,
        size: Dimension,
        data: Bytes,
        format: OutputFormat,
    ) -> ShotResult<VariantUpload> {
        let url = self
            .put(&key, data, format)
            .await
            .map_err(|e| ShotError::PublishFailed(e.to_string()))?;
        Ok(VariantUpload {
            width: size.width,
            height: size.height,
            key,
            url,
        })
    }

    async fn upload_variant(
        &self,
        paths: &ArtifactPaths,
        dim: Dimension,
        data: Bytes,
        format: OutputFormat,
    ) -> ShotResult<VariantUpload> {
        let resized = tokio::task::spawn_blocking(move || resize_image(&data, dim, format))
            .await
            .map_err(|e| ShotError::Internal(format!("Resize task failed: {}", e)))??;

        let key = StorageKey::object(&self.prefix, &paths.variant_name(dim.width, dim.height));
        let url = self.put(&key, resized, format).await?;
        Ok(VariantUpload {
            width: dim.width,
            height: dim.height,
            key,
            url,
        })
    }

    async fn put(&self, key: &str, data: Bytes, format: OutputFormat) -> ShotResult<String> {
        let result = self.store.put_public(key, data, format.content_type()).await;
        metrics::record_upload(result.is_ok());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use storage::ObjectStorage;
    use test_utils::fixtures::{decoded_size, png_bytes};
    use webshot_common::PathResolver;

    fn setup(dims: &[(u32, u32)]) -> (RenderRequest, ArtifactPaths) {
        let mut request = RenderRequest::new("example.com").unwrap();
        request.dimensions = dims.iter().map(|(w, h)| Dimension::new(*w, *h)).collect();
        let paths = PathResolver::new("/tmp", OutputFormat::Png).resolve(&request);
        (request, paths)
    }

    #[tokio::test]
    async fn test_single_variant_uses_render_name() {
        let store = Arc::new(ObjectStorage::in_memory("shots", "s3.amazonaws.com"));
        let publisher = AssetPublisher::new(store.clone(), "screenshots");
        let (request, paths) = setup(&[]);

        let report = publisher
            .publish(&request, &paths, Bytes::from(png_bytes(64, 32)))
            .await
            .unwrap();

        let PublishReport::Single(upload) = report else {
            panic!("expected single upload");
        };
        assert_eq!(upload.key, format!("screenshots/{}", paths.file_name));
        assert_eq!(
            upload.url,
            format!("https://s3.amazonaws.com/shots/screenshots/{}", paths.file_name)
        );
        assert_eq!((upload.width, upload.height), (64, 32));
    }

    #[tokio::test]
    async fn test_variants_resized_and_default_last() {
        let store = Arc::new(ObjectStorage::in_memory("shots", "s3.amazonaws.com"));
        let publisher = AssetPublisher::new(store.clone(), "screenshots");
        let (request, paths) = setup(&[(100, 50), (20, 20)]);

        let report = publisher
            .publish(&request, &paths, Bytes::from(png_bytes(400, 200)))
            .await
            .unwrap();
        let uploads = report.uploads();

        let sizes: Vec<_> = uploads.iter().map(|u| (u.width, u.height)).collect();
        assert_eq!(sizes, vec![(100, 50), (20, 20), (400, 200)]);
        assert_eq!(
            uploads[0].key,
            format!("screenshots/{}_100-50.png", paths.base_name)
        );

        let small = store.get(&uploads[0].key).await.unwrap();
        assert_eq!(decoded_size(&small), (100, 50));
        assert_eq!(store.list("screenshots").await.unwrap().len(), 3);
    }

    /// Store that rejects keys containing a marker.
    struct FlakyStore {
        inner: ObjectStorage,
        reject: &'static str,
        attempts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AssetStore for FlakyStore {
        async fn put_public(&self, key: &str, data: Bytes, ct: &str) -> ShotResult<String> {
            self.attempts.lock().unwrap().push(key.to_string());
            if key.contains(self.reject) {
                return Err(ShotError::StorageError("access denied".into()));
            }
            self.inner.put_public(key, data, ct).await
        }

        fn public_url(&self, key: &str) -> String {
            self.inner.public_url(key)
        }
    }

    #[tokio::test]
    async fn test_variant_failure_is_reported() {
        let store = flaky("_100-50");
        let publisher = AssetPublisher::new(store.clone(), "screenshots");
        let (request, paths) = setup(&[(100, 50), (30, 30)]);

        let report = publisher
            .publish(&request, &paths, Bytes::from(png_bytes(300, 300)))
            .await
            .unwrap();

        let PublishReport::Variants { uploads, failed } = report else {
            panic!("expected variant report");
        };
        assert_eq!(uploads.len(), 2);
        assert_eq!(failed.len(), 1);
        assert_eq!((failed[0].width, failed[0].height), (100, 50));
        assert!(failed[0].error.contains("access denied"));
    }

    fn flaky(reject: &'static str) -> Arc<FlakyStore> {
        Arc::new(FlakyStore {
            inner: ObjectStorage::in_memory("shots", "s3.amazonaws.com"),
            reject,
            attempts: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_default_failure_keeps_variants() {
        let store = flaky("_50-50");
        let publisher = AssetPublisher::new(store.clone(), "screenshots");
        let (request, paths) = setup(&[(10, 10), (20, 10)]);

        let report = publisher
            .publish(&request, &paths, Bytes::from(png_bytes(50, 50)))
            .await
            .unwrap();

        let PublishReport::Variants { uploads, failed } = report else {
            panic!("expected variant report");
        };
        let sizes: Vec<_> = uploads.iter().map(|u| (u.width, u.height)).collect();
        assert_eq!(sizes, vec![(10, 10), (20, 10)]);
        assert_eq!(failed.len(), 1);
        assert_eq!((failed[0].width, failed[0].height), (50, 50));
        assert_eq!(store.attempts.lock().unwrap().len(), 3);
        assert_eq!(store.inner.list("screenshots").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_nothing_uploaded_is_error() {
        let store = flaky("screenshot_");
        let publisher = AssetPublisher::new(store.clone(), "screenshots");
        let (request, paths) = setup(&[(10, 10)]);

        let err = publisher
            .publish(&request, &paths, Bytes::from(png_bytes(50, 50)))
            .await
            .unwrap_err();
        assert!(matches!(err, ShotError::PublishFailed(_)));
        assert_eq!(store.attempts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_single_upload_skips_decoding() {
        let store = Arc::new(ObjectStorage::in_memory("shots", "s3.amazonaws.com"));
        let publisher = AssetPublisher::new(store.clone(), "screenshots");
        let (mut request, _) = setup(&[]);
        request.width = Some(800);
        request.height = Some(600);
        let paths = PathResolver::new("/tmp", OutputFormat::Png).resolve(&request);

        // Not an image, but the original is uploaded as is.
        let report = publisher
            .publish(&request, &paths, Bytes::from_static(b"opaque render"))
            .await
            .unwrap();

        let PublishReport::Single(upload) = report else {
            panic!("expected single upload");
        };
        assert_eq!((upload.width, upload.height), (800, 600));
        assert_eq!(
            store.get(&upload.key).await.unwrap(),
            Bytes::from_static(b"opaque render")
        );
    }

    #[tokio::test]
    async fn test_dimension_matching_default_is_not_duplicated() {
        let store = Arc::new(ObjectStorage::in_memory("shots", "s3.amazonaws.com"));
        let publisher = AssetPublisher::new(store.clone(), "screenshots");
        let (request, paths) = setup(&[(400, 200), (100, 50), (100, 50)]);

        let report = publisher
            .publish(&request, &paths, Bytes::from(png_bytes(400, 200)))
            .await
            .unwrap();

        let sizes: Vec<_> = report.uploads().iter().map(|u| (u.width, u.height)).collect();
        assert_eq!(sizes, vec![(100, 50), (400, 200)]);
        let default = store.get(&report.uploads()[1].key).await.unwrap();
        assert_eq!(default, Bytes::from(png_bytes(400, 200)));
        assert_eq!(store.list("screenshots").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_explicit_size_names_default() {
        let store = Arc::new(ObjectStorage::in_memory("shots", "s3.amazonaws.com"));
        let publisher = AssetPublisher::new(store.clone(), "screenshots");
        let (mut request, _) = setup(&[(10, 10)]);
        request.width = Some(800);
        let paths = PathResolver::new("/tmp", OutputFormat::Png).resolve(&request);

        let report = publisher
            .publish(&request, &paths, Bytes::from(png_bytes(800, 450)))
            .await
            .unwrap();
        let last = *report.uploads().last().unwrap();
        assert_eq!((last.width, last.height), (800, 450));
        assert!(last.key.ends_with("_800-450.png"));
    }
}
