//! Callback delivery: JSON completion payloads and raw file posts.

use std::path::Path;
use std::time::Duration;

use reqwest::{header, Body, Client};
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::{info, instrument, warn};
use url::Url;

use webshot_common::{RenderRequest, ShotError, ShotResult};

use super::publisher::{PublishReport, VariantFailure, VariantUpload};
use crate::metrics;

/// Body posted to a callback URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WebhookPayload {
    #[serde(rename_all = "camelCase")]
    Single {
        storage_url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        width: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        height: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Variants {
        variants: Vec<VariantUpload>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        failed: Vec<VariantFailure>,
        #[serde(skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Failure {
        error: String,
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
}

impl WebhookPayload {
    /// Completion payload for a published render.
    pub fn published(request: &RenderRequest, report: PublishReport) -> Self {
        let correlation_id = request.correlation_id.clone();
        match report {
            // Size is only echoed back when the caller asked for one.
            PublishReport::Single(upload) => WebhookPayload::Single {
                storage_url: upload.url,
                width: request.width,
                height: request.height,
                correlation_id,
            },
            PublishReport::Variants { uploads, failed } => WebhookPayload::Variants {
                variants: uploads,
                failed,
                correlation_id,
            },
        }
    }

    pub fn failure(request: &RenderRequest, error: &ShotError) -> Self {
        WebhookPayload::Failure {
            error: error.to_string(),
            url: request.url.to_string(),
            correlation_id: request.correlation_id.clone(),
        }
    }
}

/// Posts results to caller-supplied callback URLs. Never retries.
pub struct WebhookNotifier {
    client: Client,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration) -> ShotResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("webshot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ShotError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// POST `payload` as JSON.
    #[instrument(skip(self, payload), fields(callback = %callback))]
    pub async fn deliver(&self, callback: &Url, payload: &WebhookPayload) -> ShotResult<()> {
        let result = self
            .client
            .post(callback.clone())
            .json(payload)
            .send()
            .await;
        self.finish(callback, result).await
    }

    /// POST the raw file at `path` as the request body.
    #[instrument(skip(self, path), fields(callback = %callback))]
    pub async fn post_file(&self, callback: &Url, path: &Path, content_type: &str) -> ShotResult<()> {
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();

        let result = self
            .client
            .post(callback.clone())
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, len)
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await;
        self.finish(callback, result).await
    }

    async fn finish(
        &self,
        callback: &Url,
        result: reqwest::Result<reqwest::Response>,
    ) -> ShotResult<()> {
        let outcome = match result {
            Ok(response) if response.status().is_success() => Ok(response.status()),
            Ok(response) => Err(ShotError::NotifyFailed(format!(
                "{} answered {}",
                callback,
                response.status()
            ))),
            Err(e) => Err(ShotError::NotifyFailed(format!("POST {} failed: {}", callback, e))),
        };
        metrics::record_webhook(outcome.is_ok());

        match outcome {
            Ok(status) => {
                info!(status = status.as_u16(), "Callback delivered");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Callback delivery failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_utils::servers::CallbackReceiver;

    fn upload(w: u32, h: u32) -> VariantUpload {
        VariantUpload {
            width: w,
            height: h,
            key: format!("k_{}-{}.png", w, h),
            url: format!("https://s3.amazonaws.com/b/k_{}-{}.png", w, h),
        }
    }

    #[test]
    fn test_single_payload_omits_unrequested_size() {
        let request = RenderRequest::new("example.com").unwrap();
        let payload = WebhookPayload::published(&request, PublishReport::Single(upload(1024, 600)));
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({ "storageUrl": "https://s3.amazonaws.com/b/k_1024-600.png" })
        );
    }

    #[test]
    fn test_variants_payload_shape() {
        let mut request = RenderRequest::new("example.com").unwrap();
        request.correlation_id = Some("job-7".into());
        let report = PublishReport::Variants {
            uploads: vec![upload(100, 50), upload(1024, 600)],
            failed: vec![],
        };
        let value = serde_json::to_value(WebhookPayload::published(&request, report)).unwrap();

        assert_eq!(value["variants"].as_array().unwrap().len(), 2);
        assert_eq!(
            value["variants"][0],
            json!({ "width": 100, "height": 50, "url": "https://s3.amazonaws.com/b/k_100-50.png" })
        );
        assert_eq!(value["correlationId"], "job-7");
        assert!(value.get("failed").is_none());
    }

    #[test]
    fn test_failure_payload() {
        let request = RenderRequest::new("example.com").unwrap();
        let err = ShotError::RenderFailed("Error: Url returned status fail".into());
        let value = serde_json::to_value(WebhookPayload::failure(&request, &err)).unwrap();
        assert_eq!(value["url"], "http://example.com/");
        assert!(value["error"].as_str().unwrap().contains("status fail"));
    }

    #[tokio::test]
    async fn test_deliver_and_reject() {
        let receiver = CallbackReceiver::start().await;
        let notifier = WebhookNotifier::new(Duration::from_secs(5)).unwrap();
        let callback = Url::parse(&receiver.url("/hook")).unwrap();
        let payload = WebhookPayload::Single {
            storage_url: "https://s3.amazonaws.com/b/k.png".into(),
            width: None,
            height: None,
            correlation_id: None,
        };

        notifier.deliver(&callback, &payload).await.unwrap();
        let got = receiver.next(Duration::from_secs(2)).await.unwrap();
        assert_eq!(got.path, "/hook");
        assert_eq!(got.json()["storageUrl"], "https://s3.amazonaws.com/b/k.png");

        receiver.set_status(500);
        let err = notifier.deliver(&callback, &payload).await.unwrap_err();
        assert!(matches!(err, ShotError::NotifyFailed(_)));
    }

    #[tokio::test]
    async fn test_post_file_streams_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = test_utils::fixtures::write_png(dir.path(), "shot.png", 10, 10);
        let receiver = CallbackReceiver::start().await;
        let notifier = WebhookNotifier::new(Duration::from_secs(5)).unwrap();

        notifier
            .post_file(&Url::parse(&receiver.url("/raw")).unwrap(), &path, "image/png")
            .await
            .unwrap();

        let got = receiver.next(Duration::from_secs(2)).await.unwrap();
        assert_eq!(got.content_type.as_deref(), Some("image/png"));
        assert_eq!(got.body.as_ref(), std::fs::read(&path).unwrap().as_slice());
    }

    #[tokio::test]
    async fn test_unreachable_callback() {
        let notifier = WebhookNotifier::new(Duration::from_secs(2)).unwrap();
        let err = notifier
            .deliver(
                &Url::parse("http://127.0.0.1:1/hook").unwrap(),
                &WebhookPayload::Failure {
                    error: "x".into(),
                    url: "http://example.com/".into(),
                    correlation_id: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ShotError::NotifyFailed(_)));
    }
}
