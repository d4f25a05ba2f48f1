//! Screenshot endpoint and its backwards-compatible redirects.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Extension, OriginalUri, Query},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;
use url::form_urlencoded;

use webshot_common::{RenderRequest, ShotError};

use crate::pipeline::Delivery;
use crate::state::AppState;

pub const USAGE: &str = "\
webshot: render a web page to an image

GET /?url=<page>[&options]

  url                            page to render (required; http:// is assumed)
  callback                       POST the result here instead of answering with it
  uploadToS3=true                with callback: publish to object storage and POST JSON
  width, height                  viewport size; also the published default size
  dimensions                     JSON list of extra sizes, e.g. [{\"width\":100,\"height\":50}]
  clipRect                       JSON {\"top\":0,\"left\":0,\"width\":400,\"height\":300}
  delay                          ms to wait after load before capture
  zoomFactor                     page zoom, e.g. 1.5
  javascriptEnabled, loadImages, localToRemoteUrlAccessEnabled   true|false
  userAgent, userName, password  passed to the renderer
  id                             identity token used instead of url + options for naming
  correlationId                  echoed back in callback payloads
  settings.<name>                any other renderer setting

Without a callback the image is the response body. With one the response is
immediate and the result is POSTed when ready.
";

/// GET / - render `url` and deliver it.
pub async fn snapshot_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let request = match RenderRequest::from_params(&params) {
        Ok(request) => request,
        Err(ShotError::MissingUrl) => return found("/usage.html"),
        Err(e) => return error_response(&e),
    };

    match state.pipeline.dispatch(request).await {
        Ok(Delivery::Inline {
            body,
            content_type,
            content_length,
        }) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
                (header::CONTENT_LENGTH, HeaderValue::from(content_length)),
            ],
            Body::from_stream(body),
        )
            .into_response(),
        Ok(Delivery::Accepted { message }) => (StatusCode::OK, message).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /usage.html
pub async fn usage_handler() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], USAGE)
}

/// Any other GET: `/www.example.com` becomes `/?url=www.example.com`.
pub async fn fallback_handler(OriginalUri(uri): OriginalUri) -> Response {
    let target = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .trim_start_matches('/');
    let encoded: String = form_urlencoded::byte_serialize(target.as_bytes()).collect();
    found(&format!("/?url={}", encoded))
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

pub(crate) fn error_response(err: &ShotError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if !err.is_client_error() {
        warn!(error = %err, status = status.as_u16(), "Request failed");
    }
    (status, err.to_string()).into_response()
}
