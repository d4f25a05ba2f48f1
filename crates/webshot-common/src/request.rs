//! Render request model and query-parameter parsing.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ShotError, ShotResult};

/// Prefix for caller-supplied renderer settings passed through untouched.
pub const SETTINGS_PREFIX: &str = "settings.";

/// Renderer header names owned by the pipeline; settings may not shadow them.
pub const RESERVED_METADATA: &[&str] = &[
    "url",
    "filename",
    "width",
    "height",
    "clipRect",
    "javascriptEnabled",
    "loadImages",
    "localToRemoteUrlAccessEnabled",
    "userAgent",
    "userName",
    "password",
    "delay",
    "zoomFactor",
];

/// Image format written by the renderer and used for published variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ShotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "jpg" | "jpeg" => Ok(OutputFormat::Jpeg),
            other => Err(ShotError::invalid(
                "format",
                format!("unsupported output format '{}'", other),
            )),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A (width, height) pair in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimension {
    pub width: u32,
    pub height: u32,
}

impl Dimension {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parse a `WIDTHxHEIGHT` string such as `1024x600`.
    pub fn parse_viewport(s: &str) -> ShotResult<Self> {
        let (w, h) = s
            .split_once('x')
            .ok_or_else(|| ShotError::invalid("viewport", format!("expected WxH, got '{}'", s)))?;
        let width = parse_pixels("viewport", w)?;
        let height = parse_pixels("viewport", h)?;
        Ok(Self { width, height })
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.width, self.height)
    }
}

/// Capture rectangle forwarded to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipRect {
    pub top: i64,
    pub left: i64,
    pub width: u32,
    pub height: u32,
}

/// Options that influence the rendered pixels.
///
/// Field order is the canonical serialization order used for fingerprinting;
/// do not reorder fields without accepting that every fingerprint changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip_rect: Option<ClipRect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub javascript_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_images: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_to_remote_url_access_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zoom_factor: Option<f64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, String>,
}

impl RenderOptions {
    /// Renderer metadata as `(name, value)` pairs, in canonical order.
    ///
    /// `url`, `filename`, `width` and `height` are added by the gateway.
    pub fn metadata(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        if let Some(clip) = &self.clip_rect {
            // ClipRect only holds integers, serialization cannot fail.
            if let Ok(json) = serde_json::to_string(clip) {
                out.push(("clipRect".to_string(), json));
            }
        }
        push_opt(&mut out, "javascriptEnabled", self.javascript_enabled);
        push_opt(&mut out, "loadImages", self.load_images);
        push_opt(
            &mut out,
            "localToRemoteUrlAccessEnabled",
            self.local_to_remote_url_access_enabled,
        );
        push_opt(&mut out, "userAgent", self.user_agent.as_ref());
        push_opt(&mut out, "userName", self.user_name.as_ref());
        push_opt(&mut out, "password", self.password.as_ref());
        push_opt(&mut out, "delay", self.delay);
        push_opt(&mut out, "zoomFactor", self.zoom_factor);
        for (name, value) in &self.settings {
            out.push((name.clone(), value.clone()));
        }
        out
    }

    /// Canonical JSON used as fingerprint input.
    pub fn canonical_json(&self) -> String {
        // Only strings, numbers and a BTreeMap: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn push_opt<T: ToString>(out: &mut Vec<(String, String)>, name: &str, value: Option<T>) {
    if let Some(v) = value {
        out.push((name.to_string(), v.to_string()));
    }
}

/// A validated request to render `url` into an image.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub url: Url,
    pub options: RenderOptions,
    /// Viewport width; also the default variant width when present.
    pub width: Option<u32>,
    /// Viewport height; also the default variant height when present.
    pub height: Option<u32>,
    /// Extra sizes to publish alongside the default variant.
    pub dimensions: Vec<Dimension>,
    pub callback: Option<Url>,
    /// Publish to object storage instead of posting the raw file.
    pub publish: bool,
    /// Explicit identity token, hashed instead of url + options.
    pub identity: Option<String>,
    pub correlation_id: Option<String>,
}

impl RenderRequest {
    /// Request for `url` with default options.
    pub fn new(url: &str) -> ShotResult<Self> {
        Ok(Self {
            url: normalize_url("url", url)?,
            options: RenderOptions::default(),
            width: None,
            height: None,
            dimensions: Vec::new(),
            callback: None,
            publish: false,
            identity: None,
            correlation_id: None,
        })
    }

    /// Parse a request from inbound query parameters.
    pub fn from_params(params: &HashMap<String, String>) -> ShotResult<Self> {
        let raw_url = params
            .get("url")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or(ShotError::MissingUrl)?;
        let mut request = Self::new(raw_url)?;

        let text = |name: &str| -> ShotResult<Option<String>> {
            match non_empty(params, name) {
                Some(v) => {
                    check_header_safe(name, v)?;
                    Ok(Some(v.to_string()))
                }
                None => Ok(None),
            }
        };

        let options = &mut request.options;
        options.clip_rect = match non_empty(params, "clipRect") {
            Some(v) => Some(
                serde_json::from_str(v)
                    .map_err(|e| ShotError::invalid("clipRect", e.to_string()))?,
            ),
            None => None,
        };
        options.javascript_enabled = parse_opt_bool(params, "javascriptEnabled")?;
        options.load_images = parse_opt_bool(params, "loadImages")?;
        options.local_to_remote_url_access_enabled =
            parse_opt_bool(params, "localToRemoteUrlAccessEnabled")?;
        options.user_agent = text("userAgent")?;
        options.user_name = text("userName")?;
        options.password = text("password")?;
        options.delay = match non_empty(params, "delay") {
            Some(v) => Some(
                v.parse()
                    .map_err(|_| ShotError::invalid("delay", format!("'{}' is not a delay in ms", v)))?,
            ),
            None => None,
        };
        options.zoom_factor = match non_empty(params, "zoomFactor") {
            Some(v) => {
                let zoom: f64 = v
                    .parse()
                    .map_err(|_| ShotError::invalid("zoomFactor", format!("'{}' is not a number", v)))?;
                if !zoom.is_finite() || zoom <= 0.0 {
                    return Err(ShotError::invalid("zoomFactor", "must be a positive number"));
                }
                Some(zoom)
            }
            None => None,
        };
        for (key, value) in params {
            if let Some(name) = key.strip_prefix(SETTINGS_PREFIX) {
                if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(ShotError::invalid(key.clone(), "invalid setting name"));
                }
                // Header names are case-insensitive on the wire.
                if RESERVED_METADATA.iter().any(|r| r.eq_ignore_ascii_case(name)) {
                    return Err(ShotError::invalid(key.clone(), "reserved setting name"));
                }
                check_header_safe(key, value)?;
                options.settings.insert(name.to_string(), value.clone());
            }
        }

        request.width = match non_empty(params, "width") {
            Some(v) => Some(parse_pixels("width", v)?),
            None => None,
        };
        request.height = match non_empty(params, "height") {
            Some(v) => Some(parse_pixels("height", v)?),
            None => None,
        };
        request.dimensions = match non_empty(params, "dimensions") {
            Some(v) => parse_dimensions(v)?,
            None => Vec::new(),
        };
        request.callback = match non_empty(params, "callback") {
            Some(v) => Some(normalize_url("callback", v)?),
            None => None,
        };
        request.publish = parse_opt_bool(params, "uploadToS3")?.unwrap_or(false);
        request.identity = text("id")?;
        request.correlation_id = text("correlationId")?;

        Ok(request)
    }

    pub fn is_async(&self) -> bool {
        self.callback.is_some()
    }

    /// Explicit size of the default variant, if the caller gave one.
    pub fn requested_size(&self) -> (Option<u32>, Option<u32>) {
        (self.width, self.height)
    }
}

/// Normalize a caller-supplied URL, adding `http://` when no scheme is given.
pub fn normalize_url(param: &str, raw: &str) -> ShotResult<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(if param == "url" {
            ShotError::MissingUrl
        } else {
            ShotError::invalid(param, "empty value")
        });
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let invalid = |message: String| ShotError::InvalidUrl {
        url: trimmed.to_string(),
        message,
    };

    let url = Url::parse(&candidate).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme '{}'", other))),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

/// Parse the JSON `dimensions` parameter: `[{"width":100,"height":50}, ...]`.
pub fn parse_dimensions(raw: &str) -> ShotResult<Vec<Dimension>> {
    let dims: Vec<Dimension> =
        serde_json::from_str(raw).map_err(|e| ShotError::invalid("dimensions", e.to_string()))?;
    if let Some(bad) = dims.iter().find(|d| d.width == 0 || d.height == 0) {
        return Err(ShotError::invalid(
            "dimensions",
            format!("zero-sized variant {}x{}", bad.width, bad.height),
        ));
    }
    Ok(dims)
}

fn non_empty<'a>(params: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    params.get(name).map(|s| s.trim()).filter(|s| !s.is_empty())
}

fn parse_pixels(param: &str, raw: &str) -> ShotResult<u32> {
    match raw.trim().parse::<u32>() {
        Ok(0) => Err(ShotError::invalid(param, "must be greater than zero")),
        Ok(v) => Ok(v),
        Err(_) => Err(ShotError::invalid(param, format!("'{}' is not a pixel size", raw))),
    }
}

fn parse_opt_bool(params: &HashMap<String, String>, name: &str) -> ShotResult<Option<bool>> {
    match non_empty(params, name) {
        None => Ok(None),
        Some(v) => match v.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(ShotError::invalid(name, format!("'{}' is not a boolean", v))),
        },
    }
}

/// Values travel to the renderer as header values, which forbid control characters.
fn check_header_safe(param: &str, value: &str) -> ShotResult<()> {
    if value.chars().any(|c| c.is_control()) {
        return Err(ShotError::invalid(param, "control characters are not allowed"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_missing_url_is_client_error() {
        let err = RenderRequest::from_params(&params(&[("width", "100")])).unwrap_err();
        assert!(matches!(err, ShotError::MissingUrl));

        let err = RenderRequest::from_params(&params(&[("url", "  ")])).unwrap_err();
        assert!(matches!(err, ShotError::MissingUrl));
    }

    #[test]
    fn test_scheme_is_added() {
        let req = RenderRequest::from_params(&params(&[("url", "example.com/page")])).unwrap();
        assert_eq!(req.url.as_str(), "http://example.com/page");
    }

    #[test]
    fn test_rejects_unsupported_scheme() {
        let err = normalize_url("url", "ftp://example.com").unwrap_err();
        assert!(matches!(err, ShotError::InvalidUrl { .. }));
    }

    #[test]
    fn test_full_parse() {
        let req = RenderRequest::from_params(&params(&[
            ("url", "https://example.com"),
            ("callback", "cb.test/hook"),
            ("width", "800"),
            ("height", "600"),
            ("delay", "250"),
            ("zoomFactor", "1.5"),
            ("javascriptEnabled", "false"),
            ("clipRect", r#"{"top":0,"left":0,"width":400,"height":300}"#),
            ("uploadToS3", "true"),
            ("dimensions", r#"[{"width":100,"height":50}]"#),
            ("settings.resourceTimeout", "5000"),
            ("correlationId", "job-42"),
        ]))
        .unwrap();

        assert_eq!(req.callback.as_ref().unwrap().as_str(), "http://cb.test/hook");
        assert_eq!(req.width, Some(800));
        assert_eq!(req.height, Some(600));
        assert_eq!(req.options.delay, Some(250));
        assert_eq!(req.options.zoom_factor, Some(1.5));
        assert_eq!(req.options.javascript_enabled, Some(false));
        assert_eq!(req.options.clip_rect.unwrap().width, 400);
        assert!(req.publish);
        assert_eq!(req.dimensions, vec![Dimension::new(100, 50)]);
        assert_eq!(req.options.settings.get("resourceTimeout").unwrap(), "5000");
        assert_eq!(req.correlation_id.as_deref(), Some("job-42"));
        assert!(req.is_async());
    }

    #[test]
    fn test_invalid_numbers() {
        for (name, value) in [("width", "abc"), ("height", "0"), ("delay", "-1"), ("zoomFactor", "0")] {
            let err = RenderRequest::from_params(&params(&[("url", "example.com"), (name, value)]))
                .unwrap_err();
            assert!(err.is_client_error(), "{} = {} should be rejected", name, value);
        }
    }

    #[test]
    fn test_invalid_dimensions() {
        assert!(parse_dimensions("not json").is_err());
        assert!(parse_dimensions(r#"[{"width":0,"height":10}]"#).is_err());
        assert_eq!(parse_dimensions("[]").unwrap(), vec![]);
    }

    #[test]
    fn test_header_injection_rejected() {
        let err = RenderRequest::from_params(&params(&[
            ("url", "example.com"),
            ("userAgent", "evil\r\nX-Injected: 1"),
        ]))
        .unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_settings_cannot_shadow_renderer_headers() {
        for name in ["settings.filename", "settings.FileName", "settings.url", "settings.delay"] {
            let err = RenderRequest::from_params(&params(&[
                ("url", "example.com"),
                (name, "../escaped.png"),
            ]))
            .unwrap_err();
            assert!(err.is_client_error(), "{} should be rejected", name);
        }

        let req = RenderRequest::from_params(&params(&[
            ("url", "example.com"),
            ("settings.filenameSuffix", "x"),
        ]))
        .unwrap();
        assert_eq!(req.options.settings.get("filenameSuffix").unwrap(), "x");
    }

    #[test]
    fn test_metadata_order() {
        let options = RenderOptions {
            delay: Some(100),
            user_agent: Some("bot".into()),
            load_images: Some(true),
            ..Default::default()
        };
        let names: Vec<_> = options.metadata().into_iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["loadImages", "userAgent", "delay"]);
    }

    #[test]
    fn test_viewport_parse() {
        assert_eq!(Dimension::parse_viewport("1024x600").unwrap(), Dimension::new(1024, 600));
        assert!(Dimension::parse_viewport("1024").is_err());
        assert_eq!("jpeg".parse::<OutputFormat>().unwrap().extension(), "jpg");
    }
}
