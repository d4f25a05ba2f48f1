//! Error types for webshot services.

use thiserror::Error;

/// Result type alias using ShotError.
pub type ShotResult<T> = Result<T, ShotError>;

/// Primary error type for render-request processing.
#[derive(Debug, Error)]
pub enum ShotError {
    // === Client Input Errors ===
    #[error("Missing required parameter: url")]
    MissingUrl,

    #[error("Invalid url '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    // === Render Errors ===
    #[error("Rendering failed: {0}")]
    RenderFailed(String),

    #[error("Renderer did not answer within {0} seconds")]
    RenderTimeout(u64),

    // === Delivery Errors ===
    #[error("Publishing failed: {0}")]
    PublishFailed(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Webhook delivery failed: {0}")]
    NotifyFailed(String),

    #[error("Local file error: {0}")]
    LocalIo(String),

    #[error("Image processing failed: {0}")]
    ImageError(String),

    // === Infrastructure Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ShotError {
    /// Shorthand for an `InvalidParameter` error.
    pub fn invalid(param: impl Into<String>, message: impl Into<String>) -> Self {
        ShotError::InvalidParameter {
            param: param.into(),
            message: message.into(),
        }
    }

    /// Whether the error was caused by the caller's input rather than the pipeline.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ShotError::MissingUrl | ShotError::InvalidUrl { .. } | ShotError::InvalidParameter { .. }
        )
    }

    /// Whether the error came from the rendering backend.
    pub fn is_render_failure(&self) -> bool {
        matches!(self, ShotError::RenderFailed(_) | ShotError::RenderTimeout(_))
    }

    /// Get the HTTP status code for this error.
    pub fn http_status_code(&self) -> u16 {
        match self {
            ShotError::MissingUrl
            | ShotError::InvalidUrl { .. }
            | ShotError::InvalidParameter { .. } => 400,

            ShotError::RenderFailed(_) => 502,
            ShotError::RenderTimeout(_) => 504,

            _ => 500,
        }
    }
}

impl From<std::io::Error> for ShotError {
    fn from(err: std::io::Error) -> Self {
        ShotError::LocalIo(err.to_string())
    }
}

impl From<serde_json::Error> for ShotError {
    fn from(err: serde_json::Error) -> Self {
        ShotError::Internal(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_map_to_400() {
        assert_eq!(ShotError::MissingUrl.http_status_code(), 400);
        assert_eq!(ShotError::invalid("width", "not a number").http_status_code(), 400);
        assert!(ShotError::MissingUrl.is_client_error());
        assert!(!ShotError::RenderFailed("boom".into()).is_client_error());
    }

    #[test]
    fn test_render_errors() {
        assert_eq!(ShotError::RenderFailed("Error: timeout".into()).http_status_code(), 502);
        assert_eq!(ShotError::RenderTimeout(60).http_status_code(), 504);
        assert!(ShotError::RenderTimeout(60).is_render_failure());
        assert_eq!(ShotError::LocalIo("gone".into()).http_status_code(), 500);
    }
}
