//! Artifact fingerprinting and local path resolution.
//!
//! A fingerprint is the SHA-256 of the normalized URL followed by the
//! canonical option JSON, or of the caller's identity token when one is
//! given. Delivery-only fields (callback, publish flag, extra dimensions,
//! correlation id) never take part, so two requests that would render the
//! same pixels share a fingerprint.

use std::fmt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::request::{OutputFormat, RenderRequest};

/// Prefix shared by every render file and storage object name.
pub const FILE_PREFIX: &str = "screenshot_";

/// Deterministic identity of a render artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint for a request.
    pub fn of(request: &RenderRequest) -> Self {
        let mut hasher = Sha256::new();
        match &request.identity {
            Some(token) => hasher.update(token.as_bytes()),
            None => {
                hasher.update(request.url.as_str().as_bytes());
                hasher.update(request.options.canonical_json().as_bytes());
            }
        }
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a request's artifact lives locally and how it is named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub fingerprint: Fingerprint,
    /// `screenshot_<fingerprint>`; storage keys are derived from it.
    pub base_name: String,
    /// Base name plus the optional `-<w>-<h>` suffix and the extension.
    pub file_name: String,
    pub local_path: PathBuf,
    pub format: OutputFormat,
}

impl ArtifactPaths {
    /// Object name for a resized variant: `<base>_<w>-<h>.<ext>`.
    pub fn variant_name(&self, width: u32, height: u32) -> String {
        format!(
            "{}_{}-{}.{}",
            self.base_name,
            width,
            height,
            self.format.extension()
        )
    }
}

/// Resolves requests to fingerprints and local file paths under a base directory.
#[derive(Debug, Clone)]
pub struct PathResolver {
    base_dir: PathBuf,
    format: OutputFormat,
}

impl PathResolver {
    pub fn new(base_dir: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            base_dir: base_dir.into(),
            format,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Resolve the fingerprint and local path for a request. Pure.
    pub fn resolve(&self, request: &RenderRequest) -> ArtifactPaths {
        let fingerprint = Fingerprint::of(request);
        let base_name = format!("{}{}", FILE_PREFIX, fingerprint);

        // Size goes into the name, not the hash, so distinct sizes stay addressable.
        let size_suffix = match request.requested_size() {
            (None, None) => String::new(),
            (w, h) => format!("-{}-{}", size_part(w), size_part(h)),
        };
        let file_name = format!("{}{}.{}", base_name, size_suffix, self.format.extension());
        let local_path = self.base_dir.join(&file_name);

        ArtifactPaths {
            fingerprint,
            base_name,
            file_name,
            local_path,
            format: self.format,
        }
    }
}

fn size_part(v: Option<u32>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| "auto".to_string())
}
