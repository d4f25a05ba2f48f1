//! Common types and utilities shared across the webshot services.
//!
//! Everything in this crate is pure: request parsing, validation and
//! artifact fingerprinting never touch the network or the filesystem.

pub mod error;
pub mod fingerprint;
pub mod request;

pub use error::{ShotError, ShotResult};
pub use fingerprint::{ArtifactPaths, Fingerprint, PathResolver};
pub use request::{ClipRect, Dimension, OutputFormat, RenderOptions, RenderRequest};
