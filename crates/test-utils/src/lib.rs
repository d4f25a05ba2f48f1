//! Shared test utilities for the webshot workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Image fixtures (valid PNG bytes of a given size)
//! - A fake renderer speaking the renderer HTTP protocol
//! - A callback receiver that records webhook deliveries
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../../crates/test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{png_bytes, FakeRendererServer, CallbackReceiver};
//! ```

pub mod fixtures;
pub mod servers;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use servers::*;

/// Macro asserting that a path no longer exists on disk.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_file_gone;
///
/// assert_file_gone!(&paths.local_path);
/// ```
#[macro_export]
macro_rules! assert_file_gone {
    ($path:expr) => {{
        let path: &::std::path::Path = ::std::convert::AsRef::as_ref($path);
        if path.exists() {
            panic!("expected `{}` to have been deleted", path.display());
        }
    }};
}
