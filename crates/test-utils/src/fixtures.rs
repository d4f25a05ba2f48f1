//! Image fixtures for webshot tests.
//!
//! Generated images use a predictable gradient so resized output can be
//! decoded and checked without shipping binary test data.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};

/// Default viewport the fake renderer uses when no size is requested.
pub const DEFAULT_VIEWPORT: (u32, u32) = (1024, 600);

/// Creates a test image where pixel (x, y) is `(x % 256, y % 256, 128, 255)`.
pub fn gradient_image(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
    })
}

/// PNG-encoded gradient image of the given size.
///
/// # Example
///
/// ```
/// use test_utils::png_bytes;
///
/// let png = png_bytes(4, 2);
/// assert_eq!(&png[1..4], b"PNG");
/// ```
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(gradient_image(width, height))
        .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
        .expect("PNG encoding of an in-memory image cannot fail");
    buf
}

/// Writes a PNG of the given size to `dir/name` and returns its path.
pub fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, png_bytes(width, height)).expect("write fixture PNG");
    path
}

/// Decodes an image and returns its `(width, height)`.
pub fn decoded_size(bytes: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory(bytes).expect("decodable image");
    (img.width(), img.height())
}
