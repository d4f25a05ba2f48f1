//! Image resizing for published variants.

use std::io::Cursor;

use bytes::Bytes;
use image::{imageops::FilterType, DynamicImage, ImageOutputFormat};

use webshot_common::{Dimension, OutputFormat, ShotError, ShotResult};

/// Native size of an encoded image, read from its header only.
pub fn image_size(data: &[u8]) -> ShotResult<Dimension> {
    let (width, height) = image::io::Reader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| ShotError::ImageError(e.to_string()))?
        .into_dimensions()
        .map_err(|e| ShotError::ImageError(e.to_string()))?;
    Ok(Dimension::new(width, height))
}

/// Scale and center-crop `data` to exactly `target`, encoded as `format`.
///
/// CPU bound; call from `spawn_blocking`.
pub fn resize_image(data: &[u8], target: Dimension, format: OutputFormat) -> ShotResult<Bytes> {
    let img = decode(data)?;
    let resized = img.resize_to_fill(target.width, target.height, FilterType::Lanczos3);
    encode(resized, format)
}

fn decode(data: &[u8]) -> ShotResult<DynamicImage> {
    image::load_from_memory(data).map_err(|e| ShotError::ImageError(e.to_string()))
}

fn encode(img: DynamicImage, format: OutputFormat) -> ShotResult<Bytes> {
    let mut buf = Vec::new();
    let result = match format {
        OutputFormat::Png => img.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png),
        // JPEG has no alpha channel.
        OutputFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8())
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Jpeg(90)),
    };
    result.map_err(|e| ShotError::ImageError(format!("Failed to encode {}: {}", format, e)))?;
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::fixtures::{decoded_size, png_bytes};

    #[test]
    fn test_resize_exact_size() {
        let src = png_bytes(400, 300);
        let out = resize_image(&src, Dimension::new(100, 50), OutputFormat::Png).unwrap();
        assert_eq!(decoded_size(&out), (100, 50));
    }

    #[test]
    fn test_resize_to_jpeg() {
        let src = png_bytes(64, 64);
        let out = resize_image(&src, Dimension::new(32, 16), OutputFormat::Jpeg).unwrap();
        assert_eq!(&out[..2], &[0xFF, 0xD8]);
        assert_eq!(decoded_size(&out), (32, 16));
    }

    #[test]
    fn test_garbage_is_image_error() {
        let err = image_size(b"not an image").unwrap_err();
        assert!(matches!(err, ShotError::ImageError(_)));
        assert_eq!(image_size(&png_bytes(7, 3)).unwrap(), Dimension::new(7, 3));
    }
}
