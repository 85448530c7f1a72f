/// Thumbnail derivation
///
/// Downscales an original into its companion thumbnail at write time.
/// Failure here is never fatal for the caller: no thumbnail simply means
/// URL lookups fall back to the original.
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

use crate::error::{MediaError, Result};

/// Maximum thumbnail width in pixels
pub const THUMBNAIL_MAX_WIDTH: u32 = 300;

/// JPEG quality used when encoding thumbnails (0-100)
pub const THUMBNAIL_QUALITY: u8 = 70;

/// Derives thumbnails with a fixed width cap and encoding quality
#[derive(Debug, Clone, Copy)]
pub struct ThumbnailDeriver {
    max_width: u32,
    quality: u8,
}

impl Default for ThumbnailDeriver {
    fn default() -> Self {
        Self {
            max_width: THUMBNAIL_MAX_WIDTH,
            quality: THUMBNAIL_QUALITY,
        }
    }
}

impl ThumbnailDeriver {
    pub fn new(max_width: u32, quality: u8) -> Self {
        Self { max_width, quality }
    }

    /// Derive a thumbnail off the async runtime.
    /// Decoding and resizing are CPU-bound, so they run on the blocking pool.
    pub async fn derive_async(self, original: Vec<u8>) -> Result<Vec<u8>> {
        tokio::task::spawn_blocking(move || self.derive(&original)).await?
    }

    /// Derive a thumbnail from the original's bytes.
    ///
    /// Sources no wider than the cap come back unchanged (no upscaling and no
    /// re-encode). Wider sources are scaled to the cap, keeping aspect ratio,
    /// and encoded as JPEG.
    pub fn derive(&self, original: &[u8]) -> Result<Vec<u8>> {
        let img = image::load_from_memory(original)
            .map_err(|e| MediaError::Derivation(format!("failed to decode source: {}", e)))?;

        if img.width() <= self.max_width {
            return Ok(original.to_vec());
        }

        let scale = self.max_width as f64 / img.width() as f64;
        let height = ((img.height() as f64 * scale).round() as u32).max(1);
        let thumbnail = img.resize_exact(self.max_width, height, FilterType::Lanczos3);

        let mut encoded = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut encoded, self.quality);
        encoder
            .encode_image(&thumbnail.to_rgb8())
            .map_err(|e| MediaError::Derivation(format!("failed to encode thumbnail: {}", e)))?;

        Ok(encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 40, 40]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_wide_source_is_capped() {
        let thumb = ThumbnailDeriver::default().derive(&png(600, 400)).unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert_eq!(decoded.width(), 300);
        assert_eq!(decoded.height(), 200);
        assert_eq!(image::guess_format(&thumb).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_small_source_returned_unchanged() {
        let source = png(120, 80);
        let thumb = ThumbnailDeriver::default().derive(&source).unwrap();
        assert_eq!(thumb, source);
    }

    #[test]
    fn test_exact_cap_not_reencoded() {
        let source = png(300, 900);
        assert_eq!(ThumbnailDeriver::default().derive(&source).unwrap(), source);
    }

    #[test]
    fn test_undecodable_source_fails() {
        let err = ThumbnailDeriver::default()
            .derive(b"definitely not pixels")
            .unwrap_err();
        assert!(matches!(err, MediaError::Derivation(_)));
    }

    #[tokio::test]
    async fn test_derive_async() {
        let thumb = ThumbnailDeriver::new(50, 80)
            .derive_async(png(100, 10))
            .await
            .unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (50, 5));
    }
}
