/// Asset naming module
///
/// This module handles:
/// - The original/thumbnail filename convention (the only place it lives)
/// - Generating fresh, unique asset filenames
/// - MIME inference from filenames
/// - Thumbnail derivation (thumbnail.rs)

pub mod thumbnail;

use chrono::Utc;
use image::ImageFormat;
use rand::Rng;

/// Prefix that turns an original's filename into its thumbnail's filename.
/// Other devices sync against the same remote, so this must stay bit-exact.
pub const THUMBNAIL_PREFIX: &str = "thumb_";

/// Length of the random part of a generated filename
const SUFFIX_LEN: usize = 9;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Whether a stored file is an original or a derived thumbnail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Original,
    Thumbnail,
}

impl AssetKind {
    /// Classify a filename by the prefix convention
    pub fn of(filename: &str) -> Self {
        if filename.starts_with(THUMBNAIL_PREFIX) {
            AssetKind::Thumbnail
        } else {
            AssetKind::Original
        }
    }
}

/// Which rendition a caller wants a URL for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Variant {
    #[default]
    Original,
    Thumbnail,
}

/// An original and the thumbnail derived from it.
/// The two names have no independent lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetPair {
    original: String,
    thumbnail: String,
}

impl AssetPair {
    /// Build the pair for an original filename
    pub fn for_original(original: &str) -> Self {
        Self {
            original: original.to_string(),
            thumbnail: format!("{}{}", THUMBNAIL_PREFIX, original),
        }
    }

    /// Build the pair a thumbnail filename belongs to.
    /// Returns None when the name is not a thumbnail.
    pub fn for_thumbnail(thumbnail: &str) -> Option<Self> {
        let original = thumbnail.strip_prefix(THUMBNAIL_PREFIX)?;
        if original.is_empty() {
            return None;
        }
        Some(Self {
            original: original.to_string(),
            thumbnail: thumbnail.to_string(),
        })
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn thumbnail(&self) -> &str {
        &self.thumbnail
    }

    /// Filename for the requested rendition
    pub fn name_for(&self, variant: Variant) -> &str {
        match variant {
            Variant::Original => &self.original,
            Variant::Thumbnail => &self.thumbnail,
        }
    }

    /// Both names, original first
    pub fn names(&self) -> [&str; 2] {
        [&self.original, &self.thumbnail]
    }
}

/// Generate a fresh filename: `<epoch-ms>_<9 base36 chars>.<ext>`.
/// The extension comes from sniffing the bytes, falling back to `jpg`.
pub fn generate_filename(bytes: &[u8]) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();

    format!(
        "{}_{}.{}",
        Utc::now().timestamp_millis(),
        suffix,
        extension_for(bytes)
    )
}

fn extension_for(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => "png",
        Ok(ImageFormat::Gif) => "gif",
        Ok(ImageFormat::WebP) => "webp",
        Ok(ImageFormat::Bmp) => "bmp",
        _ => "jpg",
    }
}

/// Infer a MIME type from the filename's extension
pub fn mime_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_from_original() {
        let pair = AssetPair::for_original("a.jpg");
        assert_eq!(pair.original(), "a.jpg");
        assert_eq!(pair.thumbnail(), "thumb_a.jpg");
        assert_eq!(pair.name_for(Variant::Thumbnail), "thumb_a.jpg");
    }

    #[test]
    fn test_pair_from_thumbnail() {
        let pair = AssetPair::for_thumbnail("thumb_c.jpg").unwrap();
        assert_eq!(pair.original(), "c.jpg");
        assert!(AssetPair::for_thumbnail("c.jpg").is_none());
        assert!(AssetPair::for_thumbnail("thumb_").is_none());
    }

    #[test]
    fn test_kind_by_prefix() {
        assert_eq!(AssetKind::of("thumb_a.jpg"), AssetKind::Thumbnail);
        assert_eq!(AssetKind::of("a.jpg"), AssetKind::Original);
        assert_eq!(AssetKind::of("athumb_.jpg"), AssetKind::Original);
    }

    #[test]
    fn test_generated_filename_shape() {
        let name = generate_filename(b"not an image");
        let (stem, ext) = name.rsplit_once('.').unwrap();
        assert_eq!(ext, "jpg");
        let (millis, suffix) = stem.split_once('_').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), 9);
        assert!(suffix.bytes().all(|b| BASE36.contains(&b)));
        assert_ne!(name, generate_filename(b"not an image"));
    }

    #[test]
    fn test_png_extension_sniffed() {
        let png_magic = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert!(generate_filename(&png_magic).ends_with(".png"));
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for("x.JPEG"), "image/jpeg");
        assert_eq!(mime_for("thumb_x.png"), "image/png");
        assert_eq!(mime_for("x.svg"), "image/svg+xml");
        assert_eq!(mime_for("noext"), "image/jpeg");
    }
}
