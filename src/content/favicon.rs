//! Favicon normalization.
use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

use crate::storage::Favicon;

/// Edge length of a normalized icon.
pub const ICON_SIZE: u32 = 256;

/// An icon ready to be stored for a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedIcon {
    pub folder_id: i64,
    pub feed_id: i64,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl FeedIcon {
    pub fn into_favicon(self) -> Favicon {
        Favicon {
            mime: self.mime,
            data: self.bytes,
        }
    }
}

/// Resize to [`ICON_SIZE`] square and re-encode as PNG.
///
/// Any decode or encode failure keeps the original bytes and MIME type.
pub fn resize_icon(folder_id: i64, feed_id: i64, mime: &str, bytes: &[u8]) -> FeedIcon {
    match image::load_from_memory(bytes) {
        Ok(image) => resize_decoded(folder_id, feed_id, mime, bytes, &image),
        Err(e) => original(folder_id, feed_id, mime, bytes, &e),
    }
}

/// [`resize_icon`] for an icon already decoded into `image`.
pub fn resize_decoded(
    folder_id: i64,
    feed_id: i64,
    mime: &str,
    bytes: &[u8],
    image: &DynamicImage,
) -> FeedIcon {
    match encode_png(image) {
        Ok(png) => FeedIcon {
            folder_id,
            feed_id,
            mime: "image/png".to_string(),
            bytes: png,
        },
        Err(e) => original(folder_id, feed_id, mime, bytes, &e),
    }
}

/// [`resize_decoded`] when `normalize` is set, the original icon otherwise.
pub fn normalize_icon(
    folder_id: i64,
    feed_id: i64,
    mime: &str,
    bytes: &[u8],
    image: &DynamicImage,
    normalize: bool,
) -> FeedIcon {
    if normalize {
        resize_decoded(folder_id, feed_id, mime, bytes, image)
    } else {
        FeedIcon {
            folder_id,
            feed_id,
            mime: mime.to_string(),
            bytes: bytes.to_vec(),
        }
    }
}

fn original(
    folder_id: i64,
    feed_id: i64,
    mime: &str,
    bytes: &[u8],
    error: &image::ImageError,
) -> FeedIcon {
    tracing::warn!(feed_id, error = %error, "Failed to normalize favicon, keeping original");
    FeedIcon {
        folder_id,
        feed_id,
        mime: mime.to_string(),
        bytes: bytes.to_vec(),
    }
}

fn encode_png(image: &DynamicImage) -> image::ImageResult<Vec<u8>> {
    let resized = image.resize_exact(ICON_SIZE, ICON_SIZE, FilterType::Lanczos3);
    let mut out = Vec::new();
    resized.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba, RgbaImage};

    fn tiny_png() -> Vec<u8> {
        let img = RgbaImage::from_pixel(16, 16, Rgba([255, 0, 0, 255]));
        let mut out = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn test_resize_to_256_png() {
        let icon = resize_icon(1, 2, "image/x-icon", &tiny_png());
        assert_eq!(icon.mime, "image/png");
        assert_eq!((icon.folder_id, icon.feed_id), (1, 2));

        let decoded = image::load_from_memory(&icon.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (ICON_SIZE, ICON_SIZE));
    }

    #[test]
    fn test_undecodable_icon_falls_back_to_original() {
        let icon = resize_icon(1, 2, "image/svg+xml", b"<svg></svg>");
        assert_eq!(icon.mime, "image/svg+xml");
        assert_eq!(icon.bytes, b"<svg></svg>");
    }

    #[test]
    fn test_normalize_disabled_preserves_bytes() {
        let png = tiny_png();
        let image = image::load_from_memory(&png).unwrap();
        let icon = normalize_icon(1, 2, "image/png", &png, &image, false);
        assert_eq!(icon.bytes, png);

        let favicon = icon.into_favicon();
        assert_eq!(favicon.mime, "image/png");
        assert_eq!(favicon.data, png);
    }

    #[test]
    fn test_normalize_enabled_resizes_decoded_image() {
        let png = tiny_png();
        let image = image::load_from_memory(&png).unwrap();
        let icon = normalize_icon(1, 2, "image/png", &png, &image, true);

        let decoded = image::load_from_memory(&icon.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (ICON_SIZE, ICON_SIZE));
    }
}
