//! Image decoding, sizing, and upload hygiene helpers.

use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};

use crate::error::DetectError;

/// Content types accepted for uploads and remote fetches.
pub const SUPPORTED_CONTENT_TYPES: [&str; 5] = [
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/webp",
    "image/bmp",
];

/// Check a declared content type against the allowlist. Parameters after a
/// `;` (charset etc.) are ignored.
pub fn is_allowed_content_type(content_type: Option<&str>) -> bool {
    let Some(content_type) = content_type else {
        return false;
    };
    let parsed = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    SUPPORTED_CONTENT_TYPES.contains(&parsed.as_str())
}

/// Decode raw bytes into an RGB image.
///
/// Empty and undecodable payloads are input-validation failures, raised
/// before the detector is ever invoked.
pub fn decode_image(data: &[u8]) -> Result<RgbImage, DetectError> {
    if data.is_empty() {
        return Err(DetectError::InvalidInput("empty image payload".to_string()));
    }
    let decoded = image::load_from_memory(data).map_err(|e| {
        DetectError::InvalidInput(format!("payload is not a decodable image: {e}"))
    })?;
    let rgb = decoded.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(DetectError::InvalidInput("image has zero area".to_string()));
    }
    Ok(rgb)
}

/// Downscale so the largest side is at most `max_dimension`, preserving
/// aspect ratio. Returns the image and the applied scale factor (1.0 when
/// no resize happened). `max_dimension == 0` disables resizing.
pub fn resize_to_max_dimension(image: RgbImage, max_dimension: u32) -> (RgbImage, f32) {
    if max_dimension == 0 {
        return (image, 1.0);
    }
    let (width, height) = image.dimensions();
    let largest = width.max(height);
    if largest <= max_dimension {
        return (image, 1.0);
    }
    let scale = max_dimension as f32 / largest as f32;
    let new_width = ((width as f32 * scale) as u32).max(1);
    let new_height = ((height as f32 * scale) as u32).max(1);
    let resized = DynamicImage::ImageRgb8(image)
        .resize_exact(new_width, new_height, FilterType::Triangle)
        .into_rgb8();
    (resized, scale)
}

/// Reduce an uploaded filename to its final path component, capped at 160
/// characters. Falls back to `"upload"` for missing or empty names.
pub fn sanitize_filename(value: Option<&str>) -> String {
    let candidate = value
        .unwrap_or_default()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if candidate.is_empty() {
        return "upload".to_string();
    }
    candidate.chars().take(160).collect()
}

/// Count tag occurrences, ordered by descending count, ties alphabetical.
pub fn tag_frequency<S: AsRef<str>>(tags: &[S]) -> Vec<(String, usize)> {
    let mut counts = std::collections::HashMap::new();
    for tag in tags {
        *counts.entry(tag.as_ref().to_string()).or_insert(0usize) += 1;
    }
    let mut ordered: Vec<(String, usize)> = counts.into_iter().collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::new(width, height);
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(
                &mut std::io::Cursor::new(&mut bytes),
                image::ImageFormat::Png,
            )
            .unwrap();
        bytes
    }

    #[test]
    fn content_type_allowlist_ignores_parameters_and_case() {
        assert!(is_allowed_content_type(Some("image/png")));
        assert!(is_allowed_content_type(Some("Image/JPEG; charset=binary")));
        assert!(!is_allowed_content_type(Some("text/html")));
        assert!(!is_allowed_content_type(None));
    }

    #[test]
    fn decode_rejects_empty_and_garbage() {
        assert!(matches!(
            decode_image(&[]),
            Err(DetectError::InvalidInput(_))
        ));
        assert!(matches!(
            decode_image(b"definitely not an image"),
            Err(DetectError::InvalidInput(_))
        ));
    }

    #[test]
    fn decode_accepts_valid_png() {
        let image = decode_image(&png_bytes(8, 6)).unwrap();
        assert_eq!(image.dimensions(), (8, 6));
    }

    #[test]
    fn resize_is_noop_within_bounds() {
        let (image, scale) = resize_to_max_dimension(RgbImage::new(100, 50), 200);
        assert_eq!(image.dimensions(), (100, 50));
        assert_eq!(scale, 1.0);
    }

    #[test]
    fn resize_preserves_aspect_ratio() {
        let (image, scale) = resize_to_max_dimension(RgbImage::new(400, 200), 100);
        assert_eq!(image.dimensions(), (100, 50));
        assert!((scale - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn sanitize_filename_strips_directories() {
        assert_eq!(sanitize_filename(Some("/etc/passwd")), "passwd");
        assert_eq!(sanitize_filename(Some("a\\b\\photo.jpg")), "photo.jpg");
        assert_eq!(sanitize_filename(Some("   ")), "upload");
        assert_eq!(sanitize_filename(None), "upload");
    }

    #[test]
    fn tag_frequency_orders_by_count_then_name() {
        let tags = ["dog", "cat", "dog", "ant", "cat", "dog"];
        let freq = tag_frequency(&tags);
        assert_eq!(
            freq,
            vec![
                ("dog".to_string(), 3),
                ("cat".to_string(), 2),
                ("ant".to_string(), 1),
            ]
        );
    }
}
