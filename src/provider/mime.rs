use crate::models::ImageFormat;

/// Sniff the image container from magic bytes, falling back to PNG.
pub fn detect_image_format(bytes: &[u8]) -> ImageFormat {
    sniff_image_format(bytes).unwrap_or_else(|| {
        tracing::warn!(
            "Unrecognized image format (first 4 bytes: {:02X?}), falling back to image/png",
            &bytes[..bytes.len().min(4)]
        );
        ImageFormat::Png
    })
}

pub fn sniff_image_format(bytes: &[u8]) -> Option<ImageFormat> {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some(ImageFormat::Jpeg),
        [0x89, 0x50, 0x4E, 0x47, ..] => Some(ImageFormat::Png),
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Some(ImageFormat::Webp),
        _ => None,
    }
}

pub fn format_from_mime(mime_type: &str) -> Option<ImageFormat> {
    match mime_type.trim().to_ascii_lowercase().as_str() {
        "image/png" => Some(ImageFormat::Png),
        "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
        "image/webp" => Some(ImageFormat::Webp),
        _ => None,
    }
}

/// Infer the format from a URL's file extension, ignoring any query string.
pub fn format_from_url(url: &str) -> Option<ImageFormat> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let extension = path.rsplit_once('.')?.1.to_ascii_lowercase();
    match extension.as_str() {
        "png" => Some(ImageFormat::Png),
        "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
        "webp" => Some(ImageFormat::Webp),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_png() {
        assert_eq!(
            detect_image_format(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A]),
            ImageFormat::Png
        );
    }

    #[test]
    fn test_detect_jpeg() {
        assert_eq!(detect_image_format(&[0xFF, 0xD8, 0xFF, 0xE0]), ImageFormat::Jpeg);
    }

    #[test]
    fn test_detect_webp() {
        assert_eq!(
            detect_image_format(&[
                0x52, 0x49, 0x46, 0x46, 0x00, 0x00, 0x00, 0x00, 0x57, 0x45, 0x42, 0x50
            ]),
            ImageFormat::Webp
        );
    }

    #[test]
    fn test_unknown_falls_back_to_png() {
        assert_eq!(detect_image_format(&[0x00, 0x01, 0x02, 0x03]), ImageFormat::Png);
        assert_eq!(detect_image_format(&[]), ImageFormat::Png);
        assert_eq!(sniff_image_format(&[]), None);
    }

    #[test]
    fn test_format_from_mime() {
        assert_eq!(format_from_mime("image/JPEG"), Some(ImageFormat::Jpeg));
        assert_eq!(format_from_mime("image/gif"), None);
    }

    #[test]
    fn test_format_from_url_ignores_query() {
        assert_eq!(
            format_from_url("https://cdn.example.com/a/b.webp?sig=abc.png"),
            Some(ImageFormat::Webp)
        );
        assert_eq!(format_from_url("https://cdn.example.com/a/b.JPG"), Some(ImageFormat::Jpeg));
        assert_eq!(format_from_url("https://cdn.example.com/a/b"), None);
    }
}
