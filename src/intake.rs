//! Upload validation and sanitization.
//!
//! Uploads are verified by magic bytes (never by the declared content
//! type), bounded in byte size and pixel dimensions, then decoded and
//! re-encoded to PNG. Re-encoding strips EXIF and any other ancillary
//! streams; the re-encoded bytes are what the fingerprint binds.

use std::io::Cursor;

use bytes::Bytes;
use image::{DynamicImage, ImageFormat};

use crate::config::LimitConfig;
use crate::error::{Result, ServiceError};

/// Upload formats accepted after magic-byte sniffing.
const ALLOWED_FORMATS: &[ImageFormat] = &[
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::WebP,
    ImageFormat::Gif,
    ImageFormat::Bmp,
    ImageFormat::Tiff,
];

/// Extensions matching the accepted formats.
const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "bmp", "tiff", "tif"];

/// Headers that smell like URL-rewrite or host-injection attempts. Requests
/// carrying any of them are rejected before the body is touched.
const SUSPICIOUS_HEADERS: &[&str] = &["x-original-url", "x-rewrite-url", "x-forwarded-host"];

/// Outcome of intake: sanitized bytes plus what was learned on the way.
#[derive(Debug, Clone)]
pub struct SanitizedImage {
    /// PNG re-encoding of the decoded pixels; the fingerprint input.
    pub bytes: Bytes,
    pub width: u32,
    pub height: u32,
    /// The format detected from magic bytes.
    pub source_format: ImageFormat,
    /// The decoded image, kept so the pipeline does not decode twice.
    pub image: DynamicImage,
}

/// Validate an upload end to end and return the sanitized image.
pub fn validate_upload(
    filename: Option<&str>,
    content: &[u8],
    limits: &LimitConfig,
) -> Result<SanitizedImage> {
    if let Some(name) = filename {
        validate_extension(name)?;
    }

    let max_bytes = limits.max_image_mib * 1024 * 1024;
    if (content.len() as u64) > max_bytes {
        return Err(ServiceError::BadImage(format!(
            "file too large, maximum {} MiB",
            limits.max_image_mib
        )));
    }
    if (content.len() as u64) < limits.min_image_bytes {
        return Err(ServiceError::BadImage("file too small".to_string()));
    }

    let format = image::guess_format(content)
        .map_err(|_| ServiceError::BadImage("unrecognized magic bytes".to_string()))?;
    if !ALLOWED_FORMATS.contains(&format) {
        return Err(ServiceError::BadImage(format!(
            "file type {format:?} not allowed"
        )));
    }

    let decoded = image::load_from_memory(content)
        .map_err(|err| ServiceError::BadImage(format!("cannot decode image: {err}")))?;

    let (width, height) = (decoded.width(), decoded.height());
    if width > limits.max_dimension || height > limits.max_dimension {
        return Err(ServiceError::BadImage(format!(
            "image too large: {width}x{height}, maximum {max}x{max}",
            max = limits.max_dimension
        )));
    }
    if width < limits.min_dimension || height < limits.min_dimension {
        return Err(ServiceError::BadImage(format!(
            "image too small: {width}x{height}, minimum {min}x{min}",
            min = limits.min_dimension
        )));
    }

    let mut sanitized = Cursor::new(Vec::new());
    decoded
        .write_to(&mut sanitized, ImageFormat::Png)
        .map_err(|err| ServiceError::Internal(format!("re-encode failed: {err}")))?;

    Ok(SanitizedImage {
        bytes: Bytes::from(sanitized.into_inner()),
        width,
        height,
        source_format: format,
        image: decoded,
    })
}

fn validate_extension(filename: &str) -> Result<()> {
    let ext = filename
        .rsplit('.')
        .next()
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if filename.contains('.') && ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(())
    } else {
        Err(ServiceError::BadImage(format!(
            "file extension {ext:?} not allowed"
        )))
    }
}

/// Screen request headers for injection attempts. `headers` is a lowercase
/// name iterator so the check stays transport-agnostic.
pub fn screen_headers<'a, I>(header_names: I) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    for name in header_names {
        let lowered = name.to_ascii_lowercase();
        if SUSPICIOUS_HEADERS.contains(&lowered.as_str()) {
            return Err(ServiceError::Validation(format!(
                "suspicious header {lowered:?}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn test_png(width: u32, height: u32) -> Vec<u8> {
        let mut img = RgbImage::new(width, height);
        for (x, y, px) in img.enumerate_pixels_mut() {
            // Non-constant content so the encoding is not degenerate.
            *px = Rgb([(x % 251) as u8, (y % 241) as u8, ((x + y) % 253) as u8]);
        }
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn limits() -> LimitConfig {
        LimitConfig {
            min_image_bytes: 16,
            ..LimitConfig::default()
        }
    }

    #[test]
    fn accepts_a_valid_png() {
        let bytes = test_png(200, 150);
        let out = validate_upload(Some("deck.png"), &bytes, &limits()).unwrap();
        assert_eq!(out.width, 200);
        assert_eq!(out.height, 150);
        assert_eq!(out.source_format, ImageFormat::Png);
        // Sanitized output is itself a decodable PNG.
        assert!(image::load_from_memory(&out.bytes).is_ok());
    }

    #[test]
    fn reencode_is_stable() {
        let bytes = test_png(120, 120);
        let a = validate_upload(None, &bytes, &limits()).unwrap();
        let b = validate_upload(None, &bytes, &limits()).unwrap();
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn rejects_foreign_magic_bytes() {
        // Plausible size, declared as PNG by name, but the payload is text.
        let payload = vec![b'a'; 4096];
        let err = validate_upload(Some("fake.png"), &payload, &limits()).unwrap_err();
        assert_eq!(err.code(), "BAD_IMAGE");
    }

    #[test]
    fn rejects_disallowed_extension() {
        let bytes = test_png(200, 150);
        let err = validate_upload(Some("deck.pdf"), &bytes, &limits()).unwrap_err();
        assert_eq!(err.code(), "BAD_IMAGE");
    }

    #[test]
    fn rejects_dimensions_below_minimum() {
        let bytes = test_png(99, 200);
        let err = validate_upload(None, &bytes, &limits()).unwrap_err();
        assert!(err.to_string().contains("too small"));
    }

    #[test]
    fn rejects_dimensions_above_maximum() {
        let mut tight = limits();
        tight.max_dimension = 256;
        let bytes = test_png(257, 100);
        let err = validate_upload(None, &bytes, &tight).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn rejects_undersized_files() {
        let bytes = test_png(200, 150);
        let mut strict = limits();
        strict.min_image_bytes = (bytes.len() + 1) as u64;
        let err = validate_upload(None, &bytes, &strict).unwrap_err();
        assert_eq!(err.code(), "BAD_IMAGE");
    }

    #[test]
    fn screens_suspicious_headers() {
        assert!(screen_headers(["content-type", "accept"]).is_ok());
        let err = screen_headers(["X-Original-URL"]).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
