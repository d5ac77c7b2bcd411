//! Upload validation and decoding.
//!
//! Size and format are checked against the configured policy before any
//! pixel decoding happens, so an oversized or mistyped upload is rejected
//! without ever reaching a detector.

use image::{ImageFormat, RgbImage};

use crate::PipelineError;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Accepted upload formats. Detected by content sniffing, not extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadFormat {
    Jpeg,
    Png,
}

/// Upload acceptance policy: JPEG/PNG allow-list plus a size cap.
#[derive(Clone, Copy, Debug)]
pub struct UploadPolicy {
    max_upload_bytes: u64,
}

impl UploadPolicy {
    pub fn new(max_upload_size_mb: u64) -> Self {
        Self {
            max_upload_bytes: max_upload_size_mb * BYTES_PER_MB,
        }
    }

    /// Check size and format without decoding pixels.
    pub fn validate(&self, bytes: &[u8]) -> Result<UploadFormat, PipelineError> {
        if bytes.is_empty() {
            return Err(PipelineError::Validation("empty upload".to_string()));
        }
        if bytes.len() as u64 > self.max_upload_bytes {
            return Err(PipelineError::Validation(format!(
                "file is {:.2} MB, maximum is {} MB",
                bytes.len() as f64 / BYTES_PER_MB as f64,
                self.max_upload_bytes / BYTES_PER_MB
            )));
        }
        match image::guess_format(bytes) {
            Ok(ImageFormat::Jpeg) => Ok(UploadFormat::Jpeg),
            Ok(ImageFormat::Png) => Ok(UploadFormat::Png),
            Ok(other) => Err(PipelineError::Validation(format!(
                "unsupported format {other:?}, allowed formats are JPEG and PNG"
            ))),
            Err(_) => Err(PipelineError::Validation(
                "unrecognized image data".to_string(),
            )),
        }
    }

    /// Validate, then decode to RGB8.
    pub fn decode(&self, bytes: &[u8]) -> Result<RgbImage, PipelineError> {
        self.validate(bytes)?;
        let image = image::load_from_memory(bytes)
            .map_err(|e| PipelineError::Validation(format!("failed to decode image: {e}")))?;
        Ok(image.to_rgb8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::new(width, height);
        let mut cursor = Cursor::new(Vec::new());
        image
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("encode fixture");
        cursor.into_inner()
    }

    #[test]
    fn valid_png_passes_and_decodes() -> Result<(), PipelineError> {
        let policy = UploadPolicy::new(10);
        let bytes = png_bytes(4, 3);
        assert_eq!(policy.validate(&bytes)?, UploadFormat::Png);
        let image = policy.decode(&bytes)?;
        assert_eq!(image.dimensions(), (4, 3));
        Ok(())
    }

    #[test]
    fn oversized_upload_is_rejected_before_decoding() {
        let policy = UploadPolicy::new(1);
        let bytes = vec![0u8; 2 * 1024 * 1024];
        match policy.validate(&bytes) {
            Err(PipelineError::Validation(reason)) => assert!(reason.contains("maximum is 1 MB")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn unsupported_format_is_rejected() {
        let policy = UploadPolicy::new(10);
        // Minimal BMP header; recognized by sniffing, but not allow-listed.
        let bytes = b"BM\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00".to_vec();
        assert!(matches!(
            policy.validate(&bytes),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        let policy = UploadPolicy::new(10);
        assert!(matches!(
            policy.validate(&[0xDE, 0xAD, 0xBE, 0xEF]),
            Err(PipelineError::Validation(_))
        ));
        assert!(matches!(
            policy.validate(&[]),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn truncated_png_fails_decode_not_validate() {
        let policy = UploadPolicy::new(10);
        let mut bytes = png_bytes(8, 8);
        bytes.truncate(20);
        // Signature still sniffs as PNG, decode then fails.
        assert!(policy.validate(&bytes).is_ok());
        assert!(matches!(
            policy.decode(&bytes),
            Err(PipelineError::Validation(_))
        ));
    }
}
