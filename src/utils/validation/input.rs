//! Magic-byte image validation
//!
//! The format is sniffed from the leading bytes only; file extensions and the
//! declared MIME type are never trusted. A sniffed input is then decoded to
//! learn its real pixel dimensions, which are checked against size policy.

use crate::types::{Dimensions, ImageBlob, ImageFormatKind};
use image::{DynamicImage, ImageFormat, ImageReader, ImageResult, Limits};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Number of leading bytes inspected when sniffing
pub const SNIFF_LEN: usize = 12;

/// Smallest accepted width or height
pub const MIN_DIMENSION: u32 = 10;

/// Width or height above which a warning is attached
pub const MAX_DIMENSION: u32 = 8192;

/// File size above which a warning is attached
pub const LARGE_FILE_BYTES: u64 = 20 * 1024 * 1024;

const BYTES_PER_PIXEL_BUDGET: u64 = 8;

pub const UNSUPPORTED_FORMAT_MESSAGE: &str =
    "Unsupported image format. Please use PNG, JPEG, WebP, or GIF.";
pub const CORRUPTED_IMAGE_MESSAGE: &str = "Failed to load image. The file may be corrupted.";
pub const TOO_SMALL_MESSAGE: &str = "Image is too small. Minimum size is 10x10 pixels.";

const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_PREFIX: [u8; 3] = [0xFF, 0xD8, 0xFF];
const JPEG_MARKERS: [u8; 5] = [0xE0, 0xE1, 0xE2, 0xE8, 0xDB];
const GIF_PREFIX: [u8; 4] = [0x47, 0x49, 0x46, 0x38];
const GIF_VERSIONS: [[u8; 2]; 2] = [[0x37, 0x61], [0x39, 0x61]];
const RIFF_TAG: [u8; 4] = [0x52, 0x49, 0x46, 0x46];
const WEBP_TAG: [u8; 4] = [0x57, 0x45, 0x42, 0x50];

/// Identify the image format from the leading bytes
#[must_use]
pub fn sniff_format(bytes: &[u8]) -> Option<ImageFormatKind> {
    let head = bytes.get(..SNIFF_LEN.min(bytes.len()))?;

    if head.starts_with(&PNG_SIGNATURE) {
        return Some(ImageFormatKind::Png);
    }

    if head.starts_with(&JPEG_PREFIX)
        && head.get(3).is_some_and(|marker| JPEG_MARKERS.contains(marker))
    {
        return Some(ImageFormatKind::Jpeg);
    }

    if head.starts_with(&GIF_PREFIX)
        && head
            .get(4..6)
            .is_some_and(|version| GIF_VERSIONS.iter().any(|v| v.as_slice() == version))
    {
        return Some(ImageFormatKind::Gif);
    }

    // Bytes 4..8 hold the RIFF chunk size and are ignored
    if head.starts_with(&RIFF_TAG) && head.get(8..12) == Some(WEBP_TAG.as_slice()) {
        return Some(ImageFormatKind::WebP);
    }

    None
}

/// Outcome of validating one input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub format: Option<ImageFormatKind>,
    pub dimensions: Option<Dimensions>,
    pub file_size_bytes: u64,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

impl ValidationResult {
    fn rejected(format: Option<ImageFormatKind>, file_size_bytes: u64, error: &str) -> Self {
        Self {
            valid: false,
            format,
            dimensions: None,
            file_size_bytes,
            warnings: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    /// Convert a rejection into a validation error
    pub fn into_result(self) -> crate::Result<Self> {
        if self.valid {
            Ok(self)
        } else {
            Err(crate::BgRemovalError::validation(
                self.error.unwrap_or_else(|| UNSUPPORTED_FORMAT_MESSAGE.to_string()),
            ))
        }
    }
}

/// Size policy applied after a successful sniff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageValidator {
    pub min_dimension: u32,
    pub max_dimension: u32,
    pub large_file_bytes: u64,
}

impl Default for ImageValidator {
    fn default() -> Self {
        Self {
            min_dimension: MIN_DIMENSION,
            max_dimension: MAX_DIMENSION,
            large_file_bytes: LARGE_FILE_BYTES,
        }
    }
}

impl ImageValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a blob's format, integrity and dimensions
    #[must_use]
    pub fn validate(&self, blob: &ImageBlob) -> ValidationResult {
        let file_size_bytes = blob.len() as u64;

        let Some(format) = sniff_format(blob.bytes()) else {
            log::debug!(
                "Rejected {} byte input declared as '{}': no known signature",
                file_size_bytes,
                blob.mime_type()
            );
            return ValidationResult::rejected(None, file_size_bytes, UNSUPPORTED_FORMAT_MESSAGE);
        };

        let dimensions = match Self::decode_dimensions(blob.bytes(), format) {
            Ok(dimensions) => dimensions,
            Err(e) => {
                log::debug!("Failed to decode {format} input: {e}");
                return ValidationResult::rejected(
                    Some(format),
                    file_size_bytes,
                    CORRUPTED_IMAGE_MESSAGE,
                );
            },
        };

        if dimensions.width < self.min_dimension || dimensions.height < self.min_dimension {
            let mut result =
                ValidationResult::rejected(Some(format), file_size_bytes, TOO_SMALL_MESSAGE);
            result.dimensions = Some(dimensions);
            return result;
        }

        let mut warnings = Vec::new();
        if dimensions.width > self.max_dimension || dimensions.height > self.max_dimension {
            warnings.push(format!(
                "Image exceeds {max}x{max} pixels ({}x{}). Processing may be slow.",
                dimensions.width,
                dimensions.height,
                max = self.max_dimension
            ));
        }
        if file_size_bytes > self.large_file_bytes {
            warnings.push(format!(
                "Large file ({:.1} MB). Processing may be slow.",
                file_size_bytes as f64 / (1024.0 * 1024.0)
            ));
        }

        ValidationResult {
            valid: true,
            format: Some(format),
            dimensions: Some(dimensions),
            file_size_bytes,
            warnings,
            error: None,
        }
    }

    fn decode_dimensions(bytes: &[u8], format: ImageFormatKind) -> ImageResult<Dimensions> {
        let image = decode_sized(bytes, format.image_format())?;
        Ok(Dimensions::new(image.width(), image.height()))
    }
}

/// Decoder limits admitting exactly a `width` x `height` image
///
/// The allocation budget covers 16-bit RGBA, the widest layout the enabled
/// codecs produce, and never drops below the `image` crate's default.
#[must_use]
pub fn decode_limits(width: u32, height: u32) -> Limits {
    let mut limits = Limits::default();
    let default_alloc = limits.max_alloc.unwrap_or(0);
    limits.max_image_width = Some(width);
    limits.max_image_height = Some(height);
    limits.max_alloc = Some(
        (u64::from(width) * u64::from(height) * BYTES_PER_PIXEL_BUDGET).max(default_alloc),
    );
    limits
}

/// Fully decode an image, sizing decoder limits from its own header
///
/// # Errors
/// - Unreadable header or corrupt pixel data
pub fn decode_sized(bytes: &[u8], format: ImageFormat) -> ImageResult<DynamicImage> {
    let (width, height) = ImageReader::with_format(Cursor::new(bytes), format).into_dimensions()?;
    let mut reader = ImageReader::with_format(Cursor::new(bytes), format);
    reader.limits(decode_limits(width, height));
    reader.decode()
}

/// [`decode_sized`] with the format sniffed from the bytes
///
/// # Errors
/// - Unknown format, unreadable header or corrupt pixel data
pub fn decode_any(bytes: &[u8]) -> ImageResult<DynamicImage> {
    let format = match sniff_format(bytes) {
        Some(kind) => kind.image_format(),
        None => image::guess_format(bytes)?,
    };
    decode_sized(bytes, format)
}

/// Validate a blob with the default size policy
#[must_use]
pub fn validate_image(blob: &ImageBlob) -> ValidationResult {
    ImageValidator::default().validate(blob)
}
