//! Core data types shared across the pipeline

use crate::{
    backends::Backend,
    error::{BgRemovalError, Result},
};
use image::{imageops::FilterType, ImageBuffer, Luma, RgbaImage};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Image formats accepted by the validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormatKind {
    Png,
    Jpeg,
    #[serde(rename = "webp")]
    WebP,
    Gif,
}

impl ImageFormatKind {
    #[must_use]
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::WebP => "image/webp",
            Self::Gif => "image/gif",
        }
    }

    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::WebP => "webp",
            Self::Gif => "gif",
        }
    }

    /// Matching codec in the `image` crate
    #[must_use]
    pub fn image_format(self) -> image::ImageFormat {
        match self {
            Self::Png => image::ImageFormat::Png,
            Self::Jpeg => image::ImageFormat::Jpeg,
            Self::WebP => image::ImageFormat::WebP,
            Self::Gif => image::ImageFormat::Gif,
        }
    }
}

impl std::fmt::Display for ImageFormatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Png => write!(f, "png"),
            Self::Jpeg => write!(f, "jpeg"),
            Self::WebP => write!(f, "webp"),
            Self::Gif => write!(f, "gif"),
        }
    }
}

/// Pixel dimensions of a decoded image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Immutable input or output image payload
///
/// The bytes are reference counted, so cloning a blob never copies pixel data.
/// The declared MIME type is informational only; the validator sniffs the
/// real format from the leading bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlob {
    bytes: Arc<[u8]>,
    mime_type: String,
    name: Option<String>,
}

impl ImageBlob {
    pub fn new<B: Into<Arc<[u8]>>, S: Into<String>>(bytes: B, mime_type: S) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
            name: None,
        }
    }

    /// Attach the original file name, used for export filenames
    #[must_use]
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Read a blob from disk, declaring the MIME type from its content
    ///
    /// # Errors
    /// - File cannot be read
    pub async fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| BgRemovalError::file_io_error("read input image", path, &e))?;

        let mime_type = crate::utils::validation::sniff_format(&bytes)
            .map_or("application/octet-stream", ImageFormatKind::mime_type);

        let blob = Self::new(bytes, mime_type);
        Ok(match path.file_name() {
            Some(name) => blob.with_name(name.to_string_lossy()),
            None => blob,
        })
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Binary segmentation mask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationMask {
    /// Mask data as grayscale values (0-255)
    pub data: Vec<u8>,

    /// Mask dimensions (width, height)
    pub dimensions: (u32, u32),
}

impl SegmentationMask {
    #[must_use]
    pub fn new(data: Vec<u8>, dimensions: (u32, u32)) -> Self {
        Self { data, dimensions }
    }

    /// Create mask from a grayscale image
    #[must_use]
    pub fn from_image(image: &ImageBuffer<Luma<u8>, Vec<u8>>) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.as_raw().clone(), (width, height))
    }

    /// Convert mask to a grayscale image
    pub fn to_image(&self) -> Result<ImageBuffer<Luma<u8>, Vec<u8>>> {
        let (width, height) = self.dimensions;
        ImageBuffer::from_raw(width, height, self.data.clone()).ok_or_else(|| {
            BgRemovalError::compositing(format!(
                "Mask buffer of {} bytes does not match {}x{}",
                self.data.len(),
                width,
                height
            ))
        })
    }

    /// Cut a rectangular region out of the mask
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Result<SegmentationMask> {
        let (mask_width, mask_height) = self.dimensions;
        if width == 0 || height == 0 || x + width > mask_width || y + height > mask_height {
            return Err(BgRemovalError::compositing(format!(
                "Crop region {width}x{height}+{x}+{y} lies outside {mask_width}x{mask_height} mask"
            )));
        }

        let image = self.to_image()?;
        let cropped = image::imageops::crop_imm(&image, x, y, width, height).to_image();
        Ok(SegmentationMask::from_image(&cropped))
    }

    /// Resample the mask to new dimensions
    pub fn resize(&self, new_width: u32, new_height: u32) -> Result<SegmentationMask> {
        if self.dimensions == (new_width, new_height) {
            return Ok(self.clone());
        }

        let current_image = self.to_image()?;
        let resized = image::imageops::resize(
            &current_image,
            new_width,
            new_height,
            FilterType::Triangle,
        );

        Ok(SegmentationMask::from_image(&resized))
    }

    /// Write the mask into the alpha channel of an RGBA image of equal size
    pub fn apply_to_image(&self, image: &mut RgbaImage) -> Result<()> {
        if image.dimensions() != self.dimensions {
            let (img_width, img_height) = image.dimensions();
            let (mask_width, mask_height) = self.dimensions;
            return Err(BgRemovalError::compositing(format!(
                "Image ({img_width}x{img_height}) and mask ({mask_width}x{mask_height}) dimensions do not match"
            )));
        }

        for (pixel, &alpha) in image.pixels_mut().zip(self.data.iter()) {
            pixel[3] = alpha;
        }

        Ok(())
    }

    /// Get mask statistics
    #[must_use]
    pub fn statistics(&self) -> MaskStatistics {
        let total_pixels = self.data.len();
        let transparent_pixels = self.data.iter().filter(|&&x| x == 0).count();
        let foreground_pixels = self.data.iter().filter(|&&x| x > 127).count();

        let ratio = |count: usize| {
            if total_pixels == 0 {
                0.0
            } else {
                count as f32 / total_pixels as f32
            }
        };

        MaskStatistics {
            total_pixels,
            foreground_pixels,
            transparent_pixels,
            foreground_ratio: ratio(foreground_pixels),
            transparent_ratio: ratio(transparent_pixels),
        }
    }
}

/// Statistics about a segmentation mask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskStatistics {
    pub total_pixels: usize,
    pub foreground_pixels: usize,
    pub transparent_pixels: usize,
    pub foreground_ratio: f32,
    pub transparent_ratio: f32,
}

/// Detailed timing breakdown for one compositor call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    /// Time spent waiting for the shared model handle (zero once warm)
    pub model_load_ms: u64,

    /// Input decoding
    pub image_decode_ms: u64,

    /// Resize, normalization and tensor conversion
    pub preprocessing_ms: u64,

    /// Inference engine execution
    pub inference_ms: u64,

    /// Mask generation, resampling and alpha application
    pub postprocessing_ms: u64,

    /// Lossless PNG encoding of the result
    pub image_encode_ms: u64,

    /// Total end-to-end processing time
    pub total_ms: u64,
}

impl ProcessingTimings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Share of the total spent inside the inference engine
    #[must_use]
    pub fn inference_ratio(&self) -> f64 {
        if self.total_ms == 0 {
            0.0
        } else {
            self.inference_ms as f64 / self.total_ms as f64
        }
    }

    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "total {}ms (decode {}ms, preprocess {}ms, inference {}ms, postprocess {}ms, encode {}ms)",
            self.total_ms,
            self.image_decode_ms,
            self.preprocessing_ms,
            self.inference_ms,
            self.postprocessing_ms,
            self.image_encode_ms
        )
    }
}

/// Output of a successful background removal
#[derive(Debug, Clone)]
pub struct RemovalResult {
    /// Lossless PNG at the input's full resolution
    pub output_bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub processing_time_ms: u64,
    /// Backend the model handle was created for
    pub backend: Backend,
    pub timings: ProcessingTimings,
}

impl RemovalResult {
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Wrap the encoded output as a PNG blob
    #[must_use]
    pub fn to_blob(&self) -> ImageBlob {
        ImageBlob::new(self.output_bytes.clone(), ImageFormatKind::Png.mime_type())
    }
}
