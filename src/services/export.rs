//! Output format conversion and delivery
//!
//! Converts processed images to the requested format, names them and hands
//! them to a clipboard or download sink. The source blob is never mutated,
//! so a failed export can simply be retried.

use crate::{
    config::{OutputFormat, DEFAULT_JPEG_QUALITY},
    error::{BgRemovalError, Result},
    types::ImageBlob,
    utils::validation::decode_any,
};
use image::{codecs::jpeg::JpegEncoder, DynamicImage, ImageFormat, Rgb, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

/// Base name used when the input has no name
pub const DEFAULT_BASENAME: &str = "image";
/// Suffix appended to every exported file stem
pub const FILENAME_SUFFIX: &str = "-nobg";
/// Message of every clipboard failure
pub const CLIPBOARD_FAILED_MESSAGE: &str = "Clipboard failed";

/// How a processed image is exported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOptions {
    pub format: OutputFormat,
    /// Lossy quality (JPEG only), `0..=100`
    pub quality: u8,
    /// Name the output filename is derived from; the blob's own name otherwise
    pub filename: Option<String>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Png,
            quality: DEFAULT_JPEG_QUALITY,
            filename: None,
        }
    }
}

impl ExportOptions {
    #[must_use]
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.min(100);
        self
    }

    #[must_use]
    pub fn with_filename<S: Into<String>>(mut self, filename: S) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// Converted image plus its download name
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedImage {
    pub blob: ImageBlob,
    pub filename: String,
    /// Format actually produced (differs from the request after a WebP fallback)
    pub format: OutputFormat,
}

/// Derive an output filename from an input name
///
/// The extension is stripped, every character outside `[A-Za-z0-9_-]`
/// becomes `-`, runs of `-` collapse, and `-nobg.<ext>` is appended.
///
/// ```rust
/// use nobg::{generate_filename, OutputFormat};
///
/// assert_eq!(generate_filename(Some("my photo (1).jpg"), OutputFormat::Png), "my-photo-1--nobg.png");
/// assert_eq!(generate_filename(None, OutputFormat::WebP), "image-nobg.webp");
/// ```
#[must_use]
pub fn generate_filename(original: Option<&str>, format: OutputFormat) -> String {
    let stem = match original {
        Some(name) if !name.is_empty() => match name.rfind('.') {
            Some(dot) if dot > 0 => &name[..dot],
            _ => name,
        },
        _ => DEFAULT_BASENAME,
    };

    let mut sanitized = String::with_capacity(stem.len() + FILENAME_SUFFIX.len() + 5);
    for c in stem.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            c
        } else {
            '-'
        };
        if c == '-' && sanitized.ends_with('-') {
            continue;
        }
        sanitized.push(c);
    }

    format!("{sanitized}{FILENAME_SUFFIX}.{}", format.extension())
}

/// Whether this build can encode `format`
#[must_use]
pub fn is_format_supported(format: OutputFormat) -> bool {
    format.image_format().writing_enabled()
}

/// Convert a blob to the requested format and name it
///
/// Bytes pass through untouched when the blob already has the target type.
/// JPEG output is flattened onto white. WebP falls back to PNG when this
/// build cannot encode it.
///
/// # Errors
/// - `Export` when decoding or encoding fails
pub fn export_image(blob: &ImageBlob, options: &ExportOptions) -> Result<ExportedImage> {
    let format = if is_format_supported(options.format) {
        options.format
    } else {
        log::warn!(
            "{} encoding unavailable, exporting as PNG",
            options.format
        );
        OutputFormat::Png
    };

    let bytes = if blob.mime_type() == format.mime_type() {
        blob.bytes().to_vec()
    } else {
        let image = decode(blob)?;
        encode(&image, format, options.quality)?
    };

    let source_name = options.filename.as_deref().or_else(|| blob.name());
    let filename = generate_filename(source_name, format);
    log::debug!("Exported {} bytes as {}", bytes.len(), filename);

    Ok(ExportedImage {
        blob: ImageBlob::new(bytes, format.mime_type()).with_name(filename.clone()),
        filename,
        format,
    })
}

/// Encode an image in `format`
///
/// # Errors
/// - `Export` on encoder failure
pub fn encode(image: &DynamicImage, format: OutputFormat, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    match format {
        OutputFormat::Jpeg => {
            let flattened = flatten_onto_white(&image.to_rgba8());
            JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
                .encode_image(&flattened)
                .map_err(|e| BgRemovalError::export(format!("Failed to encode JPEG: {e}")))?;
        },
        OutputFormat::Png | OutputFormat::WebP => {
            DynamicImage::ImageRgba8(image.to_rgba8())
                .write_to(&mut Cursor::new(&mut buffer), format.image_format())
                .map_err(|e| BgRemovalError::export(format!("Failed to encode {format}: {e}")))?;
        },
    }
    Ok(buffer)
}

/// Composite RGBA over an opaque white background
#[must_use]
pub fn flatten_onto_white(image: &RgbaImage) -> RgbImage {
    let (width, height) = image.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let [r, g, b, a] = image.get_pixel(x, y).0;
        let alpha = u32::from(a);
        let blend = |c: u8| ((u32::from(c) * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

fn decode(blob: &ImageBlob) -> Result<DynamicImage> {
    decode_any(blob.bytes())
        .map_err(|e| BgRemovalError::export(format!("Failed to decode image for export: {e}")))
}

/// Destination for clipboard copies; always receives PNG bytes
pub trait ClipboardSink {
    /// # Errors
    /// - Any platform rejection
    fn write_png(&self, png: &[u8]) -> Result<()>;
}

/// System clipboard via `arboard`
#[cfg(feature = "clipboard")]
#[derive(Debug, Default, Clone, Copy)]
pub struct ArboardClipboard;

#[cfg(feature = "clipboard")]
impl ClipboardSink for ArboardClipboard {
    fn write_png(&self, png: &[u8]) -> Result<()> {
        let rgba = crate::utils::validation::decode_sized(png, ImageFormat::Png)
            .map_err(|e| BgRemovalError::export(e.to_string()))?
            .to_rgba8();
        let (width, height) = rgba.dimensions();

        let mut clipboard =
            arboard::Clipboard::new().map_err(|e| BgRemovalError::export(e.to_string()))?;
        clipboard
            .set_image(arboard::ImageData {
                width: width as usize,
                height: height as usize,
                bytes: std::borrow::Cow::Owned(rgba.into_raw()),
            })
            .map_err(|e| BgRemovalError::export(e.to_string()))
    }
}

/// Copy an image to the clipboard as PNG
///
/// Not retried. Every failure surfaces as the same `Export` error.
///
/// # Errors
/// - `Export("Clipboard failed")`
pub fn copy_to_clipboard(sink: &dyn ClipboardSink, blob: &ImageBlob) -> Result<()> {
    let png = if blob.mime_type() == OutputFormat::Png.mime_type() {
        blob.bytes().to_vec()
    } else {
        decode(blob)
            .and_then(|image| encode(&image, OutputFormat::Png, DEFAULT_JPEG_QUALITY))
            .map_err(|e| {
                log::warn!("Clipboard conversion failed: {e}");
                BgRemovalError::export(CLIPBOARD_FAILED_MESSAGE)
            })?
    };

    sink.write_png(&png).map_err(|e| {
        log::warn!("Clipboard rejected image: {e}");
        BgRemovalError::export(CLIPBOARD_FAILED_MESSAGE)
    })
}

/// Destination for downloads
pub trait DownloadSink {
    /// Save `blob` under `filename`, returning where it landed
    ///
    /// # Errors
    /// - Storage failure
    fn save(&self, blob: &ImageBlob, filename: &str) -> Result<PathBuf>;
}

/// Writes downloads into a directory
///
/// Data goes to a temporary file next to the target first and is persisted
/// under the final name only once fully written.
#[derive(Debug, Clone)]
pub struct FileDownloadSink {
    dir: PathBuf,
}

impl FileDownloadSink {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// Sink for the user's download directory, else the working directory
    #[must_use]
    pub fn default_location() -> Self {
        Self::new(dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl DownloadSink for FileDownloadSink {
    fn save(&self, blob: &ImageBlob, filename: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| BgRemovalError::file_io_error("create download directory", &self.dir, &e))?;

        let target = self.dir.join(filename);
        let mut file = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| BgRemovalError::file_io_error("create temporary file", &self.dir, &e))?;
        file.write_all(blob.bytes())
            .and_then(|()| file.flush())
            .map_err(|e| BgRemovalError::file_io_error("write download", &target, &e))?;
        file.persist(&target)
            .map_err(|e| BgRemovalError::file_io_error("save download", &target, &e.error))?;

        Ok(target)
    }
}

/// Hand an exported image to a download sink
///
/// # Errors
/// - `Export` when the sink fails; the blob stays valid for a retry
pub fn download_trigger(sink: &dyn DownloadSink, blob: &ImageBlob, filename: &str) -> Result<PathBuf> {
    let path = sink
        .save(blob, filename)
        .map_err(|e| BgRemovalError::export(format!("Download failed: {e}")))?;
    log::info!("💾 Saved {}", path.display());
    Ok(path)
}
