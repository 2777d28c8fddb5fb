#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # nobg
//!
//! On-device background removal. Images never leave the machine: the
//! segmentation model is downloaded once, cached locally and run with ONNX
//! Runtime or Tract.
//!
//! The pipeline is
//! `raw bytes → validated image → (cached) model → alpha mask → composited RGBA → exported blob`.
//!
//! ## Features
//!
//! - **Validation**: format sniffing from magic bytes, dimension and size policy
//! - **Backend detection**: memoized accelerated backend detection with CPU fallback
//! - **Model cache**: one versioned, digest-checked record on disk
//! - **Cancellation**: cooperative, via [`tokio_util::sync::CancellationToken`]
//! - **State machine**: [`Orchestrator`] publishes `idle/loading/processing/complete/error`
//! - **Export**: PNG, JPEG (flattened onto white) and WebP, clipboard and file sinks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nobg::{export_image, BackgroundRemover, ExportOptions, ImageBlob, OutputFormat, RemovalConfig, RemovalOptions};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let remover = BackgroundRemover::new(RemovalConfig::default())?;
//! let blob = ImageBlob::from_path("portrait.jpg").await?;
//!
//! let result = remover.remove_background(&blob, RemovalOptions::default()).await?;
//! let exported = export_image(&result.to_blob(), &ExportOptions::new(OutputFormat::WebP))?;
//! std::fs::write(&exported.filename, exported.blob.bytes())?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime engine with CUDA/CoreML execution providers
//! - `tract` (default): pure Rust engine
//! - `gpu-detect` (default): accelerated backend detection through `wgpu`
//! - `clipboard` (default): system clipboard sink
//! - `cli` (default): the `nobg` binary and subscriber setup
//! - `webp-support` (default): WebP decoding and encoding
//! - `tracing-json`, `tracing-files`: extra log outputs for the CLI

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod models;
pub mod orchestrator;
pub mod processor;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

use tokio::io::AsyncRead;

// Public API exports
pub use backends::{backend_info, detect_best_backend, reset_backend_detection, Backend, BackendInfo};
pub use cache::{CacheInfo, FsStore, KeyValueStore, MemoryStore, ModelCache};
pub use config::{OutputFormat, RemovalConfig, RemovalConfigBuilder};
pub use download::{validate_model_url, ModelDownloader};
pub use error::{BgRemovalError, Result};
pub use inference::{BackendFactory, DefaultBackendFactory, InferenceBackend, InferenceEngine, SessionOptions};
pub use models::{HttpModelFetcher, LocalModelFetcher, ModelFetcher, ModelSource, ModelSpec, PreprocessingConfig};
pub use orchestrator::{ImageResource, Orchestrator, ProcessingState};
pub use processor::{BackgroundRemover, BackgroundRemoverBuilder, RemovalOptions};
pub use services::{
    copy_to_clipboard, download_trigger, export_image, generate_filename, ClipboardSink,
    ConsoleProgressReporter, DownloadSink, ExportOptions, ExportedImage, FileDownloadSink,
    FnProgressReporter, NoOpProgressReporter, ProcessingStage, ProgressReporter, ProgressUpdate,
};
#[cfg(feature = "clipboard")]
pub use services::ArboardClipboard;
pub use tokio_util::sync::CancellationToken;
pub use types::{ImageBlob, ImageFormatKind, ProcessingTimings, RemovalResult, SegmentationMask};
pub use utils::validation::{validate_image, ImageValidator, ValidationResult};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingConfig, TracingFormat, TracingOutput};

/// Remove the background from encoded image bytes in one call
///
/// Builds a one-off [`BackgroundRemover`]; keep a remover around instead when
/// processing several images so the model is loaded once.
///
/// # Errors
/// - `Validation` when the bytes are not a supported image
/// - Any [`BackgroundRemover::remove_background`] error
///
/// ```rust,no_run
/// use nobg::{remove_background_from_bytes, RemovalConfig};
///
/// # async fn example(upload: Vec<u8>) -> anyhow::Result<()> {
/// let config = RemovalConfig::builder().threshold(0.4).build()?;
/// let result = remove_background_from_bytes(&upload, &config).await?;
/// println!("{}x{} in {}ms", result.width, result.height, result.processing_time_ms);
/// # Ok(())
/// # }
/// ```
pub async fn remove_background_from_bytes(
    image_bytes: &[u8],
    config: &RemovalConfig,
) -> Result<RemovalResult> {
    let validation = validate_image(&ImageBlob::new(image_bytes.to_vec(), "application/octet-stream"));
    let format = validation.format;
    validation.into_result()?;

    let mime_type = format.map_or("application/octet-stream", ImageFormatKind::mime_type);
    let blob = ImageBlob::new(image_bytes.to_vec(), mime_type);

    let remover = BackgroundRemover::new(config.clone())?;
    let options = RemovalOptions::default().with_threshold(config.threshold);
    remover.remove_background(&blob, options).await
}

/// Remove the background from an async reader
///
/// # Errors
/// - `Io` when reading fails
/// - Same as [`remove_background_from_bytes`]
pub async fn remove_background_from_reader<R: AsyncRead + Unpin>(
    mut reader: R,
    config: &RemovalConfig,
) -> Result<RemovalResult> {
    let mut buffer = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buffer).await?;
    remove_background_from_bytes(&buffer, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::validation::UNSUPPORTED_FORMAT_MESSAGE;

    #[tokio::test]
    async fn test_unsupported_bytes_rejected_before_model_load() {
        let config = RemovalConfig::builder().disable_cache(true).build().unwrap();
        let err = remove_background_from_bytes(&[0, 1, 2, 3], &config)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), UNSUPPORTED_FORMAT_MESSAGE);
    }

    #[tokio::test]
    async fn test_reader_errors_propagate() {
        let config = RemovalConfig::default();
        let err = remove_background_from_reader(&b"GIF8"[..], &config)
            .await
            .unwrap_err();
        assert!(matches!(err, BgRemovalError::Validation(_)));
    }
}
