//! Configuration types for background removal operations

use crate::backends::Backend;
use crate::error::BgRemovalError;
use crate::inference::InferenceEngine;
use crate::models::{ModelSpec, DEFAULT_MODEL_VERSION};
use crate::services::export::ExportOptions;
use crate::utils::validation::NumericValidator;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default foreground threshold
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Default JPEG export quality
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Output image format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG with alpha channel transparency
    #[default]
    Png,
    /// JPEG (no transparency, alpha flattened onto white)
    Jpeg,
    /// WebP with alpha channel transparency
    #[serde(rename = "webp")]
    WebP,
}

impl OutputFormat {
    #[must_use]
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::WebP => "image/webp",
        }
    }

    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::WebP => "webp",
        }
    }

    #[must_use]
    pub fn image_format(self) -> image::ImageFormat {
        match self {
            Self::Png => image::ImageFormat::Png,
            Self::Jpeg => image::ImageFormat::Jpeg,
            Self::WebP => image::ImageFormat::WebP,
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Png => write!(f, "png"),
            Self::Jpeg => write!(f, "jpeg"),
            Self::WebP => write!(f, "webp"),
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "webp" => Ok(Self::WebP),
            other => Err(BgRemovalError::invalid_config(format!(
                "Unknown output format '{other}'. Expected one of: png, jpeg, webp"
            ))),
        }
    }
}

/// Configuration for background removal operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalConfig {
    /// Foreground threshold in `0.0..=1.0`; lower removes more background
    pub threshold: f32,

    /// Where the model and its preprocessing config come from
    pub model: ModelSpec,

    /// Version stamped on cache records; a mismatch invalidates the cache
    pub model_version: String,

    /// Cache directory override
    pub cache_dir: Option<PathBuf>,

    /// Skip the persistent model cache entirely
    pub disable_cache: bool,

    /// Force a backend instead of detecting one
    pub backend_preference: Option<Backend>,

    /// Engine executing the model
    pub engine: InferenceEngine,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,

    /// Default export settings
    pub export: ExportOptions,
}

impl Default for RemovalConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            model: ModelSpec::default(),
            model_version: DEFAULT_MODEL_VERSION.to_string(),
            cache_dir: None,
            disable_cache: false,
            backend_preference: None,
            engine: InferenceEngine::default(),
            intra_threads: 0,
            inter_threads: 0,
            export: ExportOptions::default(),
        }
    }
}

impl RemovalConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    /// ```rust
    /// use nobg::{Backend, OutputFormat, RemovalConfig};
    ///
    /// let config = RemovalConfig::builder()
    ///     .threshold(0.4)
    ///     .backend_preference(Backend::Cpu)
    ///     .output_format(OutputFormat::Jpeg)
    ///     .jpeg_quality(85)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.export.quality, 85);
    /// ```
    #[must_use]
    pub fn builder() -> RemovalConfigBuilder {
        RemovalConfigBuilder::default()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Threshold outside `0.0..=1.0` or not finite
    /// - Export quality above 100
    /// - Thread counts above 256
    /// - Empty model version
    pub fn validate(&self) -> crate::Result<()> {
        NumericValidator::validate_threshold(self.threshold)?;
        NumericValidator::validate_quality(self.export.quality)?;
        NumericValidator::validate_thread_count(self.intra_threads)?;
        NumericValidator::validate_thread_count(self.inter_threads)?;

        if self.model_version.trim().is_empty() {
            return Err(BgRemovalError::invalid_config(
                "Model version must not be empty",
            ));
        }

        Ok(())
    }
}

/// Builder for `RemovalConfig`
#[derive(Debug, Default)]
pub struct RemovalConfigBuilder {
    config: RemovalConfig,
}

impl RemovalConfigBuilder {
    #[must_use]
    pub fn threshold(mut self, threshold: f32) -> Self {
        self.config.threshold = threshold;
        self
    }

    #[must_use]
    pub fn model(mut self, model: ModelSpec) -> Self {
        self.config.model = model;
        self
    }

    #[must_use]
    pub fn model_version<S: Into<String>>(mut self, version: S) -> Self {
        self.config.model_version = version.into();
        self
    }

    #[must_use]
    pub fn cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn disable_cache(mut self, disable: bool) -> Self {
        self.config.disable_cache = disable;
        self
    }

    #[must_use]
    pub fn backend_preference(mut self, backend: Backend) -> Self {
        self.config.backend_preference = Some(backend);
        self
    }

    #[must_use]
    pub fn engine(mut self, engine: InferenceEngine) -> Self {
        self.config.engine = engine;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn inter_threads(mut self, threads: usize) -> Self {
        self.config.inter_threads = threads;
        self
    }

    /// Set total threads, splitting them between intra and inter-op pools
    ///
    /// `0` restores auto-detection for both pools.
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        if threads == 0 {
            self.config.intra_threads = 0;
            self.config.inter_threads = 0;
        } else {
            self.config.intra_threads = threads;
            self.config.inter_threads = (threads / 2).max(1);
        }
        self
    }

    #[must_use]
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.export.format = format;
        self
    }

    /// Set JPEG quality (values above 100 are clamped)
    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.export.quality = quality.min(100);
        self
    }

    #[must_use]
    pub fn export(mut self, export: ExportOptions) -> Self {
        self.config.export = export;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Any check in [`RemovalConfig::validate`] fails
    pub fn build(self) -> crate::Result<RemovalConfig> {
        let config = self.config;
        config.validate()?;
        Ok(config)
    }
}
