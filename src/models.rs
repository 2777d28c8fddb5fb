//! Model sources, fetchers and preprocessing configuration

use crate::download::{parse_huggingface_url, DownloadProgressFn, ModelDownloader};
use crate::error::{BgRemovalError, Result};
use crate::utils::validation::NumericValidator;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Segmentation model downloaded by default
pub const DEFAULT_MODEL_URL: &str =
    "https://huggingface.co/briaai/RMBG-1.4/resolve/main/onnx/model_quantized.onnx";

/// Preprocessing config matching [`DEFAULT_MODEL_URL`]
pub const DEFAULT_CONFIG_URL: &str =
    "https://huggingface.co/briaai/RMBG-1.4/resolve/main/preprocessor_config.json";

/// Version stamped on cache records for the default model
pub const DEFAULT_MODEL_VERSION: &str = "1.4.0";

/// File names looked up inside a local model directory
pub const LOCAL_MODEL_FILES: [&str; 2] = ["model.onnx", "model_quantized.onnx"];
pub const PREPROCESSOR_CONFIG_FILE: &str = "preprocessor_config.json";

/// Where model bytes and preprocessing config come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSource {
    /// Remote model and config URLs
    Remote { model_url: String, config_url: String },
    /// Directory holding `model.onnx` (or `model_quantized.onnx`) and `preprocessor_config.json`
    Local(PathBuf),
}

impl ModelSource {
    /// Get a display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            ModelSource::Remote { model_url, .. } => match parse_huggingface_url(model_url) {
                Ok((owner, repo)) => format!("hf:{owner}/{repo}"),
                Err(_) => format!("url:{model_url}"),
            },
            ModelSource::Local(path) => format!(
                "local:{}",
                path.file_name().unwrap_or_default().to_string_lossy()
            ),
        }
    }
}

/// Model specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub source: ModelSource,
}

impl ModelSpec {
    /// Remote model; the config URL is derived from the model URL
    ///
    /// `.../resolve/main/onnx/model.onnx` resolves its config at
    /// `.../resolve/main/preprocessor_config.json`.
    #[must_use]
    pub fn remote<S: Into<String>>(model_url: S) -> Self {
        let model_url = model_url.into();
        let config_url = derive_config_url(&model_url);
        Self {
            source: ModelSource::Remote {
                model_url,
                config_url,
            },
        }
    }

    #[must_use]
    pub fn local<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            source: ModelSource::Local(dir.into()),
        }
    }

    /// Fetcher matching the source
    ///
    /// # Errors
    /// - HTTP client creation fails
    pub fn fetcher(&self) -> Result<Box<dyn ModelFetcher>> {
        Ok(match &self.source {
            ModelSource::Remote {
                model_url,
                config_url,
            } => Box::new(HttpModelFetcher::new(model_url.clone(), config_url.clone())?),
            ModelSource::Local(dir) => Box::new(LocalModelFetcher::new(dir.clone())),
        })
    }
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            source: ModelSource::Remote {
                model_url: DEFAULT_MODEL_URL.to_string(),
                config_url: DEFAULT_CONFIG_URL.to_string(),
            },
        }
    }
}

fn derive_config_url(model_url: &str) -> String {
    let base = model_url
        .rsplit_once('/')
        .map_or(model_url, |(dir, _file)| dir);
    let base = base.strip_suffix("/onnx").unwrap_or(base);
    format!("{base}/{PREPROCESSOR_CONFIG_FILE}")
}

/// Image preprocessing parameters for the model input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Model input size `[width, height]`
    pub target_size: [u32; 2],
    /// Per-channel mean in `0..=1` pixel units
    pub mean: [f32; 3],
    /// Per-channel standard deviation in `0..=1` pixel units
    pub std: [f32; 3],
    /// Scale applied to raw `u8` channel values
    pub rescale_factor: f32,
    /// Apply mean/std normalization after rescaling
    pub normalize: bool,
    /// Letterbox (aspect-preserving resize plus padding) instead of stretching
    pub pad: bool,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            target_size: [1024, 1024],
            mean: [0.5, 0.5, 0.5],
            std: [1.0, 1.0, 1.0],
            rescale_factor: 1.0 / 255.0,
            normalize: true,
            pad: false,
        }
    }
}

impl PreprocessingConfig {
    /// Parse a `HuggingFace` `preprocessor_config.json`
    ///
    /// Missing optional fields fall back to defaults. Mean/std given in
    /// `0..=255` units are converted to `0..=1`.
    ///
    /// # Errors
    /// - Invalid JSON
    /// - Zero or oversized target dimensions
    /// - Non-finite or non-positive normalization values
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json).map_err(|e| {
            BgRemovalError::model_load(format!("Failed to parse preprocessor config: {e}"))
        })?;
        Self::from_value(&value)
    }

    fn from_value(value: &serde_json::Value) -> Result<Self> {
        let defaults = Self::default();

        let target_size = match value.get("size") {
            Some(size) => Self::parse_size(size)?,
            None => defaults.target_size,
        };

        let mean = Self::parse_triplet(value, "image_mean")?.unwrap_or(defaults.mean);
        let std = Self::parse_triplet(value, "image_std")?.unwrap_or(defaults.std);
        let (mean, std) = Self::to_unit_range(mean, std);
        NumericValidator::validate_normalization_params(&mean, &std)?;

        let rescale_factor = value
            .get("rescale_factor")
            .and_then(serde_json::Value::as_f64)
            .map_or(defaults.rescale_factor, |v| v as f32);
        if !rescale_factor.is_finite() || rescale_factor <= 0.0 {
            return Err(BgRemovalError::model_load(format!(
                "Invalid rescale_factor {rescale_factor} in preprocessor config"
            )));
        }

        Ok(Self {
            target_size,
            mean,
            std,
            rescale_factor,
            normalize: value
                .get("do_normalize")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(defaults.normalize),
            pad: value
                .get("do_pad")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(defaults.pad),
        })
    }

    fn parse_size(size: &serde_json::Value) -> Result<[u32; 2]> {
        // Square models sometimes give a single edge length
        if let Some(edge) = size.as_u64() {
            let edge = Self::dimension(edge, "size")?;
            return Ok([edge, edge]);
        }

        let read = |key: &str| {
            size.get(key)
                .and_then(serde_json::Value::as_u64)
                .ok_or_else(|| {
                    BgRemovalError::model_load(format!("Missing {key} in size config"))
                })
                .and_then(|v| Self::dimension(v, key))
        };

        Ok([read("width")?, read("height")?])
    }

    fn dimension(value: u64, key: &str) -> Result<u32> {
        match u32::try_from(value) {
            Ok(v) if (1..=8192).contains(&v) => Ok(v),
            _ => Err(BgRemovalError::model_load(format!(
                "Invalid {key} {value} in preprocessor config"
            ))),
        }
    }

    fn parse_triplet(value: &serde_json::Value, key: &str) -> Result<Option<[f32; 3]>> {
        let Some(raw) = value.get(key) else {
            return Ok(None);
        };

        // Scalars apply to every channel
        if let Some(scalar) = raw.as_f64() {
            return Ok(Some([scalar as f32; 3]));
        }

        let values = raw.as_array().ok_or_else(|| {
            BgRemovalError::model_load(format!("{key} must be a number or an array"))
        })?;

        let mut triplet = [0.0f32; 3];
        for (i, slot) in triplet.iter_mut().enumerate() {
            *slot = values
                .get(i)
                .and_then(serde_json::Value::as_f64)
                .ok_or_else(|| BgRemovalError::model_load(format!("Invalid {key}[{i}] value")))?
                as f32;
        }
        Ok(Some(triplet))
    }

    fn to_unit_range(mean: [f32; 3], std: [f32; 3]) -> ([f32; 3], [f32; 3]) {
        if mean.iter().any(|&m| m > 1.0) {
            (mean.map(|m| m / 255.0), std.map(|s| s / 255.0))
        } else {
            (mean, std)
        }
    }
}

/// Source of model bytes and preprocessing config
#[async_trait]
pub trait ModelFetcher: Send + Sync + std::fmt::Debug {
    /// Fetch the ONNX model payload, reporting download percentage
    ///
    /// # Errors
    /// - Network or filesystem failures
    async fn fetch_model(&self, progress: Option<&DownloadProgressFn>) -> Result<Vec<u8>>;

    /// Fetch and parse the preprocessing config
    ///
    /// # Errors
    /// - Network or filesystem failures
    /// - Malformed config
    async fn fetch_preprocessor_config(&self) -> Result<PreprocessingConfig>;

    /// Short description for logging
    fn describe(&self) -> String;
}

/// Fetches the model over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpModelFetcher {
    downloader: ModelDownloader,
    model_url: String,
    config_url: String,
}

impl HttpModelFetcher {
    /// # Errors
    /// - HTTP client creation fails
    pub fn new(model_url: String, config_url: String) -> Result<Self> {
        Ok(Self {
            downloader: ModelDownloader::new()?,
            model_url,
            config_url,
        })
    }
}

#[async_trait]
impl ModelFetcher for HttpModelFetcher {
    async fn fetch_model(&self, progress: Option<&DownloadProgressFn>) -> Result<Vec<u8>> {
        log::info!("📥 Downloading model from {}", self.model_url);
        let bytes = self.downloader.download_bytes(&self.model_url, progress).await?;
        if bytes.is_empty() {
            return Err(BgRemovalError::model_load(format!(
                "Empty model payload from {}",
                self.model_url
            )));
        }
        Ok(bytes)
    }

    async fn fetch_preprocessor_config(&self) -> Result<PreprocessingConfig> {
        let json = self.downloader.download_text(&self.config_url).await?;
        PreprocessingConfig::from_json(&json)
    }

    fn describe(&self) -> String {
        self.model_url.clone()
    }
}

/// Reads the model from a local directory
#[derive(Debug, Clone)]
pub struct LocalModelFetcher {
    dir: PathBuf,
}

impl LocalModelFetcher {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn model_path(&self) -> Result<PathBuf> {
        LOCAL_MODEL_FILES
            .iter()
            .map(|name| self.dir.join(name))
            .find(|path| path.is_file())
            .ok_or_else(|| {
                BgRemovalError::model_load(format!(
                    "No model file ({}) in {}",
                    LOCAL_MODEL_FILES.join(" or "),
                    self.dir.display()
                ))
            })
    }

    async fn read(path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| BgRemovalError::model_load(format!("Failed to read {}: {e}", path.display())))
    }
}

#[async_trait]
impl ModelFetcher for LocalModelFetcher {
    async fn fetch_model(&self, progress: Option<&DownloadProgressFn>) -> Result<Vec<u8>> {
        let path = self.model_path()?;
        log::debug!("Loading model from {}", path.display());
        let bytes = Self::read(&path).await?;
        if let Some(report) = progress {
            report(100.0);
        }
        Ok(bytes)
    }

    async fn fetch_preprocessor_config(&self) -> Result<PreprocessingConfig> {
        let path = self.dir.join(PREPROCESSOR_CONFIG_FILE);
        if !path.is_file() {
            log::warn!(
                "No {} in {}, using default preprocessing",
                PREPROCESSOR_CONFIG_FILE,
                self.dir.display()
            );
            return Ok(PreprocessingConfig::default());
        }

        let bytes = Self::read(&path).await?;
        let json = String::from_utf8(bytes).map_err(|e| {
            BgRemovalError::model_load(format!("{} is not UTF-8: {e}", path.display()))
        })?;
        PreprocessingConfig::from_json(&json)
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}
