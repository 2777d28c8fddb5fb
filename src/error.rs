//! Error types for the background removal pipeline
//!
//! Every failure the pipeline can surface falls into one of the stage-level
//! categories below. The orchestrator relies on [`BgRemovalError::is_cancellation`]
//! to route user-initiated aborts back to `Idle` instead of `Error`.

use thiserror::Error;

pub const MODEL_LOAD_MESSAGE: &str =
    "Failed to load the background removal model. Check your connection and try again.";
pub const COMPOSITING_MESSAGE: &str = "Failed to remove the background from this image.";
pub const CANCELLED_MESSAGE: &str = "Processing was cancelled.";
pub const INTERNAL_MESSAGE: &str = "Something went wrong while processing the image.";

/// Result type alias for background removal operations
pub type Result<T> = std::result::Result<T, BgRemovalError>;

/// Errors raised across validation, model loading, compositing and export
#[derive(Error, Debug)]
pub enum BgRemovalError {
    /// Input rejected before processing (unsupported format, corrupt image, too small)
    #[error("{0}")]
    Validation(String),

    /// Network or storage failure while fetching or parsing the model
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// Operation aborted by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Decode, inference or mask application failure
    #[error("Compositing error: {0}")]
    Compositing(String),

    /// Format conversion, download or clipboard failure
    #[error("{0}")]
    Export(String),

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image codec errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Backend inference errors
    #[error("Inference error: {0}")]
    Inference(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BgRemovalError {
    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new model load error
    pub fn model_load<S: Into<String>>(msg: S) -> Self {
        Self::ModelLoad(msg.into())
    }

    /// Create a new compositing error
    pub fn compositing<S: Into<String>>(msg: S) -> Self {
        Self::Compositing(msg.into())
    }

    /// Create a new export error
    pub fn export<S: Into<String>>(msg: S) -> Self {
        Self::Export(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create a model load error for a failed network operation
    pub fn network_error<S: Into<String>, E: std::fmt::Display>(context: S, error: E) -> Self {
        Self::ModelLoad(format!("{}: {}", context.into(), error))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Whether this error represents a caller-initiated abort
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether retrying the same operation can succeed without new input
    ///
    /// Model loads recover by retrying `preload`; export failures leave the
    /// source result intact. Validation and compositing failures are terminal
    /// for the current input.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ModelLoad(_) | Self::Export(_) | Self::Io(_))
    }

    /// Fixed message safe to show an end user
    ///
    /// Validation and export messages are already user-facing. Every other
    /// category maps to a fixed string so codec and engine text stays in logs.
    #[must_use]
    pub fn user_message(&self) -> &str {
        match self {
            Self::Validation(msg) | Self::Export(msg) => msg,
            Self::ModelLoad(_) => MODEL_LOAD_MESSAGE,
            Self::Cancelled => CANCELLED_MESSAGE,
            Self::Compositing(_) | Self::Image(_) | Self::Inference(_) => COMPOSITING_MESSAGE,
            Self::Io(_) | Self::InvalidConfig(_) | Self::Internal(_) => INTERNAL_MESSAGE,
        }
    }

    /// Fold codec and engine failures raised during compositing into the
    /// compositing category, leaving every other category untouched
    #[must_use]
    pub fn into_compositing(self) -> Self {
        match self {
            Self::Image(e) => Self::Compositing(e.to_string()),
            Self::Inference(msg) => Self::Compositing(msg),
            other => other,
        }
    }

    /// Fold any failure raised while acquiring the model into the model load
    /// category, keeping cancellation distinct
    #[must_use]
    pub fn into_model_load(self) -> Self {
        match self {
            Self::ModelLoad(_) | Self::Cancelled => self,
            other => Self::ModelLoad(other.to_string()),
        }
    }
}
