//! Inference backend abstraction and engine factory

use crate::{backends::Backend, error::Result};
use ndarray::Array4;
use serde::{Deserialize, Serialize};

// Use instant crate for cross-platform time compatibility
use instant::Duration;

/// Inference engine used to execute the segmentation model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceEngine {
    /// ONNX Runtime with hardware execution providers
    Onnx,
    /// Pure Rust CPU inference
    Tract,
}

impl Default for InferenceEngine {
    fn default() -> Self {
        if cfg!(feature = "onnx") {
            Self::Onnx
        } else {
            Self::Tract
        }
    }
}

impl std::fmt::Display for InferenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

impl std::str::FromStr for InferenceEngine {
    type Err = crate::error::BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "onnx" => Ok(Self::Onnx),
            "tract" => Ok(Self::Tract),
            other => Err(crate::error::BgRemovalError::invalid_config(format!(
                "Unknown inference engine '{other}'. Expected one of: onnx, tract"
            ))),
        }
    }
}

/// Session parameters handed to an engine when it loads a model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Backend the session should target
    pub backend: Backend,
    /// Intra-op threads (0 = auto)
    pub intra_threads: usize,
    /// Inter-op threads (0 = auto)
    pub inter_threads: usize,
}

impl SessionOptions {
    #[must_use]
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            intra_threads: 0,
            inter_threads: 0,
        }
    }

    /// Same options retargeted at another backend
    #[must_use]
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }
}

/// Trait for inference backends
pub trait InferenceBackend: Send {
    /// Load the ONNX model bytes and prepare a session
    ///
    /// # Errors
    /// - Model bytes cannot be parsed
    /// - Session creation fails for the requested backend
    fn initialize(&mut self, model: &[u8], options: &SessionOptions) -> Result<Duration>;

    /// Run inference on the input tensor
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model inference failures
    /// - Output tensor is not four-dimensional
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Check if backend is initialized
    fn is_initialized(&self) -> bool;

    /// Short engine name for logging
    fn name(&self) -> &'static str;
}

/// Creates engine instances for the compositor
pub trait BackendFactory: Send + Sync + std::fmt::Debug {
    /// Create an uninitialized engine
    ///
    /// # Errors
    /// - The engine is not compiled into this build
    fn create_backend(&self) -> Result<Box<dyn InferenceBackend>>;
}

/// Factory for the engines compiled into this build
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBackendFactory {
    engine: InferenceEngine,
}

impl DefaultBackendFactory {
    #[must_use]
    pub fn new(engine: InferenceEngine) -> Self {
        Self { engine }
    }

    /// Engines compiled into this build
    #[must_use]
    pub fn available_engines() -> Vec<InferenceEngine> {
        let mut engines = Vec::new();
        #[cfg(feature = "onnx")]
        engines.push(InferenceEngine::Onnx);
        #[cfg(feature = "tract")]
        engines.push(InferenceEngine::Tract);
        engines
    }
}

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(&self) -> Result<Box<dyn InferenceBackend>> {
        match self.engine {
            #[cfg(feature = "onnx")]
            InferenceEngine::Onnx => Ok(Box::new(crate::backends::OnnxBackend::new())),
            #[cfg(feature = "tract")]
            InferenceEngine::Tract => Ok(Box::new(crate::backends::TractBackend::new())),
            #[allow(unreachable_patterns)]
            engine => Err(crate::error::BgRemovalError::invalid_config(format!(
                "Inference engine '{engine}' is not enabled in this build"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::MockBackend;

    #[test]
    fn test_engine_parse_and_display() {
        assert_eq!("onnx".parse::<InferenceEngine>().unwrap(), InferenceEngine::Onnx);
        assert_eq!("Tract".parse::<InferenceEngine>().unwrap(), InferenceEngine::Tract);
        assert!("tensorrt".parse::<InferenceEngine>().is_err());
        assert_eq!(InferenceEngine::Tract.to_string(), "tract");
    }

    #[test]
    fn test_session_options_retarget() {
        let options = SessionOptions {
            intra_threads: 4,
            ..SessionOptions::new(Backend::WebGpu)
        };
        let cpu = options.with_backend(Backend::Cpu);
        assert_eq!(cpu.backend, Backend::Cpu);
        assert_eq!(cpu.intra_threads, 4);
    }

    #[test]
    fn test_default_factory_matches_features() {
        for engine in DefaultBackendFactory::available_engines() {
            let backend = DefaultBackendFactory::new(engine).create_backend().unwrap();
            assert!(!backend.is_initialized());
            assert_eq!(backend.name(), engine.to_string());
        }
    }

    #[test]
    fn test_trait_object_usage() {
        let mut backend: Box<dyn InferenceBackend> = Box::new(MockBackend::new());
        backend
            .initialize(b"mock-model", &SessionOptions::new(Backend::Cpu))
            .unwrap();
        assert!(backend.is_initialized());

        let input = Array4::<f32>::zeros((1, 3, 32, 32));
        let output = backend.infer(&input).unwrap();
        assert_eq!(output.dim(), (1, 1, 32, 32));
    }
}
