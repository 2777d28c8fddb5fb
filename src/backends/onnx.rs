//! ONNX Runtime engine
//!
//! Accelerated backends map onto the hardware execution providers ONNX Runtime
//! offers on this host (CUDA, then CoreML). When none is available the session
//! quietly runs on the CPU provider.

use crate::backends::Backend;
use crate::error::{BgRemovalError, Result};
use crate::inference::{InferenceBackend, SessionOptions};
use instant::{Duration, Instant};
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;

/// ONNX Runtime session wrapper
#[derive(Debug, Default)]
pub struct OnnxBackend {
    session: Option<Session>,
}

impl OnnxBackend {
    #[must_use]
    pub fn new() -> Self {
        Self { session: None }
    }

    /// Hardware execution providers with availability status
    pub fn list_providers() -> Vec<(String, bool)> {
        vec![
            ("CPU".to_string(), true),
            (
                "CUDA".to_string(),
                OrtExecutionProvider::is_available(&CUDAExecutionProvider::default())
                    .unwrap_or(false),
            ),
            (
                "CoreML".to_string(),
                OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                    .unwrap_or(false),
            ),
        ]
    }

    fn providers_for(backend: Backend) -> Vec<ExecutionProviderDispatch> {
        let mut providers = Vec::new();
        if !backend.is_accelerated() {
            log::info!("Using CPU execution provider");
            return providers;
        }

        let cuda = CUDAExecutionProvider::default();
        if OrtExecutionProvider::is_available(&cuda).unwrap_or(false) {
            log::info!("🚀 CUDA execution provider is available and will be used");
            providers.push(cuda.build());
        } else {
            log::debug!("CUDA execution provider is not available");
        }

        let coreml = CoreMLExecutionProvider::default();
        if OrtExecutionProvider::is_available(&coreml).unwrap_or(false) {
            log::info!("🍎 CoreML execution provider is available and will be used");
            providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
        } else {
            log::debug!("CoreML execution provider is not available");
        }

        if providers.is_empty() {
            log::warn!(
                "⚠️ No ONNX Runtime provider for backend '{}', running on CPU",
                backend
            );
        }
        providers
    }

    fn thread_counts(options: &SessionOptions) -> (usize, usize) {
        let cores = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(8);
        let intra = if options.intra_threads > 0 {
            options.intra_threads
        } else {
            cores
        };
        let inter = if options.inter_threads > 0 {
            options.inter_threads
        } else {
            (cores / 4).max(1)
        };
        (intra, inter)
    }
}

impl InferenceBackend for OnnxBackend {
    fn initialize(&mut self, model: &[u8], options: &SessionOptions) -> Result<Duration> {
        let model_load_start = Instant::now();

        let mut session_builder = Session::builder()
            .map_err(|e| {
                BgRemovalError::inference(format!("Failed to create session builder: {e}"))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                BgRemovalError::inference(format!("Failed to set optimization level: {e}"))
            })?;

        let providers = Self::providers_for(options.backend);
        if !providers.is_empty() {
            session_builder = session_builder
                .with_execution_providers(providers)
                .map_err(|e| {
                    BgRemovalError::inference(format!("Failed to set execution providers: {e}"))
                })?;
        }

        let (intra_threads, inter_threads) = Self::thread_counts(options);
        let session = session_builder
            .with_parallel_execution(true)
            .map_err(|e| BgRemovalError::inference(format!("Failed to enable parallel execution: {e}")))?
            .with_intra_threads(intra_threads)
            .map_err(|e| BgRemovalError::inference(format!("Failed to set intra threads: {e}")))?
            .with_inter_threads(inter_threads)
            .map_err(|e| BgRemovalError::inference(format!("Failed to set inter threads: {e}")))?
            .commit_from_memory(model)
            .map_err(|e| BgRemovalError::inference(format!("Failed to create session from model data: {e}")))?;

        log::debug!("✅ ONNX Runtime session created successfully");
        log::debug!("  - Backend: {}", options.backend);
        log::debug!(
            "  - Threading: {intra_threads} intra-op threads, {inter_threads} inter-op threads"
        );
        log::debug!(
            "  - Model size: {:.2} MB",
            model.len() as f64 / (1024.0 * 1024.0)
        );

        self.session = Some(session);

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "📊 Model loading complete: {:.0}ms",
            model_load_time.as_secs_f64() * 1000.0
        );
        Ok(model_load_time)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| BgRemovalError::internal("ONNX session not initialized"))?;

        let inference_start = Instant::now();
        log::debug!("🚀 Starting inference with input shape: {:?}", input.dim());

        let input_value = Value::from_array(input.clone()).map_err(|e| {
            BgRemovalError::inference(format!("Failed to convert input tensor: {e}"))
        })?;

        // Positional inputs avoid depending on tensor names
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| BgRemovalError::inference(format!("ONNX inference failed: {e}")))?;

        let first_key = outputs
            .keys()
            .next()
            .ok_or_else(|| BgRemovalError::inference("No output tensors found"))?;
        let output_tensor = outputs
            .get(first_key)
            .ok_or_else(|| BgRemovalError::inference("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| {
                BgRemovalError::inference(format!("Failed to extract output tensor: {e}"))
            })?;

        let output_shape = output_tensor.shape().to_vec();
        let [batch, channels, height, width] = output_shape[..] else {
            return Err(BgRemovalError::inference(format!(
                "Expected 4D output tensor, got {}D",
                output_shape.len()
            )));
        };

        let output = Array4::from_shape_vec(
            (batch, channels, height, width),
            output_tensor.iter().copied().collect(),
        )
        .map_err(|e| BgRemovalError::inference(format!("Failed to reshape output tensor: {e}")))?;

        log::info!(
            "📊 Inference complete: {:.2}ms total",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(output)
    }

    fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    fn name(&self) -> &'static str {
        "onnx"
    }
}
