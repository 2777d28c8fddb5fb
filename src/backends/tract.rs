//! Tract engine
//!
//! Pure Rust CPU inference. Every [`Backend`](crate::backends::Backend) maps to
//! the same CPU execution, so accelerated requests degrade silently.

use crate::error::{BgRemovalError, Result};
use crate::inference::{InferenceBackend, SessionOptions};
use instant::{Duration, Instant};
use ndarray::Array4;
use tract_onnx::prelude::*;

type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract runnable model wrapper
#[derive(Debug, Default)]
pub struct TractBackend {
    model: Option<TractModel>,
}

impl TractBackend {
    #[must_use]
    pub fn new() -> Self {
        Self { model: None }
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self, model: &[u8], options: &SessionOptions) -> Result<Duration> {
        let model_load_start = Instant::now();

        if options.backend.is_accelerated() {
            log::debug!(
                "Tract has no '{}' execution, using pure Rust CPU inference",
                options.backend
            );
        }
        log::info!(
            "🚀 Initializing Tract backend ({:.2} MB model)",
            model.len() as f64 / (1024.0 * 1024.0)
        );

        let runnable = onnx()
            .model_for_read(&mut std::io::Cursor::new(model))
            .map_err(|e| BgRemovalError::inference(format!("Failed to load ONNX model: {e}")))?
            .into_optimized()
            .map_err(|e| BgRemovalError::inference(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| {
                BgRemovalError::inference(format!("Failed to create runnable model: {e}"))
            })?;

        self.model = Some(runnable);

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "✅ Tract backend initialized in {}ms",
            model_load_time.as_millis()
        );
        Ok(model_load_time)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| BgRemovalError::inference("Tract model not initialized"))?;

        log::debug!("🔮 Running Tract inference on {:?}", input.shape());
        let inference_start = Instant::now();

        let input_tensor = Tensor::from(input.clone());
        let outputs = model
            .run(tvec![input_tensor.into()])
            .map_err(|e| BgRemovalError::inference(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| BgRemovalError::inference("No output tensor found"))?
            .into_arc_tensor();

        let output_data = output_tensor.to_array_view::<f32>().map_err(|e| {
            BgRemovalError::inference(format!("Failed to convert output tensor: {e}"))
        })?;

        let [batch, channels, height, width] = output_data.shape()[..] else {
            return Err(BgRemovalError::inference(format!(
                "Expected 4D output tensor, got {}D",
                output_data.ndim()
            )));
        };

        let output = Array4::from_shape_vec(
            (batch, channels, height, width),
            output_data.iter().copied().collect(),
        )
        .map_err(|e| BgRemovalError::inference(format!("Failed to reshape output tensor: {e}")))?;

        log::debug!(
            "✅ Tract inference completed in {}ms",
            inference_start.elapsed().as_millis()
        );
        Ok(output)
    }

    fn is_initialized(&self) -> bool {
        self.model.is_some()
    }

    fn name(&self) -> &'static str {
        "tract"
    }
}
