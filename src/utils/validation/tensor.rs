//! Tensor validation utilities

use crate::error::{BgRemovalError, Result};
use ndarray::Array4;

/// Validator for inference input and output tensors
pub struct TensorValidator;

impl TensorValidator {
    /// Validate tensor shape matches expected dimensions
    pub fn validate_tensor_shape(
        tensor: &Array4<f32>,
        expected_shape: (usize, usize, usize, usize),
    ) -> Result<()> {
        let actual = tensor.dim();
        if actual != expected_shape {
            let (batch, channels, height, width) = expected_shape;
            return Err(BgRemovalError::inference(format!(
                "Tensor shape mismatch. Expected [{}, {}, {}, {}], got [{}, {}, {}, {}]",
                batch, channels, height, width, actual.0, actual.1, actual.2, actual.3
            )));
        }

        Ok(())
    }

    /// Validate a score map: batch size 1, one channel, non-empty plane
    ///
    /// Returns the (height, width) of the plane.
    pub fn validate_score_map(tensor: &Array4<f32>) -> Result<(usize, usize)> {
        let (batch, channels, height, width) = tensor.dim();
        if batch != 1 || channels != 1 {
            return Err(BgRemovalError::inference(format!(
                "Score map must have batch size 1 and a single channel, got [{batch}, {channels}, {height}, {width}]"
            )));
        }
        if height == 0 || width == 0 {
            return Err(BgRemovalError::inference("Score map is empty"));
        }
        Ok((height, width))
    }
}
