//! Score map to alpha mask conversion

use crate::error::Result;
use crate::types::SegmentationMask;
use crate::utils::preprocessing::ContentRegion;
use crate::utils::validation::TensorValidator;
use ndarray::Array4;

/// Upper end of the score scale
pub const MAX_SCALE: f32 = 255.0;

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Score cutoff on the `0..=255` scale for a threshold
///
/// A pixel is foreground iff its score reaches `(1 - threshold) * 255`, so a
/// lower threshold keeps less of the image.
#[must_use]
pub fn score_cutoff(threshold: f32) -> f32 {
    (1.0 - threshold) * MAX_SCALE
}

/// Turns raw model output into binary alpha masks
pub struct MaskProcessor;

impl MaskProcessor {
    /// Binary mask at model resolution from raw logits
    ///
    /// # Errors
    /// - Tensor is not a single-channel score map
    pub fn threshold_logits(output: &Array4<f32>, threshold: f32) -> Result<SegmentationMask> {
        let (height, width) = TensorValidator::validate_score_map(output)?;
        let cutoff = score_cutoff(threshold);

        let data = output
            .iter()
            .take(height * width)
            .map(|&logit| {
                if sigmoid(logit) * MAX_SCALE >= cutoff {
                    255
                } else {
                    0
                }
            })
            .collect();

        Ok(SegmentationMask::new(data, (width as u32, height as u32)))
    }

    /// Map a model-resolution mask back onto the original image
    ///
    /// Letterbox padding is cropped away before resampling.
    ///
    /// # Errors
    /// - Content region outside the mask
    pub fn restore(
        mask: &SegmentationMask,
        content: ContentRegion,
        original_size: (u32, u32),
    ) -> Result<SegmentationMask> {
        let (mask_width, mask_height) = mask.dimensions;
        let cropped = if content.covers(mask_width, mask_height) {
            mask.clone()
        } else {
            mask.crop(content.x, content.y, content.width, content.height)?
        };

        cropped.resize(original_size.0, original_size.1)
    }
}
