//! Numeric validation utilities
//!
//! Range checks for user-tunable parameters and safe conversions used by the
//! preprocessing and mask stages.

use crate::error::{BgRemovalError, Result};

/// Validator for numeric parameters and conversions
pub struct NumericValidator;

impl NumericValidator {
    /// Validate the mask threshold (0.0 to 1.0 inclusive)
    pub fn validate_threshold(value: f32) -> Result<f32> {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(BgRemovalError::config_value_error(
                "threshold",
                value,
                "0.0-1.0",
                Some(0.5),
            ));
        }
        Ok(value)
    }

    /// Validate encoder quality (0-100)
    pub fn validate_quality(value: u8) -> Result<u8> {
        if value > 100 {
            return Err(BgRemovalError::config_value_error(
                "quality",
                value,
                "0-100",
                Some(90),
            ));
        }
        Ok(value)
    }

    /// Validate thread count
    pub fn validate_thread_count(value: usize) -> Result<usize> {
        const MAX_THREADS: usize = 256;

        if value > MAX_THREADS {
            return Err(BgRemovalError::invalid_config(format!(
                "Thread count {} exceeds maximum allowed ({})",
                value, MAX_THREADS
            )));
        }

        Ok(value)
    }

    /// Safely convert f32 to u32 with bounds checking
    pub fn validate_f32_to_u32(value: f32) -> Result<u32> {
        if !value.is_finite() {
            return Err(BgRemovalError::compositing(format!(
                "Cannot convert non-finite value {} to u32",
                value
            )));
        }

        if value < 0.0 || value > u32::MAX as f32 {
            return Err(BgRemovalError::compositing(format!(
                "Value {} is outside the u32 range",
                value
            )));
        }

        Ok(value as u32)
    }

    /// Validate normalization parameters (per-channel mean and std)
    pub fn validate_normalization_params(mean: &[f32; 3], std: &[f32; 3]) -> Result<()> {
        if let Some((i, value)) = mean.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(BgRemovalError::model_load(format!(
                "Mean value at index {} is not finite: {}",
                i, value
            )));
        }

        if let Some((i, value)) = std
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite() || **v <= 0.0)
        {
            return Err(BgRemovalError::model_load(format!(
                "Std value at index {} must be positive and finite: {}",
                i, value
            )));
        }

        Ok(())
    }
}
