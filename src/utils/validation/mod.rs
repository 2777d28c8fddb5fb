//! Validation utilities for inputs, parameters and tensors

pub mod input;
pub mod numeric;
pub mod tensor;

pub use input::{
    decode_any, decode_limits, decode_sized, sniff_format, validate_image, ImageValidator, ValidationResult, CORRUPTED_IMAGE_MESSAGE,
    TOO_SMALL_MESSAGE, UNSUPPORTED_FORMAT_MESSAGE,
};
pub use numeric::NumericValidator;
pub use tensor::TensorValidator;
