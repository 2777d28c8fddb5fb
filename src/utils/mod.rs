//! Image preprocessing, mask generation and validation helpers

pub mod mask;
pub mod preprocessing;
pub mod validation;

pub use mask::MaskProcessor;
pub use preprocessing::{ContentRegion, ImagePreprocessor, PreprocessedInput};
pub use validation::{validate_image, ImageValidator, NumericValidator, TensorValidator, ValidationResult};
