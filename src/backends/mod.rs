//! Execution backends
//!
//! - Capability detection ranking GPU compute, GPU graphics and CPU
//! - ONNX Runtime engine (hardware execution providers)
//! - Tract engine (pure Rust, CPU)

pub mod detector;

#[cfg(feature = "gpu-detect")]
pub mod gpu_query;

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

// Test utilities for backend testing
#[cfg(test)]
pub mod test_utils;

pub use self::detector::{
    backend_info, detect_best_backend, reset_backend_detection, Backend, BackendDetector,
    BackendInfo, CapabilityQuery, CpuOnlyQuery, GraphicsContext,
};

#[cfg(feature = "gpu-detect")]
pub use self::gpu_query::WgpuQuery;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;

#[cfg(feature = "tract")]
pub use self::tract::TractBackend;
