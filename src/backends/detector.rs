//! Backend capability detection
//!
//! Ranks the execution backends available on this machine. Accelerated
//! compute is preferred over a general graphics context, and the CPU is the
//! guaranteed fallback. The result is memoized process-wide until
//! [`reset_backend_detection`] is called.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, OnceLock};

/// Execution backend, ordered by preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Accelerated compute API (Vulkan, Metal or DX12 adapter with a usable device)
    #[serde(rename = "webgpu")]
    WebGpu,
    /// General-purpose GPU graphics context (GL adapter)
    #[serde(rename = "webgl")]
    WebGl,
    /// CPU execution, always available
    Cpu,
}

impl Backend {
    /// All backends from most to least preferred
    pub const PREFERENCE: [Backend; 3] = [Backend::WebGpu, Backend::WebGl, Backend::Cpu];

    /// Whether the backend runs on a GPU
    #[must_use]
    pub fn is_accelerated(self) -> bool {
        !matches!(self, Backend::Cpu)
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WebGpu => write!(f, "webgpu"),
            Self::WebGl => write!(f, "webgl"),
            Self::Cpu => write!(f, "cpu"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = crate::error::BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "webgpu" | "gpu" => Ok(Self::WebGpu),
            "webgl" | "gl" => Ok(Self::WebGl),
            "cpu" => Ok(Self::Cpu),
            other => Err(crate::error::BgRemovalError::invalid_config(format!(
                "Unknown backend '{other}'. Expected one of: webgpu, webgl, cpu"
            ))),
        }
    }
}

/// Support status for one backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendInfo {
    pub backend: Backend,
    pub supported: bool,
}

/// Graphics context variants tried for [`Backend::WebGl`], newest first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphicsContext {
    /// Highest GLES 3.x minor version the driver offers
    Gles3,
    /// Baseline GLES 3.0
    Gles30,
}

impl GraphicsContext {
    pub const PREFERENCE: [GraphicsContext; 2] = [GraphicsContext::Gles3, GraphicsContext::Gles30];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Gles3 => "gles3",
            Self::Gles30 => "gles3.0",
        }
    }
}

/// Source of raw capability answers
///
/// Implementations may fail or panic; the detector treats both as
/// "unsupported".
pub trait CapabilityQuery: Send + Sync + std::fmt::Debug {
    /// Acquire and release a compute device on an accelerated adapter
    fn query_compute(&self) -> Result<bool>;

    /// Check for a GPU graphics adapter using the given context variant
    fn query_graphics(&self, context: GraphicsContext) -> Result<bool>;
}

/// Query for hosts without GPU detection support
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuOnlyQuery;

impl CapabilityQuery for CpuOnlyQuery {
    fn query_compute(&self) -> Result<bool> {
        Ok(false)
    }

    fn query_graphics(&self, _context: GraphicsContext) -> Result<bool> {
        Ok(false)
    }
}

/// Memoizing backend detector over an injectable capability query
#[derive(Debug)]
pub struct BackendDetector {
    query: Box<dyn CapabilityQuery>,
    detected: Mutex<Option<Backend>>,
}

impl BackendDetector {
    pub fn new<P: CapabilityQuery + 'static>(query: P) -> Self {
        Self {
            query: Box::new(query),
            detected: Mutex::new(None),
        }
    }

    /// Detector using the platform query compiled into this build
    #[must_use]
    pub fn with_default_query() -> Self {
        #[cfg(feature = "gpu-detect")]
        {
            Self::new(super::gpu_query::WgpuQuery)
        }
        #[cfg(not(feature = "gpu-detect"))]
        {
            Self::new(CpuOnlyQuery)
        }
    }

    /// Best available backend, detected only on the first call after a reset
    pub fn detect_best_backend(&self) -> Backend {
        let mut detected = match self.detected.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(backend) = *detected {
            return backend;
        }

        let backend = if self.compute_supported() {
            Backend::WebGpu
        } else if self.graphics_supported() {
            Backend::WebGl
        } else {
            Backend::Cpu
        };

        tracing::info!(backend = %backend, "Detected execution backend");
        *detected = Some(backend);
        backend
    }

    /// Support status for every backend in preference order
    pub fn backend_info(&self) -> Vec<BackendInfo> {
        let compute = self.compute_supported();
        let graphics = self.graphics_supported();

        Backend::PREFERENCE
            .iter()
            .map(|&backend| BackendInfo {
                backend,
                supported: match backend {
                    Backend::WebGpu => compute,
                    Backend::WebGl => graphics,
                    Backend::Cpu => true,
                },
            })
            .collect()
    }

    /// Forget the memoized result so the next call queries again
    pub fn reset(&self) {
        let mut detected = match self.detected.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *detected = None;
    }

    /// Memoized result, if detection already ran
    pub fn cached(&self) -> Option<Backend> {
        match self.detected.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn compute_supported(&self) -> bool {
        Self::swallow("compute", || self.query.query_compute())
    }

    fn graphics_supported(&self) -> bool {
        GraphicsContext::PREFERENCE.iter().any(|&context| {
            Self::swallow(context.name(), || self.query.query_graphics(context))
        })
    }

    fn swallow<F: FnOnce() -> Result<bool>>(label: &str, check: F) -> bool {
        match catch_unwind(AssertUnwindSafe(check)) {
            Ok(Ok(supported)) => {
                log::debug!("Capability check '{}': supported={}", label, supported);
                supported
            },
            Ok(Err(e)) => {
                log::debug!("Capability check '{}' failed: {}", label, e);
                false
            },
            Err(_) => {
                log::debug!("Capability check '{}' panicked", label);
                false
            },
        }
    }
}

impl Default for BackendDetector {
    fn default() -> Self {
        Self::with_default_query()
    }
}

fn global_detector() -> &'static BackendDetector {
    static DETECTOR: OnceLock<BackendDetector> = OnceLock::new();
    DETECTOR.get_or_init(BackendDetector::with_default_query)
}

/// Best backend for this process (memoized)
pub fn detect_best_backend() -> Backend {
    global_detector().detect_best_backend()
}

/// Support status of every backend, in preference order
pub fn backend_info() -> Vec<BackendInfo> {
    global_detector().backend_info()
}

/// Clear the process-wide detection result
pub fn reset_backend_detection() {
    global_detector().reset();
}
