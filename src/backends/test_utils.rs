//! Mock inference backend for unit tests
//!
//! Produces logits for a centered disc so the full compositing path can run
//! without model files or a native runtime.

use crate::{
    error::{BgRemovalError, Result},
    inference::{BackendFactory, InferenceBackend, SessionOptions},
};
use instant::Duration;
use ndarray::Array4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Logit magnitude used for confident foreground/background
pub const MOCK_LOGIT: f32 = 8.0;

/// Mock engine recording every call
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    initialized: bool,
    call_history: Arc<Mutex<Vec<String>>>,
    init_count: Arc<AtomicUsize>,
    should_fail_init: bool,
    should_fail_inference: bool,
    accelerated_fails: bool,
    inference_delay: Option<Duration>,
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every initialization
    #[must_use]
    pub fn failing_init(mut self) -> Self {
        self.should_fail_init = true;
        self
    }

    /// Fail every inference call
    #[must_use]
    pub fn failing_inference(mut self) -> Self {
        self.should_fail_inference = true;
        self
    }

    /// Fail initialization only for accelerated backends
    #[must_use]
    pub fn failing_accelerated(mut self) -> Self {
        self.accelerated_fails = true;
        self
    }

    /// Sleep inside `infer` to widen race windows
    #[must_use]
    pub fn with_inference_delay(mut self, delay: Duration) -> Self {
        self.inference_delay = Some(delay);
        self
    }

    pub fn get_call_history(&self) -> Vec<String> {
        self.call_history.lock().unwrap().clone()
    }

    pub fn init_count(&self) -> usize {
        self.init_count.load(Ordering::SeqCst)
    }

    fn record_call(&self, call: String) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(call);
        }
    }

    /// Disc of radius min(w, h) / 3 around the center
    pub fn disc_logits(batch: usize, height: usize, width: usize) -> Array4<f32> {
        let center_x = width as f32 / 2.0;
        let center_y = height as f32 / 2.0;
        let radius = width.min(height) as f32 / 3.0;

        Array4::from_shape_fn((batch, 1, height, width), |(_, _, y, x)| {
            let dx = x as f32 + 0.5 - center_x;
            let dy = y as f32 + 0.5 - center_y;
            if (dx * dx + dy * dy).sqrt() < radius {
                MOCK_LOGIT
            } else {
                -MOCK_LOGIT
            }
        })
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self, model: &[u8], options: &SessionOptions) -> Result<Duration> {
        self.record_call(format!("initialize:{}", options.backend));
        self.init_count.fetch_add(1, Ordering::SeqCst);

        if self.should_fail_init {
            return Err(BgRemovalError::inference("Mock backend initialization failed"));
        }
        if self.accelerated_fails && options.backend.is_accelerated() {
            return Err(BgRemovalError::inference(format!(
                "Mock backend has no '{}' support",
                options.backend
            )));
        }
        if model.is_empty() {
            return Err(BgRemovalError::inference("Empty model"));
        }

        self.initialized = true;
        Ok(Duration::from_millis(1))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.record_call("infer".to_string());

        if !self.initialized {
            return Err(BgRemovalError::inference("Mock backend not initialized"));
        }
        if self.should_fail_inference {
            return Err(BgRemovalError::inference("Mock inference failed"));
        }
        if let Some(delay) = self.inference_delay {
            std::thread::sleep(delay);
        }

        let (batch, _, height, width) = input.dim();
        Ok(Self::disc_logits(batch, height, width))
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Factory handing out clones of a template mock
///
/// Clones share call history and init counters with the template.
#[derive(Debug, Clone, Default)]
pub struct MockBackendFactory {
    pub template: MockBackend,
}

impl MockBackendFactory {
    #[must_use]
    pub fn new(template: MockBackend) -> Self {
        Self { template }
    }
}

impl BackendFactory for MockBackendFactory {
    fn create_backend(&self) -> Result<Box<dyn InferenceBackend>> {
        Ok(Box::new(self.template.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::Backend;

    #[test]
    fn test_mock_records_calls_across_clones() {
        let template = MockBackend::new();
        let mut clone = template.clone();
        clone
            .initialize(b"m", &SessionOptions::new(Backend::Cpu))
            .unwrap();
        clone.infer(&Array4::zeros((1, 3, 4, 4))).unwrap();

        assert_eq!(template.get_call_history(), vec!["initialize:cpu", "infer"]);
        assert_eq!(template.init_count(), 1);
    }

    #[test]
    fn test_accelerated_failure_only_hits_gpu() {
        let mut backend = MockBackend::new().failing_accelerated();
        assert!(backend
            .initialize(b"m", &SessionOptions::new(Backend::WebGpu))
            .is_err());
        assert!(backend
            .initialize(b"m", &SessionOptions::new(Backend::Cpu))
            .is_ok());
    }

    #[test]
    fn test_disc_logits_shape_and_sign() {
        let logits = MockBackend::disc_logits(1, 30, 30);
        assert_eq!(logits.dim(), (1, 1, 30, 30));
        assert!(logits[[0, 0, 15, 15]] > 0.0);
        assert!(logits[[0, 0, 0, 0]] < 0.0);
    }
}
