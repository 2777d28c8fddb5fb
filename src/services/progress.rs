//! Progress reporting service
//!
//! Separates progress reporting from the pipeline so frontends can render it
//! however they like. Progress is a fraction in `0.0..=1.0`; the fixed stage
//! values below are part of the observable contract.

use crate::types::ProcessingTimings;
use instant::Instant;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Start of the model download window
pub const MODEL_LOAD_START: f32 = 0.1;
/// End of the model download window (also reported on a cache hit)
pub const MODEL_LOAD_END: f32 = 0.5;
/// Model handle ready; loading turns into processing here
pub const MODEL_READY: f32 = 0.7;

/// Map a download percentage onto the model loading window
#[must_use]
pub fn model_load_progress(percent: f32) -> f32 {
    MODEL_LOAD_START + percent.clamp(0.0, 100.0) / 100.0 * (MODEL_LOAD_END - MODEL_LOAD_START)
}

/// Progress stages during background removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Downloading or reading model bytes
    ModelDownload,
    /// Model bytes available (download finished or cache hit)
    ModelLoaded,
    /// Preprocessing config fetched, session ready
    ModelReady,
    /// Decoding input image
    ImageDecoding,
    /// Preparing the input tensor
    Preprocessing,
    /// Running model inference
    Inference,
    /// Thresholding and compositing the mask
    MaskGeneration,
    /// Encoded result available
    Completed,
}

impl ProcessingStage {
    const ORDERED: [ProcessingStage; 8] = [
        ProcessingStage::ModelDownload,
        ProcessingStage::ModelLoaded,
        ProcessingStage::ModelReady,
        ProcessingStage::ImageDecoding,
        ProcessingStage::Preprocessing,
        ProcessingStage::Inference,
        ProcessingStage::MaskGeneration,
        ProcessingStage::Completed,
    ];

    /// Latest stage entered once `progress` has been reached
    #[must_use]
    pub fn at_progress(progress: f32) -> Self {
        Self::ORDERED
            .iter()
            .rev()
            .copied()
            .find(|stage| stage.progress() <= progress)
            .unwrap_or(ProcessingStage::ModelDownload)
    }

    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            ProcessingStage::ModelDownload => "Downloading model",
            ProcessingStage::ModelLoaded => "Model loaded",
            ProcessingStage::ModelReady => "Model ready",
            ProcessingStage::ImageDecoding => "Decoding image",
            ProcessingStage::Preprocessing => "Preprocessing image",
            ProcessingStage::Inference => "Running AI inference",
            ProcessingStage::MaskGeneration => "Applying mask",
            ProcessingStage::Completed => "Processing completed",
        }
    }

    /// Fixed progress value reported on entering the stage
    #[must_use]
    pub fn progress(&self) -> f32 {
        match self {
            ProcessingStage::ModelDownload => MODEL_LOAD_START,
            ProcessingStage::ModelLoaded => MODEL_LOAD_END,
            ProcessingStage::ModelReady => MODEL_READY,
            ProcessingStage::ImageDecoding => 0.75,
            ProcessingStage::Preprocessing => 0.8,
            ProcessingStage::Inference => 0.9,
            ProcessingStage::MaskGeneration => 0.95,
            ProcessingStage::Completed => 1.0,
        }
    }
}

/// Progress update containing stage and timing information
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub stage: ProcessingStage,
    /// Fraction in `0.0..=1.0`
    pub progress: f32,
    pub description: String,
    /// Elapsed time since the tracker started (milliseconds)
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    #[must_use]
    pub fn new(stage: ProcessingStage, progress: f32, start_time: Instant) -> Self {
        Self {
            stage,
            progress,
            description: stage.description().to_string(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
        }
    }

    /// Progress as a whole percentage
    #[must_use]
    pub fn percent(&self) -> u8 {
        (self.progress.clamp(0.0, 1.0) * 100.0).round() as u8
    }
}

/// Trait for reporting progress during background removal operations
pub trait ProgressReporter: Send + Sync {
    fn report_progress(&self, update: ProgressUpdate);

    /// Report processing completion with final timings
    fn report_completion(&self, timings: &ProcessingTimings) {
        let _ = timings;
    }

    /// Report an error during processing
    fn report_error(&self, stage: ProcessingStage, error: &str) {
        let _ = (stage, error);
    }
}

/// No-op progress reporter that discards all progress updates
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}
}

/// Console progress reporter that logs progress
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            log::info!(
                "[{}%] {} ({}ms elapsed)",
                update.percent(),
                update.description,
                update.elapsed_ms
            );
        } else {
            log::info!("[{}%] {}", update.percent(), update.description);
        }
    }

    fn report_completion(&self, timings: &ProcessingTimings) {
        log::info!("✅ Background removal completed in {}ms", timings.total_ms);

        if self.verbose {
            log::info!("  📊 Detailed timings:");
            log::info!("    • Model load: {}ms", timings.model_load_ms);
            log::info!("    • Image decode: {}ms", timings.image_decode_ms);
            log::info!("    • Preprocessing: {}ms", timings.preprocessing_ms);
            log::info!("    • Inference: {}ms", timings.inference_ms);
            log::info!("    • Postprocessing: {}ms", timings.postprocessing_ms);
            log::info!("    • Encode: {}ms", timings.image_encode_ms);
        }
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        log::error!("❌ Error during {}: {}", stage.description(), error);
    }
}

/// Adapter turning a closure over the progress fraction into a reporter
pub struct FnProgressReporter<F>(F);

impl<F> FnProgressReporter<F>
where
    F: Fn(f32) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self(callback)
    }
}

impl<F> ProgressReporter for FnProgressReporter<F>
where
    F: Fn(f32) + Send + Sync,
{
    fn report_progress(&self, update: ProgressUpdate) {
        (self.0)(update.progress);
    }
}

/// Monotonic progress relay
///
/// Updates not above the highest value already forwarded are dropped, so
/// reporters never see progress go backwards even when several callers share
/// one initialization.
#[derive(Clone)]
pub struct ProgressTracker {
    reporter: Arc<dyn ProgressReporter>,
    start_time: Instant,
    high_water: Arc<AtomicU32>,
}

impl ProgressTracker {
    pub fn new(reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            reporter,
            start_time: Instant::now(),
            high_water: Arc::new(AtomicU32::new(0.0f32.to_bits())),
        }
    }

    /// Tracker that reports nothing
    #[must_use]
    pub fn silent() -> Self {
        Self::new(Arc::new(NoOpProgressReporter))
    }

    /// Report a stage at its fixed progress value
    pub fn report_stage(&self, stage: ProcessingStage) {
        self.report(stage, stage.progress());
    }

    /// Report an explicit progress value for a stage
    pub fn report(&self, stage: ProcessingStage, progress: f32) {
        let progress = progress.clamp(0.0, 1.0);
        let advanced = self
            .high_water
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                (progress > f32::from_bits(bits)).then_some(progress.to_bits())
            })
            .is_ok();

        if advanced {
            self.reporter
                .report_progress(ProgressUpdate::new(stage, progress, self.start_time));
        }
    }

    /// Highest progress forwarded so far
    #[must_use]
    pub fn current(&self) -> f32 {
        f32::from_bits(self.high_water.load(Ordering::SeqCst))
    }

    /// Stage the tracked call has reached
    #[must_use]
    pub fn current_stage(&self) -> ProcessingStage {
        ProcessingStage::at_progress(self.current())
    }

    pub fn report_completion(&self, timings: &ProcessingTimings) {
        self.reporter.report_completion(timings);
    }

    pub fn report_error(&self, stage: ProcessingStage, error: &str) {
        self.reporter.report_error(stage, error);
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}
