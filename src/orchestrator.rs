//! Processing state machine
//!
//! The orchestrator drives one image at a time through validation and the
//! [`BackgroundRemover`], publishing every transition on a `watch` channel.
//! Each submit or reprocess starts a new generation: the previous call's
//! token is cancelled and its late results are discarded, so at most one
//! call ever writes state.
//!
//! ```text
//! idle ──submit──▶ loading ──0.7──▶ processing ──▶ complete
//!   ▲                 │                  │     └──▶ error
//!   └──cancel/reset───┴──────────────────┘
//! ```

use crate::{
    error::{BgRemovalError, Result},
    processor::{BackgroundRemover, RemovalOptions},
    services::progress::{ProgressReporter, ProgressUpdate, MODEL_READY},
    types::{ImageBlob, RemovalResult},
    utils::validation::{validate_image, NumericValidator},
};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info as trace_info, instrument};

/// An image owned by the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct ImageResource {
    pub blob: ImageBlob,
    pub width: u32,
    pub height: u32,
}

impl ImageResource {
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Observable state of the orchestrator
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ProcessingState {
    #[default]
    Idle,
    /// Validating input or acquiring the model
    Loading { progress: f32 },
    /// Model ready, image in flight
    Processing { progress: f32 },
    Complete {
        original: Arc<ImageResource>,
        processed: Arc<ImageResource>,
        processing_time_ms: u64,
    },
    Error { message: String },
}

impl ProcessingState {
    /// Progress state for a fraction, switching to `Processing` once the model is ready
    #[must_use]
    pub fn from_progress(progress: f32) -> Self {
        if progress >= MODEL_READY {
            ProcessingState::Processing { progress }
        } else {
            ProcessingState::Loading { progress }
        }
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            ProcessingState::Loading { .. } | ProcessingState::Processing { .. }
        )
    }

    #[must_use]
    pub fn progress(&self) -> Option<f32> {
        match self {
            ProcessingState::Loading { progress } | ProcessingState::Processing { progress } => {
                Some(*progress)
            },
            ProcessingState::Complete { .. } => Some(1.0),
            _ => None,
        }
    }
}

struct Control {
    generation: u64,
    cancel: CancellationToken,
    original: Option<Arc<ImageResource>>,
    threshold: f32,
}

struct Shared {
    remover: Arc<BackgroundRemover>,
    state: watch::Sender<ProcessingState>,
    control: Mutex<Control>,
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Control> {
        match self.control.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Apply a state change only while `generation` is still current
    fn commit(&self, generation: u64, state: ProcessingState) -> bool {
        let control = self.control();
        if control.generation != generation {
            return false;
        }
        self.state.send_replace(state);
        true
    }
}

/// Forwards compositor progress into the state channel
struct StateReporter {
    shared: Arc<Shared>,
    generation: u64,
}

impl ProgressReporter for StateReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        // Completion is published with the result, not as progress
        if update.progress < 1.0 {
            self.shared
                .commit(self.generation, ProcessingState::from_progress(update.progress));
        }
    }
}

/// Single-image processing state machine
///
/// Cloning yields another handle to the same machine. Several orchestrators
/// can share one [`BackgroundRemover`] and therefore one model.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Release the watch guard before taking the control lock
        let state = self.shared.state.borrow().clone();
        let generation = self.shared.control().generation;
        f.debug_struct("Orchestrator")
            .field("state", &state)
            .field("generation", &generation)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(remover: Arc<BackgroundRemover>) -> Self {
        let threshold = remover.config().threshold;
        let (state, _) = watch::channel(ProcessingState::Idle);
        Self {
            shared: Arc::new(Shared {
                remover,
                state,
                control: Mutex::new(Control {
                    generation: 0,
                    cancel: CancellationToken::new(),
                    original: None,
                    threshold,
                }),
            }),
        }
    }

    #[must_use]
    pub fn remover(&self) -> &Arc<BackgroundRemover> {
        &self.shared.remover
    }

    /// Snapshot of the current state
    #[must_use]
    pub fn state(&self) -> ProcessingState {
        self.shared.state.borrow().clone()
    }

    /// Receiver observing every state transition
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ProcessingState> {
        self.shared.state.subscribe()
    }

    /// Input retained for reprocessing, if any
    #[must_use]
    pub fn original(&self) -> Option<Arc<ImageResource>> {
        self.shared.control().original.clone()
    }

    /// Validate and process a new image
    ///
    /// Any in-flight call is cancelled first. Returns the processed image.
    ///
    /// # Errors
    /// - `Validation` when the input is rejected (state becomes `Error`)
    /// - `Cancelled` when superseded or cancelled (state untouched by this call)
    /// - Any compositor failure (state becomes `Error`)
    #[instrument(skip(self, blob), fields(bytes = blob.len()))]
    pub async fn submit(&self, blob: ImageBlob) -> Result<Arc<ImageResource>> {
        let (generation, cancel, threshold) = self.begin(None);

        let input = blob.clone();
        let validation = tokio::task::spawn_blocking(move || validate_image(&input))
            .await
            .map_err(|e| BgRemovalError::internal(format!("Validation task failed: {e}")))?;

        if cancel.is_cancelled() {
            return Err(BgRemovalError::Cancelled);
        }

        for warning in &validation.warnings {
            log::warn!("⚠️ {}", warning);
        }

        let dimensions = match validation.dimensions {
            Some(dimensions) if validation.valid => dimensions,
            _ => {
                let message = validation
                    .error
                    .unwrap_or_else(|| crate::utils::validation::UNSUPPORTED_FORMAT_MESSAGE.to_string());
                self.shared.commit(
                    generation,
                    ProcessingState::Error {
                        message: message.clone(),
                    },
                );
                return Err(BgRemovalError::validation(message));
            },
        };

        let original = Arc::new(ImageResource {
            blob,
            width: dimensions.width,
            height: dimensions.height,
        });
        {
            let mut control = self.shared.control();
            if control.generation != generation {
                return Err(BgRemovalError::Cancelled);
            }
            control.original = Some(Arc::clone(&original));
        }

        self.run(generation, cancel, original, threshold).await
    }

    /// Process the retained original again with a new threshold
    ///
    /// Skips validation and model loading and enters `Processing` directly.
    ///
    /// # Errors
    /// - `InvalidConfig` when no original is retained or the threshold is out of range
    /// - Same as [`Orchestrator::submit`] otherwise
    #[instrument(skip(self))]
    pub async fn reprocess(&self, threshold: f32) -> Result<Arc<ImageResource>> {
        let threshold = NumericValidator::validate_threshold(threshold)?;
        let Some(original) = self.original() else {
            return Err(BgRemovalError::invalid_config(
                "No image to reprocess; submit one first",
            ));
        };

        let (generation, cancel, threshold) = self.begin(Some(threshold));
        self.run(generation, cancel, original, threshold).await
    }

    /// Abort the in-flight call and return to `Idle`
    ///
    /// No-op unless loading or processing. The retained original survives.
    pub fn cancel(&self) {
        let mut control = self.shared.control();
        if !self.shared.state.borrow().is_busy() {
            return;
        }
        control.cancel.cancel();
        control.generation += 1;
        self.shared.state.send_replace(ProcessingState::Idle);
        log::info!("Processing cancelled");
    }

    /// Cancel anything in flight, drop all images and return to `Idle`
    pub fn reset(&self) {
        let mut control = self.shared.control();
        control.cancel.cancel();
        control.generation += 1;
        control.original = None;
        control.threshold = self.shared.remover.config().threshold;
        self.shared.state.send_replace(ProcessingState::Idle);
        log::debug!("Orchestrator reset");
    }

    /// Start a new generation: cancel the previous call and publish the entry state
    fn begin(&self, reprocess_threshold: Option<f32>) -> (u64, CancellationToken, f32) {
        let mut control = self.shared.control();
        control.cancel.cancel();
        control.generation += 1;
        control.cancel = CancellationToken::new();

        let entry = match reprocess_threshold {
            Some(threshold) => {
                control.threshold = threshold;
                ProcessingState::Processing {
                    progress: MODEL_READY,
                }
            },
            None => {
                control.original = None;
                ProcessingState::Loading { progress: 0.0 }
            },
        };
        self.shared.state.send_replace(entry);

        (control.generation, control.cancel.clone(), control.threshold)
    }

    async fn run(
        &self,
        generation: u64,
        cancel: CancellationToken,
        original: Arc<ImageResource>,
        threshold: f32,
    ) -> Result<Arc<ImageResource>> {
        let reporter = Arc::new(StateReporter {
            shared: Arc::clone(&self.shared),
            generation,
        });
        let options = RemovalOptions::default()
            .with_threshold(threshold)
            .with_cancel(cancel)
            .with_progress(reporter);

        let outcome = self
            .shared
            .remover
            .remove_background(&original.blob, options)
            .await;

        match outcome {
            Ok(result) => self.complete(generation, original, result),
            Err(e) if e.is_cancellation() => Err(BgRemovalError::Cancelled),
            Err(e) => {
                if !self.shared.commit(
                    generation,
                    ProcessingState::Error {
                        message: e.user_message().to_string(),
                    },
                ) {
                    return Err(BgRemovalError::Cancelled);
                }
                log::error!("❌ Processing failed: {}", e);
                Err(e)
            },
        }
    }

    fn complete(
        &self,
        generation: u64,
        original: Arc<ImageResource>,
        result: RemovalResult,
    ) -> Result<Arc<ImageResource>> {
        let processing_time_ms = result.processing_time_ms;
        let processed = Arc::new(ImageResource {
            width: result.width,
            height: result.height,
            blob: result.to_blob(),
        });

        let committed = self.shared.commit(
            generation,
            ProcessingState::Complete {
                original,
                processed: Arc::clone(&processed),
                processing_time_ms,
            },
        );
        if !committed {
            return Err(BgRemovalError::Cancelled);
        }

        trace_info!(
            width = processed.width,
            height = processed.height,
            processing_time_ms,
            backend = %result.backend,
            "✅ Processing complete"
        );
        Ok(processed)
    }
}
