//! Inference and mask compositing
//!
//! [`BackgroundRemover`] owns a lazily initialized model handle shared by all
//! callers. The first call detects the backend, loads the model (cache first,
//! then the configured fetcher), creates the engine session and fetches the
//! preprocessing config. Concurrent callers wait on the same initialization;
//! a failed initialization leaves the handle empty so the next call retries.

use crate::{
    backends::{detect_best_backend, Backend, BackendDetector},
    cache::{CacheInfo, ModelCache},
    config::{RemovalConfig, DEFAULT_THRESHOLD},
    download::DownloadProgressFn,
    error::{BgRemovalError, Result},
    inference::{BackendFactory, DefaultBackendFactory, InferenceBackend, SessionOptions},
    models::{ModelFetcher, PreprocessingConfig},
    services::progress::{
        model_load_progress, ProcessingStage, ProgressReporter, ProgressTracker,
    },
    types::{ImageBlob, ProcessingTimings, RemovalResult, SegmentationMask},
    utils::{
        mask::MaskProcessor,
        preprocessing::ImagePreprocessor,
        validation::{decode_any, NumericValidator},
    },
};
use image::{DynamicImage, ImageFormat, RgbaImage};
use instant::{Duration, Instant};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug as trace_debug, info as trace_info, instrument, span, Level};

/// Per-call options for [`BackgroundRemover::remove_background`]
#[derive(Clone)]
pub struct RemovalOptions {
    pub progress: Option<Arc<dyn ProgressReporter>>,
    pub cancel: CancellationToken,
    /// Foreground threshold in `0.0..=1.0`
    pub threshold: f32,
}

impl Default for RemovalOptions {
    fn default() -> Self {
        Self {
            progress: None,
            cancel: CancellationToken::new(),
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl RemovalOptions {
    #[must_use]
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn tracker(&self) -> ProgressTracker {
        match &self.progress {
            Some(reporter) => ProgressTracker::new(Arc::clone(reporter)),
            None => ProgressTracker::silent(),
        }
    }
}

impl std::fmt::Debug for RemovalOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemovalOptions")
            .field("threshold", &self.threshold)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("has_progress", &self.progress.is_some())
            .finish()
    }
}

/// Initialized engine plus the preprocessing it expects
struct ModelHandle {
    engine: Mutex<Box<dyn InferenceBackend>>,
    engine_name: &'static str,
    preprocessing: PreprocessingConfig,
    backend: Backend,
    load_time: Duration,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("engine", &self.engine_name)
            .field("backend", &self.backend)
            .field("preprocessing", &self.preprocessing)
            .field("load_time", &self.load_time)
            .finish()
    }
}

type HandleCell = Arc<OnceCell<Arc<ModelHandle>>>;

/// Background removal pipeline with a shared, lazily loaded model
pub struct BackgroundRemover {
    config: RemovalConfig,
    factory: Arc<dyn BackendFactory>,
    fetcher: Arc<dyn ModelFetcher>,
    cache: ModelCache,
    detector: Option<Arc<BackendDetector>>,
    handle: Mutex<HandleCell>,
}

impl std::fmt::Debug for BackgroundRemover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRemover")
            .field("model", &self.fetcher.describe())
            .field("factory", &self.factory)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl BackgroundRemover {
    /// Create a remover with the default engine, fetcher and cache for `config`
    ///
    /// # Errors
    /// - Invalid configuration
    /// - HTTP client creation fails
    pub fn new(config: RemovalConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    #[must_use]
    pub fn builder(config: RemovalConfig) -> BackgroundRemoverBuilder {
        BackgroundRemoverBuilder {
            config,
            factory: None,
            fetcher: None,
            cache: None,
            detector: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RemovalConfig {
        &self.config
    }

    /// Whether the model handle is initialized
    pub fn is_ready(&self) -> bool {
        self.current_cell().initialized()
    }

    /// Backend of the initialized handle, if any
    pub fn active_backend(&self) -> Option<Backend> {
        self.current_cell().get().map(|handle| handle.backend)
    }

    /// Drop the model handle; the next call initializes from scratch
    pub fn reset(&self) {
        let mut cell = match self.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *cell = Arc::new(OnceCell::new());
        log::debug!("Model handle reset");
    }

    /// Whether the cache holds the model for the configured version
    pub fn is_model_cached(&self) -> bool {
        self.cache.is_cached()
    }

    /// Delete the cached model; returns whether the store accepted it
    pub fn clear_model_cache(&self) -> bool {
        self.cache.clear()
    }

    pub fn cache_info(&self) -> CacheInfo {
        self.cache.info()
    }

    /// Initialize the model handle without processing an image
    ///
    /// # Errors
    /// - `ModelLoad` when fetching, parsing or session creation fails
    pub async fn preload(&self, progress: Option<Arc<dyn ProgressReporter>>) -> Result<()> {
        let tracker = match progress {
            Some(reporter) => ProgressTracker::new(reporter),
            None => ProgressTracker::silent(),
        };
        let outcome = self.ensure_model(&tracker).await.map(|_| ());
        if let Err(e) = &outcome {
            Self::report_failure(&tracker, e);
        }
        outcome
    }

    /// Remove the background of an encoded image
    ///
    /// Cancellation is observed before initialization, after it and before
    /// the result is committed. Inference itself is not interrupted.
    ///
    /// # Errors
    /// - `InvalidConfig` for a threshold outside `0.0..=1.0`
    /// - `Cancelled` when the token fires at a checkpoint
    /// - `ModelLoad` when the model cannot be acquired
    /// - `Compositing` when decoding, inference or mask application fails
    #[instrument(
        skip(self, blob, options),
        fields(
            bytes = blob.len(),
            mime = %blob.mime_type(),
            threshold = options.threshold
        )
    )]
    pub async fn remove_background(
        &self,
        blob: &ImageBlob,
        options: RemovalOptions,
    ) -> Result<RemovalResult> {
        let threshold = NumericValidator::validate_threshold(options.threshold)?;
        let tracker = options.tracker();
        let outcome = self
            .process(blob, threshold, &options.cancel, &tracker)
            .await;
        if let Err(e) = &outcome {
            Self::report_failure(&tracker, e);
        }
        outcome
    }

    async fn process(
        &self,
        blob: &ImageBlob,
        threshold: f32,
        cancel: &CancellationToken,
        tracker: &ProgressTracker,
    ) -> Result<RemovalResult> {
        let total_start = Instant::now();
        let mut timings = ProcessingTimings::default();

        Self::checkpoint(cancel)?;

        let load_start = Instant::now();
        let handle = self.ensure_model(tracker).await?;
        timings.model_load_ms = load_start.elapsed().as_millis() as u64;

        Self::checkpoint(cancel)?;

        trace_info!(
            backend = %handle.backend,
            engine = handle.engine_name,
            "🎯 Starting image processing"
        );

        let bytes = blob.bytes().to_vec();
        let stage_tracker = tracker.clone();
        let preprocessing = handle.preprocessing.clone();
        let (image, input, decode_ms, preprocess_ms) = run_blocking(move || {
            stage_tracker.report_stage(ProcessingStage::ImageDecoding);
            let decode_start = Instant::now();
            let image = decode_image(&bytes)?;
            let decode_ms = decode_start.elapsed().as_millis() as u64;

            stage_tracker.report_stage(ProcessingStage::Preprocessing);
            let preprocess_start = Instant::now();
            let input = {
                let _span = span!(
                    Level::DEBUG,
                    "preprocessing",
                    width = image.width(),
                    height = image.height()
                )
                .entered();
                ImagePreprocessor::preprocess(&image, &preprocessing)?
            };
            Ok((image, input, decode_ms, preprocess_start.elapsed().as_millis() as u64))
        })
        .await
        .map_err(BgRemovalError::into_compositing)?;
        timings.image_decode_ms = decode_ms;
        timings.preprocessing_ms = preprocess_ms;

        tracker.report_stage(ProcessingStage::Inference);
        let inference_start = Instant::now();
        let engine_handle = Arc::clone(&handle);
        let tensor = input.tensor;
        let output = run_blocking(move || {
            let _span = span!(Level::INFO, "inference", engine = engine_handle.engine_name).entered();
            let mut engine = engine_handle
                .engine
                .lock()
                .map_err(|_| BgRemovalError::internal("Inference engine lock poisoned"))?;
            engine.infer(&tensor)
        })
        .await
        .map_err(BgRemovalError::into_compositing)?;
        timings.inference_ms = inference_start.elapsed().as_millis() as u64;

        Self::checkpoint(cancel)?;

        tracker.report_stage(ProcessingStage::MaskGeneration);
        let postprocess_start = Instant::now();
        let content = input.content;
        let original_size = input.original_size;
        let (output_bytes, encode_ms, statistics) = run_blocking(move || {
            let _span = span!(
                Level::DEBUG,
                "background_removal",
                width = original_size.0,
                height = original_size.1
            )
            .entered();
            let mask = MaskProcessor::threshold_logits(&output, threshold)?;
            let mask = MaskProcessor::restore(&mask, content, original_size)?;
            let statistics = mask.statistics();
            let composited = composite(image, &mask)?;

            let encode_start = Instant::now();
            let output_bytes = encode_png(&composited)?;
            Ok((output_bytes, encode_start.elapsed().as_millis() as u64, statistics))
        })
        .await
        .map_err(BgRemovalError::into_compositing)?;
        timings.image_encode_ms = encode_ms;
        timings.postprocessing_ms =
            (postprocess_start.elapsed().as_millis() as u64).saturating_sub(encode_ms);
        timings.total_ms = total_start.elapsed().as_millis() as u64;

        trace_debug!(
            foreground_ratio = statistics.foreground_ratio,
            "Mask applied"
        );

        tracker.report_stage(ProcessingStage::Completed);
        tracker.report_completion(&timings);
        log::info!("📊 {}", timings.summary());

        Ok(RemovalResult {
            output_bytes,
            width: original_size.0,
            height: original_size.1,
            processing_time_ms: timings.total_ms,
            backend: handle.backend,
            timings,
        })
    }

    /// Tell the reporter which stage failed; cancellations are not failures
    fn report_failure(tracker: &ProgressTracker, error: &BgRemovalError) {
        if !error.is_cancellation() {
            tracker.report_error(tracker.current_stage(), &error.to_string());
        }
    }

    fn checkpoint(cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            Err(BgRemovalError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn current_cell(&self) -> HandleCell {
        match self.handle.lock() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    async fn ensure_model(&self, tracker: &ProgressTracker) -> Result<Arc<ModelHandle>> {
        let cell = self.current_cell();
        let handle = cell
            .get_or_try_init(|| self.initialize(tracker.clone()))
            .await?;
        tracker.report_stage(ProcessingStage::ModelReady);
        Ok(Arc::clone(handle))
    }

    #[instrument(skip(self, tracker), fields(model = %self.fetcher.describe()))]
    async fn initialize(&self, tracker: ProgressTracker) -> Result<Arc<ModelHandle>> {
        let backend = self.resolve_backend().await?;
        tracker.report_stage(ProcessingStage::ModelDownload);

        let model_bytes = self.load_model_bytes(&tracker).await?;
        tracker.report_stage(ProcessingStage::ModelLoaded);

        let (engine, backend, load_time) = self.create_session(model_bytes, backend).await?;

        let preprocessing = self
            .fetcher
            .fetch_preprocessor_config()
            .await
            .map_err(BgRemovalError::into_model_load)?;
        tracker.report_stage(ProcessingStage::ModelReady);

        trace_info!(
            backend = %backend,
            engine = engine.name(),
            load_ms = load_time.as_millis() as u64,
            "✅ Model ready"
        );

        Ok(Arc::new(ModelHandle {
            engine_name: engine.name(),
            engine: Mutex::new(engine),
            preprocessing,
            backend,
            load_time,
        }))
    }

    async fn resolve_backend(&self) -> Result<Backend> {
        if let Some(backend) = self.config.backend_preference {
            log::debug!("Using configured backend '{}'", backend);
            return Ok(backend);
        }

        let detector = self.detector.clone();
        run_blocking(move || {
            Ok(match detector {
                Some(detector) => detector.detect_best_backend(),
                None => detect_best_backend(),
            })
        })
        .await
    }

    async fn load_model_bytes(&self, tracker: &ProgressTracker) -> Result<Vec<u8>> {
        let cache = self.cache.clone();
        if let Some(entry) = run_blocking(move || Ok(cache.get())).await? {
            log::info!("📦 Model v{} loaded from cache", entry.version);
            return Ok(entry.payload);
        }

        let download_tracker = tracker.clone();
        let report = move |percent: f32| {
            download_tracker.report(ProcessingStage::ModelDownload, model_load_progress(percent));
        };
        let report: &DownloadProgressFn = &report;
        let bytes = self
            .fetcher
            .fetch_model(Some(report))
            .await
            .map_err(BgRemovalError::into_model_load)?;

        let cache = self.cache.clone();
        run_blocking(move || {
            cache.put(&bytes);
            Ok(bytes)
        })
        .await
    }

    async fn create_session(
        &self,
        model_bytes: Vec<u8>,
        backend: Backend,
    ) -> Result<(Box<dyn InferenceBackend>, Backend, Duration)> {
        let factory = Arc::clone(&self.factory);
        let options = SessionOptions {
            backend,
            intra_threads: self.config.intra_threads,
            inter_threads: self.config.inter_threads,
        };

        run_blocking(move || {
            let mut engine = factory.create_backend()?;
            match engine.initialize(&model_bytes, &options) {
                Ok(load_time) => Ok((engine, backend, load_time)),
                Err(e) if backend.is_accelerated() => {
                    log::warn!(
                        "⚠️ Session creation on '{}' failed ({}), retrying on CPU",
                        backend,
                        e
                    );
                    let mut engine = factory.create_backend()?;
                    let cpu = options.with_backend(Backend::Cpu);
                    let load_time = engine.initialize(&model_bytes, &cpu)?;
                    Ok((engine, Backend::Cpu, load_time))
                },
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(BgRemovalError::into_model_load)
    }
}

/// Builder injecting engine factory, model fetcher, cache and detector
pub struct BackgroundRemoverBuilder {
    config: RemovalConfig,
    factory: Option<Arc<dyn BackendFactory>>,
    fetcher: Option<Arc<dyn ModelFetcher>>,
    cache: Option<ModelCache>,
    detector: Option<Arc<BackendDetector>>,
}

impl BackgroundRemoverBuilder {
    #[must_use]
    pub fn backend_factory(mut self, factory: Arc<dyn BackendFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    #[must_use]
    pub fn model_fetcher(mut self, fetcher: Arc<dyn ModelFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    #[must_use]
    pub fn model_cache(mut self, cache: ModelCache) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn detector(mut self, detector: Arc<BackendDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// # Errors
    /// - Invalid configuration
    /// - Default fetcher cannot be created
    pub fn build(self) -> Result<BackgroundRemover> {
        self.config.validate()?;

        let factory = match self.factory {
            Some(factory) => factory,
            None => Arc::new(DefaultBackendFactory::new(self.config.engine)),
        };
        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::from(self.config.model.fetcher()?),
        };
        let cache = self.cache.unwrap_or_else(|| {
            if self.config.disable_cache {
                ModelCache::disabled(self.config.model_version.clone())
            } else {
                ModelCache::open_default(
                    self.config.cache_dir.as_deref(),
                    self.config.model_version.clone(),
                )
            }
        });

        Ok(BackgroundRemover {
            config: self.config,
            factory,
            fetcher,
            cache,
            detector: self.detector,
            handle: Mutex::new(Arc::new(OnceCell::new())),
        })
    }
}

async fn run_blocking<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| BgRemovalError::internal(format!("Blocking task failed: {e}")))?
}

fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    decode_any(bytes)
        .map_err(|e| BgRemovalError::compositing(format!("Failed to decode image: {e}")))
}

/// Original RGB with alpha taken from the mask
///
/// # Errors
/// - Mask and image dimensions differ
pub fn composite(image: DynamicImage, mask: &SegmentationMask) -> Result<RgbaImage> {
    let mut rgba = image.into_rgba8();
    mask.apply_to_image(&mut rgba)?;
    Ok(rgba)
}

/// Lossless PNG encoding
///
/// # Errors
/// - Encoder failure
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .map_err(|e| BgRemovalError::compositing(format!("Failed to encode PNG: {e}")))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::{MockBackend, MockBackendFactory};
    use crate::backends::CpuOnlyQuery;
    use crate::cache::MemoryStore;
    use async_trait::async_trait;
    use image::{GenericImageView, Rgba};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct StubFetcher {
        model_calls: AtomicUsize,
        config_calls: AtomicUsize,
        fail_model_times: AtomicUsize,
    }

    impl StubFetcher {
        fn failing_first(times: usize) -> Self {
            let fetcher = Self::default();
            fetcher.fail_model_times.store(times, Ordering::SeqCst);
            fetcher
        }
    }

    #[async_trait]
    impl ModelFetcher for StubFetcher {
        async fn fetch_model(&self, progress: Option<&DownloadProgressFn>) -> Result<Vec<u8>> {
            self.model_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.fail_model_times.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_model_times.store(remaining - 1, Ordering::SeqCst);
                return Err(BgRemovalError::network_error("Failed to download model", "offline"));
            }
            if let Some(report) = progress {
                for pct in [0.0, 50.0, 100.0] {
                    report(pct);
                }
            }
            Ok(b"mock-onnx".to_vec())
        }

        async fn fetch_preprocessor_config(&self) -> Result<PreprocessingConfig> {
            self.config_calls.fetch_add(1, Ordering::SeqCst);
            Ok(PreprocessingConfig {
                target_size: [64, 64],
                ..PreprocessingConfig::default()
            })
        }

        fn describe(&self) -> String {
            "stub".to_string()
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<f32>>);

    impl ProgressReporter for Recorder {
        fn report_progress(&self, update: crate::services::progress::ProgressUpdate) {
            self.0.lock().unwrap().push(update.progress);
        }
    }

    #[derive(Default)]
    struct FailureRecorder(Mutex<Vec<ProcessingStage>>);

    impl ProgressReporter for FailureRecorder {
        fn report_progress(&self, _update: crate::services::progress::ProgressUpdate) {}

        fn report_error(&self, stage: ProcessingStage, _error: &str) {
            self.0.lock().unwrap().push(stage);
        }
    }

    struct Harness {
        remover: Arc<BackgroundRemover>,
        mock: MockBackend,
        fetcher: Arc<StubFetcher>,
    }

    fn harness_with(mock: MockBackend, fetcher: StubFetcher, cache: ModelCache, backend: Option<Backend>) -> Harness {
        let fetcher = Arc::new(fetcher);
        let mut config = RemovalConfig::default();
        config.backend_preference = backend;
        let remover = BackgroundRemover::builder(config)
            .backend_factory(Arc::new(MockBackendFactory::new(mock.clone())))
            .model_fetcher(fetcher.clone())
            .model_cache(cache)
            .detector(Arc::new(BackendDetector::new(CpuOnlyQuery)))
            .build()
            .unwrap();
        Harness {
            remover: Arc::new(remover),
            mock,
            fetcher,
        }
    }

    fn harness() -> Harness {
        harness_with(
            MockBackend::new(),
            StubFetcher::default(),
            ModelCache::new(Some(Arc::new(MemoryStore::new())), "1"),
            None,
        )
    }

    fn png_blob(width: u32, height: u32) -> ImageBlob {
        let image = RgbaImage::from_pixel(width, height, Rgba([10, 200, 30, 255]));
        ImageBlob::new(encode_png(&image).unwrap(), "image/png")
    }

    #[tokio::test]
    async fn test_output_matches_original_resolution() {
        let h = harness();
        let result = h
            .remover
            .remove_background(&png_blob(120, 80), RemovalOptions::default())
            .await
            .unwrap();

        assert_eq!(result.dimensions(), (120, 80));
        assert_eq!(result.backend, Backend::Cpu);

        let decoded = image::load_from_memory(&result.output_bytes).unwrap();
        assert_eq!(decoded.dimensions(), (120, 80));
        let rgba = decoded.to_rgba8();
        // RGB untouched, alpha from the disc mask
        assert_eq!(rgba.get_pixel(60, 40).0, [10, 200, 30, 255]);
        assert_eq!(rgba.get_pixel(0, 0).0, [10, 200, 30, 0]);
    }

    #[tokio::test]
    async fn test_progress_sequence() {
        let h = harness();
        let recorder = Arc::new(Recorder::default());
        let options = RemovalOptions::default().with_progress(recorder.clone());
        h.remover
            .remove_background(&png_blob(32, 32), options)
            .await
            .unwrap();

        let values = recorder.0.lock().unwrap().clone();
        assert!(values.windows(2).all(|w| w[0] <= w[1]), "{values:?}");
        for expected in [0.1, 0.3, 0.5, 0.7, 0.75, 0.8, 0.9, 0.95, 1.0] {
            assert!(
                values.iter().any(|v| (v - expected).abs() < 1e-6),
                "missing {expected} in {values:?}"
            );
        }
        assert_eq!(values.last().copied(), Some(1.0));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_initialization() {
        let h = harness();
        let blob = png_blob(40, 40);

        let (a, b) = tokio::join!(
            h.remover.remove_background(&blob, RemovalOptions::default()),
            h.remover.remove_background(&blob, RemovalOptions::default())
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(h.mock.init_count(), 1);
        assert_eq!(h.fetcher.model_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_initialization_can_be_retried() {
        let h = harness_with(
            MockBackend::new(),
            StubFetcher::failing_first(1),
            ModelCache::disabled("1"),
            None,
        );

        let err = h.remover.preload(None).await.unwrap_err();
        assert!(matches!(err, BgRemovalError::ModelLoad(_)));
        assert!(!h.remover.is_ready());

        h.remover.preload(None).await.unwrap();
        assert!(h.remover.is_ready());
        assert_eq!(h.fetcher.model_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_skips_model_load() {
        let h = harness();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = h
            .remover
            .remove_background(&png_blob(20, 20), RemovalOptions::default().with_cancel(cancel))
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(h.fetcher.model_calls.load(Ordering::SeqCst), 0);
        assert!(!h.remover.is_ready());
    }

    #[tokio::test]
    async fn test_accelerated_failure_falls_back_to_cpu() {
        let h = harness_with(
            MockBackend::new().failing_accelerated(),
            StubFetcher::default(),
            ModelCache::disabled("1"),
            Some(Backend::WebGpu),
        );

        let result = h
            .remover
            .remove_background(&png_blob(20, 20), RemovalOptions::default())
            .await
            .unwrap();
        assert_eq!(result.backend, Backend::Cpu);
        assert_eq!(h.remover.active_backend(), Some(Backend::Cpu));
        let history = h.mock.get_call_history();
        assert_eq!(history[0], "initialize:webgpu");
        assert_eq!(history[1], "initialize:cpu");
    }

    #[tokio::test]
    async fn test_cache_hit_skips_download() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let first = harness_with(
            MockBackend::new(),
            StubFetcher::default(),
            ModelCache::new(Some(store.clone()), "1"),
            None,
        );
        first.remover.preload(None).await.unwrap();
        assert!(first.remover.is_model_cached());

        let recorder = Arc::new(Recorder::default());
        let second = harness_with(
            MockBackend::new(),
            StubFetcher::default(),
            ModelCache::new(Some(store), "1"),
            None,
        );
        second.remover.preload(Some(recorder.clone())).await.unwrap();

        assert_eq!(second.fetcher.model_calls.load(Ordering::SeqCst), 0);
        assert_eq!(second.fetcher.config_calls.load(Ordering::SeqCst), 1);
        // Cache hit jumps straight to the end of the load window
        assert_eq!(*recorder.0.lock().unwrap(), vec![0.1, 0.5, 0.7]);
    }

    #[tokio::test]
    async fn test_reset_forces_reinitialization() {
        let h = harness();
        h.remover.preload(None).await.unwrap();
        assert!(h.remover.is_ready());

        h.remover.reset();
        assert!(!h.remover.is_ready());
        assert_eq!(h.remover.active_backend(), None);

        h.remover.preload(None).await.unwrap();
        assert_eq!(h.mock.init_count(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_input_is_compositing_error() {
        let h = harness();
        let blob = ImageBlob::new(vec![0x89, 0x50, 0x4E, 0x47, 0, 0, 0, 0], "image/png");
        let err = h
            .remover
            .remove_background(&blob, RemovalOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BgRemovalError::Compositing(_)));
    }

    #[tokio::test]
    async fn test_failed_stage_reported() {
        let h = harness_with(
            MockBackend::new().failing_inference(),
            StubFetcher::default(),
            ModelCache::disabled("1"),
            None,
        );
        let failures = Arc::new(FailureRecorder::default());
        h.remover
            .remove_background(
                &png_blob(16, 16),
                RemovalOptions::default().with_progress(failures.clone()),
            )
            .await
            .unwrap_err();
        assert_eq!(*failures.0.lock().unwrap(), vec![ProcessingStage::Inference]);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let quiet = Arc::new(FailureRecorder::default());
        h.remover
            .remove_background(
                &png_blob(16, 16),
                RemovalOptions::default()
                    .with_cancel(cancel)
                    .with_progress(quiet.clone()),
            )
            .await
            .unwrap_err();
        assert!(quiet.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inference_failure_is_compositing_error() {
        let h = harness_with(
            MockBackend::new().failing_inference(),
            StubFetcher::default(),
            ModelCache::disabled("1"),
            None,
        );
        let err = h
            .remover
            .remove_background(&png_blob(16, 16), RemovalOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BgRemovalError::Compositing(_)));
    }

    #[tokio::test]
    async fn test_invalid_threshold_rejected() {
        let h = harness();
        let err = h
            .remover
            .remove_background(&png_blob(16, 16), RemovalOptions::default().with_threshold(2.0))
            .await
            .unwrap_err();
        assert!(matches!(err, BgRemovalError::InvalidConfig(_)));
    }

    #[test]
    fn test_composite_rejects_size_mismatch() {
        let image = DynamicImage::ImageRgba8(RgbaImage::new(4, 4));
        let mask = SegmentationMask::new(vec![255; 9], (3, 3));
        assert!(composite(image, &mask).is_err());
    }
}
