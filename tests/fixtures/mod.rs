//! Shared fixtures for integration tests
//!
//! A deterministic segmentation engine, a gated model fetcher, a tiny HTTP
//! file server and image builders. Nothing here touches the network or a
//! real ONNX model.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use ndarray::Array4;
use nobg::{
    download::DownloadProgressFn, Backend, BackendFactory, BackgroundRemover, BgRemovalError,
    ImageBlob, InferenceBackend, ModelCache, ModelFetcher, PreprocessingConfig, RemovalConfig,
    Result, SessionOptions,
};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

/// Model input edge used by the fixtures
pub const MODEL_EDGE: u32 = 64;
pub const MODEL_BYTES: &[u8] = b"fixture-onnx-graph";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn solid_image(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([40, 120, 200, 255]))
}

pub fn encode(image: &RgbaImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Vec::new();
    let image = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(image.clone()).to_rgb8()),
        _ => DynamicImage::ImageRgba8(image.clone()),
    };
    image.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
    bytes
}

pub fn png_blob(width: u32, height: u32) -> ImageBlob {
    ImageBlob::new(encode(&solid_image(width, height), ImageFormat::Png), "image/png")
        .with_name("fixture.png")
}

pub fn jpeg_blob(width: u32, height: u32) -> ImageBlob {
    ImageBlob::new(encode(&solid_image(width, height), ImageFormat::Jpeg), "image/jpeg")
        .with_name("fixture photo.jpg")
}

/// Engine producing a centered foreground disc
#[derive(Debug, Default)]
pub struct DiscEngine {
    initialized: bool,
    delay: Option<Duration>,
    inits: Arc<AtomicUsize>,
    inferences: Arc<AtomicUsize>,
}

impl InferenceBackend for DiscEngine {
    fn initialize(&mut self, model: &[u8], _options: &SessionOptions) -> Result<Duration> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        if model != MODEL_BYTES {
            return Err(BgRemovalError::inference("unexpected model bytes"));
        }
        self.initialized = true;
        Ok(Duration::from_millis(1))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.inferences.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let (batch, _, height, width) = input.dim();
        let (cy, cx) = (height as f32 / 2.0, width as f32 / 2.0);
        let radius = height.min(width) as f32 / 3.0;
        Ok(Array4::from_shape_fn((batch, 1, height, width), |(_, _, y, x)| {
            let (dy, dx) = (y as f32 + 0.5 - cy, x as f32 + 0.5 - cx);
            if dy.hypot(dx) <= radius {
                8.0
            } else {
                -8.0
            }
        }))
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn name(&self) -> &'static str {
        "disc"
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiscFactory {
    pub delay: Option<Duration>,
    pub inits: Arc<AtomicUsize>,
    pub inferences: Arc<AtomicUsize>,
}

impl DiscFactory {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn init_count(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }
}

impl BackendFactory for DiscFactory {
    fn create_backend(&self) -> Result<Box<dyn InferenceBackend>> {
        Ok(Box::new(DiscEngine {
            initialized: false,
            delay: self.delay,
            inits: Arc::clone(&self.inits),
            inferences: Arc::clone(&self.inferences),
        }))
    }
}

/// Fetcher serving fixed bytes, optionally blocked until permits are added
#[derive(Debug, Default)]
pub struct StubFetcher {
    pub gate: Option<Arc<Semaphore>>,
    pub model_calls: AtomicUsize,
}

impl StubFetcher {
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (
            Self {
                gate: Some(Arc::clone(&gate)),
                ..Self::default()
            },
            gate,
        )
    }

    pub fn model_calls(&self) -> usize {
        self.model_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelFetcher for StubFetcher {
    async fn fetch_model(&self, progress: Option<&DownloadProgressFn>) -> Result<Vec<u8>> {
        self.model_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(report) = progress {
            report(0.0);
        }
        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| BgRemovalError::model_load("gate closed"))?;
        }
        if let Some(report) = progress {
            report(100.0);
        }
        Ok(MODEL_BYTES.to_vec())
    }

    async fn fetch_preprocessor_config(&self) -> Result<PreprocessingConfig> {
        Ok(PreprocessingConfig {
            target_size: [MODEL_EDGE, MODEL_EDGE],
            ..PreprocessingConfig::default()
        })
    }

    fn describe(&self) -> String {
        "stub".to_string()
    }
}

pub fn cpu_config() -> RemovalConfig {
    RemovalConfig::builder()
        .backend_preference(Backend::Cpu)
        .build()
        .unwrap()
}

pub fn remover_with(
    config: RemovalConfig,
    factory: DiscFactory,
    fetcher: Arc<dyn ModelFetcher>,
    cache: ModelCache,
) -> Arc<BackgroundRemover> {
    Arc::new(
        BackgroundRemover::builder(config)
            .backend_factory(Arc::new(factory))
            .model_fetcher(fetcher)
            .model_cache(cache)
            .build()
            .unwrap(),
    )
}

pub fn remover(factory: DiscFactory, fetcher: Arc<StubFetcher>) -> Arc<BackgroundRemover> {
    remover_with(cpu_config(), factory, fetcher, ModelCache::disabled("test"))
}

/// Serve `routes` over HTTP on localhost; returns the base URL and a request counter
pub async fn serve_files(routes: Vec<(&'static str, Vec<u8>)>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&requests);
    let routes = Arc::new(routes);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let routes = Arc::clone(&routes);
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                let request = String::from_utf8_lossy(&request);
                let path = request.split_whitespace().nth(1).unwrap_or("/");
                let response = match routes.iter().find(|(route, _)| *route == path) {
                    Some((_, body)) => {
                        let mut response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            body.len()
                        )
                        .into_bytes();
                        response.extend_from_slice(body);
                        response
                    },
                    None => b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                        .to_vec(),
                };
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{addr}"), requests)
}
