//! `nobg` command-line tool
//!
//! Removes the background from one image and writes the result next to the
//! input (or to `--output`), optionally copying it to the clipboard.

use super::config::CliConfigBuilder;
use crate::{
    backends::backend_info,
    inference::DefaultBackendFactory,
    orchestrator::{Orchestrator, ProcessingState},
    processor::BackgroundRemover,
    services::{
        export::{download_trigger, export_image, ExportOptions, FileDownloadSink},
        progress::{ProcessingStage, ProgressReporter, ProgressUpdate},
    },
    tracing_config::init_cli_tracing,
    types::ImageBlob,
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Remove image backgrounds on this machine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "nobg")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image (PNG, JPEG, WebP or GIF)
    #[arg(
        value_name = "INPUT",
        required_unless_present_any = ["show_backends", "cache_info", "clear_cache", "preload"]
    )]
    pub input: Option<PathBuf>,

    /// Output file [default: <input dir>/<name>-nobg.<ext>]
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = CliOutputFormat::Png)]
    pub format: CliOutputFormat,

    /// JPEG quality (0-100)
    #[arg(short, long, default_value_t = 90)]
    pub quality: u8,

    /// Foreground threshold (0.0-1.0); lower removes more background
    #[arg(short, long, default_value_t = 0.5)]
    pub threshold: f32,

    /// Also copy the result to the clipboard as PNG
    #[arg(long)]
    pub clipboard: bool,

    /// Directory holding model.onnx and preprocessor_config.json
    #[arg(long, value_name = "DIR", conflicts_with = "model_url")]
    pub model_dir: Option<PathBuf>,

    /// Model URL (HTTP or HTTPS)
    #[arg(long, value_name = "URL")]
    pub model_url: Option<String>,

    /// Expected model version; a cached model with another version is re-fetched
    #[arg(long, value_name = "VERSION")]
    pub model_version: Option<String>,

    /// Model cache directory [env: NOBG_CACHE_DIR]
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Do not read or write the model cache
    #[arg(long)]
    pub no_cache: bool,

    /// Force a backend (webgpu, webgl, cpu) instead of detecting one
    #[arg(long, value_name = "BACKEND")]
    pub backend: Option<String>,

    /// Inference engine (onnx, tract)
    #[arg(long, value_name = "ENGINE")]
    pub engine: Option<String>,

    /// Number of threads (0 = auto)
    #[arg(long, default_value_t = 0)]
    pub threads: usize,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Show backend support and exit
    #[arg(long)]
    pub show_backends: bool,

    /// Show model cache status and exit
    #[arg(long)]
    pub cache_info: bool,

    /// Delete the cached model and exit
    #[arg(long)]
    pub clear_cache: bool,

    /// Download and initialize the model, then exit
    #[arg(long)]
    pub preload: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliOutputFormat {
    Png,
    Jpeg,
    Webp,
}

/// Run the CLI
///
/// # Errors
/// - Invalid arguments or configuration
/// - Any pipeline failure
pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _tracing = init_cli_tracing(cli.verbose).context("Failed to initialize tracing")?;

    if cli.show_backends {
        show_backends();
        return Ok(());
    }

    let config = CliConfigBuilder::from_cli(&cli)?;
    let remover = Arc::new(BackgroundRemover::new(config).context("Failed to create remover")?);

    if cli.cache_info {
        show_cache_info(&remover);
        return Ok(());
    }

    if cli.clear_cache {
        if remover.clear_model_cache() {
            println!("🗑️  Model cache cleared");
        } else {
            warn!("Model cache could not be cleared");
        }
        return Ok(());
    }

    if cli.preload {
        let bar = progress_bar();
        let reporter: Arc<dyn ProgressReporter> = Arc::new(BarReporter(bar.clone()));
        let outcome = remover.preload(Some(reporter)).await;
        bar.finish_and_clear();
        outcome.context("Failed to load model")?;
        println!("✅ Model ready ({})", describe_backend(&remover));
        return Ok(());
    }

    let input = cli
        .input
        .as_deref()
        .context("An input image is required")?;
    process(&cli, input, remover).await
}

async fn process(cli: &Cli, input: &Path, remover: Arc<BackgroundRemover>) -> Result<()> {
    let blob = ImageBlob::from_path(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let export_options = remover.config().export.clone();

    let orchestrator = Orchestrator::new(remover);
    let bar = progress_bar();
    let watcher = tokio::spawn(track_state(orchestrator.subscribe(), bar.clone()));

    let ctrl_c = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                orchestrator.cancel();
            }
        })
    };

    let outcome = orchestrator.submit(blob).await;
    ctrl_c.abort();
    watcher.abort();
    bar.finish_and_clear();

    let processed = match outcome {
        Ok(processed) => processed,
        Err(e) if e.is_cancellation() => {
            println!("Cancelled");
            return Ok(());
        },
        Err(e) => return Err(e).context("Background removal failed"),
    };

    if let ProcessingState::Complete {
        processing_time_ms, ..
    } = orchestrator.state()
    {
        info!(
            "Processed {}x{} in {}ms",
            processed.width, processed.height, processing_time_ms
        );
    }

    let options = ExportOptions {
        filename: input.file_name().map(|name| name.to_string_lossy().into_owned()),
        ..export_options
    };
    let exported = export_image(&processed.blob, &options).context("Export failed")?;

    let (dir, filename) = output_target(cli.output.as_deref(), input, &exported.filename);
    let path = download_trigger(&FileDownloadSink::new(dir), &exported.blob, &filename)
        .context("Failed to save result")?;
    println!("✅ {}", path.display());

    if cli.clipboard {
        copy_result(&exported.blob)?;
        println!("📋 Copied to clipboard");
    }

    Ok(())
}

/// Directory and file name the result is written to
fn output_target(output: Option<&Path>, input: &Path, generated: &str) -> (PathBuf, String) {
    let parent = |path: &Path| {
        path.parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    };

    match output {
        Some(path) if path.is_dir() => (path.to_path_buf(), generated.to_string()),
        Some(path) => match path.file_name() {
            Some(name) => (parent(path), name.to_string_lossy().into_owned()),
            None => (path.to_path_buf(), generated.to_string()),
        },
        None => (parent(input), generated.to_string()),
    }
}

#[cfg(feature = "clipboard")]
fn copy_result(blob: &ImageBlob) -> Result<()> {
    crate::services::export::copy_to_clipboard(&crate::services::export::ArboardClipboard, blob)
        .context("Clipboard copy failed")
}

#[cfg(not(feature = "clipboard"))]
fn copy_result(_blob: &ImageBlob) -> Result<()> {
    anyhow::bail!("Clipboard support not compiled in; rebuild with --features clipboard")
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
    {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar
}

async fn track_state(mut rx: tokio::sync::watch::Receiver<ProcessingState>, bar: ProgressBar) {
    while rx.changed().await.is_ok() {
        let state = rx.borrow_and_update().clone();
        match state {
            ProcessingState::Loading { progress } => {
                bar.set_message("Loading model");
                bar.set_position(percent(progress));
            },
            ProcessingState::Processing { progress } => {
                bar.set_message("Processing");
                bar.set_position(percent(progress));
            },
            ProcessingState::Complete { .. } => bar.set_position(100),
            ProcessingState::Idle | ProcessingState::Error { .. } => {},
        }
    }
}

fn percent(progress: f32) -> u64 {
    (progress.clamp(0.0, 1.0) * 100.0).round() as u64
}

/// Progress reporter driving a bar directly (used without an orchestrator)
struct BarReporter(ProgressBar);

impl ProgressReporter for BarReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        self.0.set_message(update.description.clone());
        self.0.set_position(u64::from(update.percent()));
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        self.0.abandon_with_message(format!("{} failed: {error}", stage.description()));
    }
}

fn describe_backend(remover: &BackgroundRemover) -> String {
    remover
        .active_backend()
        .map_or_else(|| "no backend".to_string(), |backend| backend.to_string())
}

fn show_backends() {
    println!("🔍 Backend support");
    for info in backend_info() {
        let status = if info.supported { "✅" } else { "❌" };
        println!("  {status} {}", info.backend);
    }

    println!("\n🔧 Inference engines");
    for engine in DefaultBackendFactory::available_engines() {
        println!("  • {engine}");
    }

    #[cfg(feature = "onnx")]
    {
        println!("\n🚀 ONNX Runtime execution providers");
        for (name, available) in crate::backends::OnnxBackend::list_providers() {
            let status = if available { "✅" } else { "❌" };
            println!("  {status} {name}");
        }
    }
}

fn show_cache_info(remover: &BackgroundRemover) {
    let info = remover.cache_info();
    println!("📦 Model cache");
    match &info.location {
        Some(location) => println!("  Location: {}", location.display()),
        None => println!("  Location: disabled"),
    }
    println!("  Expected version: {}", info.expected_version);
    match (&info.stored_version, info.size_bytes, info.timestamp) {
        (Some(version), Some(size), Some(timestamp)) => {
            let state = if info.cached { "current" } else { "stale" };
            println!(
                "  Stored: v{version} ({:.1} MB, {}) [{state}]",
                size as f64 / (1024.0 * 1024.0),
                timestamp.format("%Y-%m-%d %H:%M:%S UTC")
            );
        },
        _ => println!("  Stored: nothing"),
    }
}
