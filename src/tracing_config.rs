//! Subscriber setup for applications embedding the pipeline
//!
//! The library only emits `log` records and `tracing` events; binaries decide
//! where they go. `tracing-subscriber`'s `tracing-log` bridge picks up the
//! `log` records, so one subscriber covers both.

#[cfg(feature = "tracing-files")]
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Environment variable overriding the verbosity-derived filter
pub const FILTER_ENV: &str = "NOBG_LOG";

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingFormat {
    /// Colored compact lines for terminals
    #[default]
    Console,
    /// Plain compact lines for CI logs
    Compact,
    /// One JSON object per event
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Output destination
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TracingOutput {
    /// stderr
    #[default]
    Console,
    /// Append to a file
    #[cfg(feature = "tracing-files")]
    File(PathBuf),
}

/// Keeps background writers alive; flushes on drop
#[must_use = "dropping the guard stops file logging"]
#[derive(Debug, Default)]
pub struct TracingGuard {
    #[cfg(feature = "tracing-files")]
    _file: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Tracing subscriber configuration
#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    /// 0 = info, 1 = debug, 2+ = trace
    pub verbosity: u8,
    pub format: TracingFormat,
    pub output: TracingOutput,
    /// Explicit filter directives, taking precedence over verbosity
    pub env_filter: Option<String>,
    /// Correlation id logged once at startup
    pub session_id: Option<String>,
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: TracingOutput) -> Self {
        self.output = output;
        self
    }

    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Filter directive for the configured verbosity
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    fn filter(&self) -> anyhow::Result<EnvFilter> {
        let directives = match (&self.env_filter, std::env::var(FILTER_ENV)) {
            (Some(explicit), _) => explicit.clone(),
            (None, Ok(from_env)) if !from_env.is_empty() => from_env,
            _ => self.verbosity_to_filter().to_string(),
        };
        Ok(EnvFilter::try_new(directives)?)
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - Invalid filter directives
    /// - A global subscriber is already installed
    pub fn init(self) -> anyhow::Result<TracingGuard> {
        let registry = Registry::default().with(self.filter()?);
        #[allow(unused_mut)]
        let mut guard = TracingGuard::default();

        match &self.output {
            TracingOutput::Console => {
                let writer = std::io::stderr;
                match self.format {
                    TracingFormat::Console => registry
                        .with(fmt::layer().with_writer(writer).with_target(false).compact())
                        .try_init()?,
                    TracingFormat::Compact => registry
                        .with(
                            fmt::layer()
                                .with_writer(writer)
                                .with_ansi(false)
                                .with_target(false)
                                .compact(),
                        )
                        .try_init()?,
                    #[cfg(feature = "tracing-json")]
                    TracingFormat::Json => registry
                        .with(fmt::layer().with_writer(writer).json().with_current_span(true))
                        .try_init()?,
                }
            },
            #[cfg(feature = "tracing-files")]
            TracingOutput::File(path) => {
                let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
                let name = path
                    .file_name()
                    .unwrap_or_else(|| std::ffi::OsStr::new("nobg.log"));
                let (writer, worker) =
                    tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
                guard._file = Some(worker);

                match self.format {
                    #[cfg(feature = "tracing-json")]
                    TracingFormat::Json => registry
                        .with(fmt::layer().with_writer(writer).json().with_current_span(true))
                        .try_init()?,
                    _ => registry
                        .with(fmt::layer().with_writer(writer).with_ansi(false).compact())
                        .try_init()?,
                }
            },
        }

        if let Some(session_id) = &self.session_id {
            tracing::info!(session_id = %session_id, "🚀 nobg session started");
        }

        Ok(guard)
    }
}

/// Install a console subscriber with a fresh session id
///
/// # Errors
/// - Same as [`TracingConfig::init`]
pub fn init_cli_tracing(verbosity: u8) -> anyhow::Result<TracingGuard> {
    TracingConfig::new()
        .with_verbosity(verbosity)
        .with_session_id(uuid::Uuid::new_v4().to_string())
        .init()
}
