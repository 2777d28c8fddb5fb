//! CLI argument to library configuration conversion

use crate::cli::main_impl::{Cli, CliOutputFormat};
use crate::{
    config::{OutputFormat, RemovalConfig},
    models::ModelSpec,
    services::export::ExportOptions,
};
use anyhow::{Context, Result};

impl From<CliOutputFormat> for OutputFormat {
    fn from(format: CliOutputFormat) -> Self {
        match format {
            CliOutputFormat::Png => OutputFormat::Png,
            CliOutputFormat::Jpeg => OutputFormat::Jpeg,
            CliOutputFormat::Webp => OutputFormat::WebP,
        }
    }
}

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the removal configuration from parsed arguments
    pub(crate) fn from_cli(cli: &Cli) -> Result<RemovalConfig> {
        let model = match (&cli.model_dir, &cli.model_url) {
            (Some(dir), _) => ModelSpec::local(dir),
            (None, Some(url)) => ModelSpec::remote(url.clone()),
            (None, None) => ModelSpec::default(),
        };

        let mut builder = RemovalConfig::builder()
            .threshold(cli.threshold)
            .model(model)
            .disable_cache(cli.no_cache)
            .num_threads(cli.threads)
            .export(ExportOptions {
                format: cli.format.into(),
                quality: cli.quality,
                filename: None,
            });

        if let Some(dir) = &cli.cache_dir {
            builder = builder.cache_dir(dir);
        }
        if let Some(backend) = &cli.backend {
            builder = builder.backend_preference(backend.parse().context("Invalid --backend")?);
        }
        if let Some(engine) = &cli.engine {
            builder = builder.engine(engine.parse().context("Invalid --engine")?);
        }
        if let Some(version) = &cli.model_version {
            builder = builder.model_version(version.clone());
        }

        builder.build().context("Invalid configuration")
    }
}
