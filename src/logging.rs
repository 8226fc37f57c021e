// ABOUTME: Tracing subscriber setup for the noko binary
// ABOUTME: RUST_LOG wins over the configured level; optional JSON output and log file

use anyhow::{Context, Result};
use noko_core::config::LoggingConfig;
use noko_core::paths;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Build the filter from `RUST_LOG`, falling back to the configured level
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Where the log file goes when file logging is on
pub fn log_file(config: &LoggingConfig) -> PathBuf {
    config
        .log_file_path
        .as_deref()
        .map(|p| PathBuf::from(paths::expand_tilde(p)))
        .unwrap_or_else(|| paths::log_dir().join("noko.log"))
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the process so buffered
/// file output gets flushed.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    let stdout: BoxedLayer = if config.json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };
    layers.push(stdout);

    let guard = if config.log_to_file {
        let path = log_file(config);
        let dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "noko.log".into());

        let appender = tracing_appender::rolling::never(&dir, name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let file: BoxedLayer = if config.json {
            fmt::layer().json().with_writer(writer).boxed()
        } else {
            fmt::layer().with_ansi(false).with_writer(writer).boxed()
        };
        layers.push(file);
        Some(guard)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter(config))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
