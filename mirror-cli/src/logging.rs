//! Logging setup for the command line front end

use anyhow::Result;
use std::ffi::OsStr;
use std::path::Path;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{LogRotation, LoggingConfig};

/// Default directives when `RUST_LOG` is not set
fn default_directives(level: &str) -> String {
    let level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    format!("warn,tree_mirror={0},docstore={0}", level)
}

/// Install the global subscriber.
///
/// Console output goes to stderr so reports printed on stdout stay clean.
/// The returned guard must be held until exit or buffered file lines are lost.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.level)));

    let console_layer = if config.json {
        fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .with_current_span(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .pretty()
            .boxed()
    };

    let (file_layer, guard) = if let Some(log_path) = &config.file {
        let directory = log_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = log_path.file_name().unwrap_or_else(|| OsStr::new("tree-mirror.log"));
        std::fs::create_dir_all(directory)?;

        let file_appender = match config.rotation {
            LogRotation::Daily => rolling::daily(directory, file_name),
            LogRotation::Hourly => rolling::hourly(directory, file_name),
            LogRotation::Never => rolling::never(directory, file_name),
        };

        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = fmt::layer()
            .with_writer(non_blocking)
            .json()
            .with_current_span(true)
            .with_span_list(true);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
