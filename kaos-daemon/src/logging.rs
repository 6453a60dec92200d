//! Logging setup
//!
//! Console output filtered by `RUST_LOG` or `host.log_level`, plus a
//! daily-rotating log file with its own level. Only the newest
//! `host.log_retention` files are kept.

use crate::config::HostConfig;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log files are named `kaos.<date>.log`.
pub const LOG_FILE_PREFIX: &str = "kaos";

/// Returns `$XDG_DATA_HOME/kaos/logs`
pub fn default_log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "kaos").map(|dirs| dirs.data_dir().join("logs"))
}

/// Daily log file appender in `dir` keeping at most `retention` files.
pub fn file_appender(dir: &Path, retention: usize) -> Result<RollingFileAppender> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(retention)
        .build(dir)
        .with_context(|| format!("Failed to open log file in {}", dir.display()))
}

/// Install the global subscriber.
///
/// Hold the returned guard until exit so buffered file lines get flushed.
pub fn init(config: &HostConfig) -> Result<Option<WorkerGuard>> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let console = fmt::layer().with_target(true).with_filter(console_filter);

    let (file, guard) = if config.log_to_file {
        let dir = match &config.log_dir {
            Some(dir) => dir.clone(),
            None => default_log_dir().context("Failed to determine log directory")?,
        };
        let (writer, guard) =
            tracing_appender::non_blocking(file_appender(&dir, config.log_retention)?);
        let layer = fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(writer)
            .with_filter(EnvFilter::new(&config.file_log_level));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .context("Failed to install log subscriber")?;
    Ok(guard)
}
