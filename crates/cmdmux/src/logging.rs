//! Tracing setup
//!
//! - Console: colored, compact
//! - File (optional): daily rotation, e.g. `~/.local/share/cmdmux/logs/cmdmux.2026-01-22.log`
//!
//! `RUST_LOG` takes precedence over the default filter.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
/// Crate names use underscores in tracing targets.
pub const DEFAULT_FILTER: &str = "info,cmdmux=debug,cmdmux_core=debug,cmdmux_mcp=debug";

pub const LOG_FILE_PREFIX: &str = "cmdmux";

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log to stderr
    pub console: bool,
    /// Directory for rolling log files; no file logging when None
    pub file_dir: Option<PathBuf>,
    pub default_filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console: true,
            file_dir: None,
            default_filter: DEFAULT_FILTER.to_string(),
        }
    }
}

impl LogConfig {
    /// Console plus files under [`default_logs_dir`]
    pub fn with_default_file() -> Self {
        Self {
            file_dir: Some(default_logs_dir()),
            ..Default::default()
        }
    }
}

/// `<data_local_dir>/cmdmux/logs`, falling back to `./cmdmux/logs`
pub fn default_logs_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cmdmux")
        .join("logs")
}

/// Build the filter: `RUST_LOG` if set and valid, otherwise `default_filter`
pub fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Install the global subscriber.
///
/// Returns the file writer guard when file logging is enabled; it must be
/// kept alive for as long as logs should be flushed.
pub fn init_tracing(config: LogConfig) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match &config.file_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(LOG_FILE_PREFIX)
                .filename_suffix("log")
                .build(dir)
                .context("failed to create log file appender")?;
            let (writer, guard) = tracing_appender::non_blocking(appender);

            // File layer: no colors, more detail
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_file(true)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = config.console.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .compact()
            .with_line_number(false)
            .with_file(false)
            .with_target(true)
    });

    tracing_subscriber::registry()
        .with(env_filter(&config.default_filter))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(guard)
}
