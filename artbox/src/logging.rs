//! Tracing subscriber setup for the CLI.

use artbox_shared::{ArtboxError, ArtboxResult};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE_NAME: &str = "artbox.log";

#[derive(Debug, Clone, Default)]
pub struct LoggingOptions {
    /// Directory for a debug-level log file. Console only when unset.
    pub log_dir: Option<PathBuf>,
    /// Console filter used when `RUST_LOG` is unset.
    pub default_filter: Option<String>,
    pub ansi: bool,
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process.
pub fn init_logging(options: &LoggingOptions) -> ArtboxResult<Option<WorkerGuard>> {
    let default_filter = options.default_filter.as_deref().unwrap_or("info");
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let console = fmt::layer()
        .with_target(false)
        .with_ansi(options.ansi)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let (file, guard) = match &options.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                ArtboxError::Config(format!(
                    "Failed to create log directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
            let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| ArtboxError::Internal(format!("Failed to install logger: {}", e)))?;

    Ok(guard)
}
