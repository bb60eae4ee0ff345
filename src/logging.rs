//! Tracing subscriber setup for host applications.
//!
//! Diagnostic output goes to stderr. When file logging is enabled, records
//! are also written to daily-rotated files named `hearth.YYYY-MM-DD.log`,
//! keeping at most [`LoggingConfig::max_files`] files.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;
use crate::error::{HearthError, Result};

/// Build the filter: `RUST_LOG` wins, otherwise the configured directive.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter))
}

/// Install the global subscriber.
///
/// Returns the appender guard when file logging is enabled; keep it alive
/// for the life of the process so buffered records are flushed.
///
/// # Errors
///
/// Returns [`HearthError::ConfigValidation`] if a subscriber is already
/// installed or the log directory cannot be used.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if !config.file {
        tracing_subscriber::registry()
            .with(env_filter(config))
            .with(stderr_layer)
            .try_init()
            .map_err(|e| HearthError::ConfigValidation(format!("tracing already initialised: {e}")))?;
        return Ok(None);
    }

    let dir = config.dir.clone().unwrap_or_else(crate::hearth_dirs::logs_dir);
    std::fs::create_dir_all(&dir)?;
    let appender = Builder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix("hearth")
        .filename_suffix("log")
        .max_log_files(config.max_files.max(1))
        .build(&dir)
        .map_err(|e| {
            HearthError::ConfigValidation(format!(
                "cannot open log directory '{}': {e}",
                dir.display()
            ))
        })?;
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer);

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| HearthError::ConfigValidation(format!("tracing already initialised: {e}")))?;

    tracing::info!(dir = %dir.display(), "file logging enabled");
    Ok(Some(guard))
}
