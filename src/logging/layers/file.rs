use super::console::{fmt_layer, LogFormat};
use super::BoxLayer;
use crate::logging::config::LoggingConfig;
use crate::Result;
use anyhow::{anyhow, Context};
use std::fs::{create_dir_all, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::registry::LookupSpan;

const LOG_FILE_NAME: &str = "procflow.log";

/// Resolve the log file location. Relative `log_dir` values are anchored at
/// `base_dir` (the config file's directory, or the working directory).
pub fn log_file_path(config: &LoggingConfig, base_dir: &Path) -> PathBuf {
    let directory = match &config.log_dir {
        Some(custom) if custom.is_absolute() => custom.clone(),
        Some(custom) => base_dir.join(custom),
        None => base_dir.join(".procflow").join("logs"),
    };
    directory.join(LOG_FILE_NAME)
}

/// Build a tracing layer that writes to `log_file` via a non-blocking writer.
pub fn file_layer<S>(log_file: &Path, format: LogFormat) -> Result<(BoxLayer<S>, WorkerGuard)>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    ensure_log_dir(log_file)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("failed to open log file {}", log_file.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let writer = BoxMakeWriter::new(move || non_blocking.clone());
    Ok((fmt_layer(writer, format), guard))
}

fn ensure_log_dir(log_file: &Path) -> Result<()> {
    let directory = log_file.parent().ok_or_else(|| {
        anyhow!(
            "log file path {} has no parent directory",
            log_file.display()
        )
    })?;
    create_dir_all(directory)
        .with_context(|| format!("failed to create log directory {}", directory.display()))?;
    Ok(())
}
