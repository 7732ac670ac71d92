pub mod config;
pub mod layers;

pub use config::LoggingConfig;
pub use layers::console::{ConsoleOutput, LogFormat};

use crate::logging::layers::{console, file, BoxLayer};
use crate::Result;
use anyhow::{anyhow, Context};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::Registry;

static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Guards that keep logging sinks active for the duration of the command.
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
    console_output: ConsoleOutput,
    log_file_path: Option<PathBuf>,
}

impl LoggingGuard {
    /// Returns the console output configuration used during initialization.
    pub fn console_output(&self) -> ConsoleOutput {
        self.console_output
    }

    /// Log file written by the file sink, when enabled.
    pub fn log_file_path(&self) -> Option<&Path> {
        self.log_file_path.as_deref()
    }
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.default_level`. Relative log directories are
/// resolved against `base_dir`. Errors when invoked more than once per process.
pub fn init(config: &LoggingConfig, base_dir: &Path) -> Result<LoggingGuard> {
    if LOGGER_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(anyhow!("logging already initialized"));
    }

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_level))
        .context("failed to configure tracing level")?;

    let mut sinks: Vec<BoxLayer<Registry>> = Vec::new();
    let mut file_guard = None;
    let mut log_file_path = None;
    if config.enable_file {
        let path = file::log_file_path(config, base_dir);
        let (layer, guard) = file::file_layer::<Registry>(&path, config.format)?;
        sinks.push(layer);
        file_guard = Some(guard);
        log_file_path = Some(path);
    }
    sinks.push(console::console_layer::<Registry>(
        config.console_output,
        config.format,
    ));

    tracing_subscriber::registry()
        .with(sinks)
        .with(env_filter)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
        console_output: config.console_output,
        log_file_path,
    })
}
