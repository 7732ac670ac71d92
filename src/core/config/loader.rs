#![allow(clippy::result_large_err)]

use super::{ConfigValidator, ProcflowConfig};
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use std::env;
use std::path::Path;

pub const ENV_MAX_LOOP_ITERATIONS: &str = "PROCFLOW_MAX_LOOP_ITERATIONS";
pub const ENV_MAX_WAIT: &str = "PROCFLOW_MAX_WAIT";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load config with precedence: defaults, then the optional file, then env overrides.
    /// A path that does not exist falls back to defaults.
    pub fn load(path: Option<&Path>) -> Result<ProcflowConfig, AppError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?.unwrap_or_default(),
            None => ProcflowConfig::default(),
        };

        Self::apply_env_overrides(&mut config);
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Load config from specific file path
    /// Returns Ok(None) if file doesn't exist
    pub fn load_from_file(path: &Path) -> Result<Option<ProcflowConfig>, AppError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::new(
                ErrorCategory::IoError,
                format!("Failed to read config file {}: {}", path.display(), e),
            )
        })?;

        let config: ProcflowConfig = toml::from_str(&content).map_err(|e| {
            AppError::new(
                ErrorCategory::ConfigurationError,
                format!("Failed to parse config file {}: {}", path.display(), e),
            )
            .with_code("PFX-CFG-001")
        })?;

        Ok(Some(config))
    }

    /// Environment variables take precedence over config file values.
    /// Values that fail to parse are ignored.
    fn apply_env_overrides(config: &mut ProcflowConfig) {
        if let Ok(raw) = env::var(ENV_MAX_LOOP_ITERATIONS) {
            if let Ok(limit) = raw.trim().parse::<usize>() {
                config.engine.max_loop_iterations = limit;
            }
        }

        if let Ok(raw) = env::var(ENV_MAX_WAIT) {
            if let Ok(max_wait) = humantime::parse_duration(raw.trim()) {
                config.engine.max_wait = Some(max_wait);
            }
        }
    }

    /// Get documentation for supported environment variables
    pub fn env_var_documentation() -> &'static [&'static str] {
        &[
            "PROCFLOW_MAX_LOOP_ITERATIONS - Override the loop iteration cap (default: 10000)",
            "PROCFLOW_MAX_WAIT - Clamp every wait activity to this duration, e.g. 5m",
            "PROCFLOW_LOG_LEVEL - Override the default tracing level (default: info)",
            "PROCFLOW_LOG_FORMAT - Console log format: text or json",
        ]
    }
}
