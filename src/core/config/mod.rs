use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod loader;
pub mod validation;

pub use loader::ConfigLoader;
pub use validation::ConfigValidator;

/// Default safety cap for `while`/`repeatUntil` iterations.
pub const DEFAULT_MAX_LOOP_ITERATIONS: usize = 10_000;

/// Main configuration loaded from procflow.toml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProcflowConfig {
    /// Engine configuration
    #[serde(default)]
    pub engine: EngineSettings,
}

/// Per-engine execution policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Loops exceeding this many iterations fail with an iteration error
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: usize,

    /// Upper bound applied to every `wait` delay, e.g. "5m"
    #[serde(
        default,
        with = "optional_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_wait: Option<Duration>,
}

fn default_max_loop_iterations() -> usize {
    DEFAULT_MAX_LOOP_ITERATIONS
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            max_loop_iterations: default_max_loop_iterations(),
            max_wait: None,
        }
    }
}

impl EngineSettings {
    pub fn with_max_loop_iterations(mut self, limit: usize) -> Self {
        self.max_loop_iterations = limit;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Clamp a requested wait to the configured ceiling.
    pub fn clamp_wait(&self, requested: Duration) -> Duration {
        match self.max_wait {
            Some(limit) => requested.min(limit),
            None => requested,
        }
    }
}

mod optional_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(duration) => {
                serializer.serialize_str(&humantime::format_duration(*duration).to_string())
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|text| humantime::parse_duration(&text).map_err(serde::de::Error::custom))
            .transpose()
    }
}
