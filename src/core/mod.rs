pub mod config;
pub mod error;
pub mod process;
pub mod types;

pub use config::{ConfigLoader, ConfigValidator, EngineSettings, ProcflowConfig};
pub use error::AppError;
pub use types::*;
