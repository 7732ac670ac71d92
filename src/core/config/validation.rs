#![allow(clippy::result_large_err)]

use super::ProcflowConfig;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate configuration rules
    pub fn validate(config: &ProcflowConfig) -> Result<(), AppError> {
        if config.engine.max_loop_iterations == 0 {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                "engine.max_loop_iterations must be >= 1",
            )
            .with_code("PFX-CFG-002"));
        }

        Ok(())
    }
}
