//! Faults, interpreter errors and fault-handler resolution.

use crate::core::process::expression::ExpressionError;
use crate::core::process::schema::{ActivityKind, FaultHandler};
use crate::core::process::variables::{set_path, PathError, Variables};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Fault name used when an error carries no name of its own.
pub const UNHANDLED_FAULT: &str = "UnhandledFault";
pub const MISSING_ROOT_ACTIVITY: &str = "MissingRootActivity";
pub const CHILD_ACTIVITY_NOT_FOUND: &str = "ChildActivityNotFound";
pub const UNSUPPORTED_ACTIVITY_TYPE: &str = "UnsupportedActivityType";
pub const COMPENSATION_FAULT: &str = "CompensationFault";
/// Handler `faultName` that catches any fault.
pub const WILDCARD_FAULT: &str = "*";

/// Named business fault with an optional payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Fault {
    pub fn new<N: Into<String>, M: Into<String>>(name: N, message: M) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Shape bound into a handler's fault variable.
    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "message": self.message,
            "data": self.data.clone().unwrap_or(Value::Null),
        })
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// Reason an activity failed to complete.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActivityError {
    #[error("{0}")]
    Fault(Fault),
    #[error("child activity not found: {0}")]
    ChildActivityNotFound(String),
    #[error("unsupported activity type for activity {0}")]
    UnsupportedActivityType(String),
    #[error("{kind} loop {activity_id} exceeded maximum iterations ({limit})")]
    IterationLimitExceeded {
        activity_id: String,
        kind: ActivityKind,
        limit: usize,
    },
    #[error("no fault to rethrow")]
    NoFaultToRethrow,
    #[error("activity {activity_id}: {reason}")]
    InvalidActivity { activity_id: String, reason: String },
    #[error("expression error: {0}")]
    Expression(#[from] ExpressionError),
    #[error("variable error: {0}")]
    Path(#[from] PathError),
}

impl ActivityError {
    pub fn invalid<I: Into<String>, R: Into<String>>(activity_id: I, reason: R) -> Self {
        ActivityError::InvalidActivity {
            activity_id: activity_id.into(),
            reason: reason.into(),
        }
    }

    /// Name used when matching this error against fault handlers.
    pub fn fault_name(&self) -> &str {
        match self {
            ActivityError::Fault(fault) => &fault.name,
            ActivityError::ChildActivityNotFound(_) => CHILD_ACTIVITY_NOT_FOUND,
            ActivityError::UnsupportedActivityType(_) => UNSUPPORTED_ACTIVITY_TYPE,
            _ => UNHANDLED_FAULT,
        }
    }

    pub fn to_fault(&self) -> Fault {
        match self {
            ActivityError::Fault(fault) => fault.clone(),
            other => Fault::new(other.fault_name(), other.to_string()),
        }
    }
}

impl From<Fault> for ActivityError {
    fn from(fault: Fault) -> Self {
        ActivityError::Fault(fault)
    }
}

/// Pick the handler for `fault_name`: exact match first, then the wildcard.
pub fn resolve_handler<'a>(handlers: &'a [FaultHandler], fault_name: &str) -> Option<&'a FaultHandler> {
    handlers
        .iter()
        .find(|handler| handler.fault_name == fault_name)
        .or_else(|| {
            handlers
                .iter()
                .find(|handler| handler.fault_name == WILDCARD_FAULT)
        })
}

/// Bind the fault into the handler's variable, if it declares one.
pub fn bind_fault(
    variables: &mut Variables,
    handler: &FaultHandler,
    fault: &Fault,
) -> Result<(), PathError> {
    match &handler.fault_variable {
        Some(path) => set_path(variables, path, fault.to_value()),
        None => Ok(()),
    }
}
