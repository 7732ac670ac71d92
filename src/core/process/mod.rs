//! Structured-process runtime: definitions, instances, the activity
//! interpreter and the engine façade that owns them.

pub mod compensation;
pub mod condition;
pub mod engine;
pub mod expression;
pub mod fault;
pub mod interpreter;
pub mod schema;
pub mod state;
pub mod variables;

pub use compensation::CompensationStep;
pub use condition::evaluate_condition;
pub use engine::{IdGenerator, InstanceCallback, ProcessEngine, UuidGenerator};
pub use expression::{evaluate_expression, ExpressionError};
pub use fault::{ActivityError, Fault};
pub use interpreter::{ActivityInterpreter, ActivityOutcome, SharedInstance};
pub use schema::{
    Activity, ActivityKind, CopyOperation, CopySource, DanglingReference, EventHandler,
    FaultHandler, LoopBound, ProcessDefinition, VariableDeclaration, WaitDuration,
};
pub use state::{ActivityStatus, ExecutionLogEntry, InstanceStatus, ProcessInstance};
pub use variables::{get_path, set_path, PathError, Variables};
