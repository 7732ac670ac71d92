//! Recursive activity interpreter.
//!
//! Every activity goes through [`ActivityInterpreter::execute`], which records
//! the executing/terminal status and appends one log entry, then dispatches on
//! the activity kind. Composite kinds recurse through `execute` again.

use crate::core::config::EngineSettings;
use crate::core::process::condition::evaluate_condition;
use crate::core::process::expression::{evaluate_expression, ExpressionError};
use crate::core::process::fault::{bind_fault, resolve_handler, ActivityError, Fault, UNHANDLED_FAULT};
use crate::core::process::schema::{
    Activity, ActivityKind, CopySource, FaultHandler, LoopBound, ProcessDefinition,
};
use crate::core::process::state::{
    ActivityStatus, ExecutionLogEntry, InstanceStatus, ProcessInstance,
};
use crate::core::process::variables::{get_path, is_populated, set_path, Variables};
use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Instance state shared between the engine and in-flight interpreters.
pub type SharedInstance = Arc<RwLock<ProcessInstance>>;

/// How an activity that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityOutcome {
    Completed,
    /// Stopped at a checkpoint because the instance is suspended or terminated.
    Halted,
}

impl ActivityOutcome {
    fn merge(self, other: ActivityOutcome) -> ActivityOutcome {
        if self == ActivityOutcome::Halted || other == ActivityOutcome::Halted {
            ActivityOutcome::Halted
        } else {
            ActivityOutcome::Completed
        }
    }
}

pub type ActivityResult = Result<ActivityOutcome, ActivityError>;

/// Walks one instance through its definition.
pub struct ActivityInterpreter {
    pub(crate) definition: Arc<ProcessDefinition>,
    pub(crate) instance: SharedInstance,
    pub(crate) settings: Arc<EngineSettings>,
}

impl ActivityInterpreter {
    pub fn new(
        definition: Arc<ProcessDefinition>,
        instance: SharedInstance,
        settings: Arc<EngineSettings>,
    ) -> Self {
        Self {
            definition,
            instance,
            settings,
        }
    }

    pub fn definition(&self) -> &ProcessDefinition {
        &self.definition
    }

    /// Run the root activity, routing an escaping fault through the
    /// process-level handlers. The caller must have checked that the root exists.
    pub async fn run(&self, root: &Activity) -> ActivityResult {
        let err = match self.execute(root).await {
            Ok(outcome) => return Ok(outcome),
            Err(err) => err,
        };
        let fault = err.to_fault();
        let Some(handler) = resolve_handler(&self.definition.fault_handlers, &fault.name) else {
            return Err(err);
        };
        info!(
            process_id = %self.definition.id,
            fault = %fault.name,
            handler = %handler.activity,
            "process-level fault handler engaged"
        );
        self.run_fault_handler(handler, fault).await
    }

    /// Execute one activity with status bookkeeping and a log entry.
    pub fn execute<'a>(&'a self, activity: &'a Activity) -> BoxFuture<'a, ActivityResult> {
        async move {
            let started_at = Utc::now();
            let clock = Instant::now();
            self.instance
                .write()
                .await
                .set_activity_status(&activity.id, ActivityStatus::Executing);
            debug!(activity_id = %activity.id, kind = %activity.kind, "executing activity");

            let result = self.dispatch(activity).await;

            let (status, error) = match &result {
                Ok(ActivityOutcome::Completed) => (ActivityStatus::Completed, None),
                Ok(ActivityOutcome::Halted) => (ActivityStatus::Interrupted, None),
                Err(err) => (ActivityStatus::Faulted, Some(err.to_string())),
            };
            let mut instance = self.instance.write().await;
            instance.set_activity_status(&activity.id, status);
            instance.execution_log.push(ExecutionLogEntry {
                activity_id: activity.id.clone(),
                activity_name: activity.display_name().to_string(),
                kind: activity.kind,
                status,
                started_at,
                duration_ms: clock.elapsed().as_millis() as u64,
                error,
            });
            drop(instance);

            if let Err(err) = &result {
                debug!(activity_id = %activity.id, error = %err, "activity faulted");
            }
            result
        }
        .boxed()
    }

    async fn dispatch(&self, activity: &Activity) -> ActivityResult {
        match activity.kind {
            ActivityKind::Sequence => self.run_sequence(&activity.children).await,
            ActivityKind::Flow => self.run_flow(&activity.children).await,
            ActivityKind::If => self.run_if(activity).await,
            ActivityKind::While => self.run_while(activity).await,
            ActivityKind::RepeatUntil => self.run_repeat_until(activity).await,
            ActivityKind::ForEach => self.run_for_each(activity).await,
            ActivityKind::Pick => self.run_pick(activity).await,
            ActivityKind::Invoke => self.run_invoke(activity).await,
            ActivityKind::Receive => self.run_receive(activity).await,
            ActivityKind::Reply => self.run_reply(activity).await,
            ActivityKind::Assign => self.run_assign(activity).await,
            ActivityKind::Wait => self.run_wait(activity).await,
            ActivityKind::Throw => self.run_throw(activity).await,
            ActivityKind::Rethrow => self.run_rethrow().await,
            ActivityKind::Scope => self.run_scope(activity).await,
            ActivityKind::Compensate | ActivityKind::CompensateScope => {
                self.compensate_scopes(activity.target.as_deref()).await?;
                Ok(ActivityOutcome::Completed)
            }
            ActivityKind::Empty | ActivityKind::Validate => Ok(ActivityOutcome::Completed),
            ActivityKind::Exit => {
                self.instance.write().await.finish(InstanceStatus::Terminated);
                info!(activity_id = %activity.id, "exit activity terminated the instance");
                Ok(ActivityOutcome::Halted)
            }
            ActivityKind::Unsupported => {
                Err(ActivityError::UnsupportedActivityType(activity.id.clone()))
            }
        }
    }

    pub(crate) fn lookup(&self, id: &str) -> Result<&Activity, ActivityError> {
        self.definition
            .activity(id)
            .ok_or_else(|| ActivityError::ChildActivityNotFound(id.to_string()))
    }

    /// Checkpoint consulted before each child of a sequential construct.
    async fn should_halt(&self) -> bool {
        matches!(
            self.instance.read().await.status,
            InstanceStatus::Suspended | InstanceStatus::Terminated
        )
    }

    async fn run_sequence(&self, children: &[String]) -> ActivityResult {
        for child_id in children {
            if self.should_halt().await {
                return Ok(ActivityOutcome::Halted);
            }
            let child = self.lookup(child_id)?;
            if self.execute(child).await? == ActivityOutcome::Halted {
                return Ok(ActivityOutcome::Halted);
            }
        }
        Ok(ActivityOutcome::Completed)
    }

    /// Launch every child concurrently and wait for all of them. The first
    /// failure in declaration order wins.
    async fn run_flow(&self, children: &[String]) -> ActivityResult {
        let branches = children
            .iter()
            .map(|id| self.lookup(id))
            .collect::<Result<Vec<_>, _>>()?;
        let results = join_all(branches.into_iter().map(|child| self.execute(child))).await;

        let mut outcome = ActivityOutcome::Completed;
        for result in results {
            outcome = outcome.merge(result?);
        }
        Ok(outcome)
    }

    async fn condition_holds(&self, activity: &Activity) -> Result<bool, ActivityError> {
        let condition = activity
            .condition
            .as_deref()
            .ok_or_else(|| ActivityError::invalid(&activity.id, "missing condition"))?;
        let instance = self.instance.read().await;
        Ok(evaluate_condition(condition, &instance.variables)?)
    }

    async fn run_if(&self, activity: &Activity) -> ActivityResult {
        let branch = if self.condition_holds(activity).await? {
            activity.children.first()
        } else {
            activity.else_activity.as_ref()
        };
        match branch {
            Some(id) => {
                let target = self.lookup(id)?;
                self.execute(target).await
            }
            None => Ok(ActivityOutcome::Completed),
        }
    }

    fn iteration_limit(&self, activity: &Activity) -> ActivityError {
        warn!(
            activity_id = %activity.id,
            limit = self.settings.max_loop_iterations,
            "loop hit the iteration cap"
        );
        ActivityError::IterationLimitExceeded {
            activity_id: activity.id.clone(),
            kind: activity.kind,
            limit: self.settings.max_loop_iterations,
        }
    }

    async fn run_while(&self, activity: &Activity) -> ActivityResult {
        let mut iterations = 0usize;
        while self.condition_holds(activity).await? {
            iterations += 1;
            if iterations > self.settings.max_loop_iterations {
                return Err(self.iteration_limit(activity));
            }
            if self.run_sequence(&activity.children).await? == ActivityOutcome::Halted {
                return Ok(ActivityOutcome::Halted);
            }
        }
        Ok(ActivityOutcome::Completed)
    }

    async fn run_repeat_until(&self, activity: &Activity) -> ActivityResult {
        let mut iterations = 0usize;
        loop {
            iterations += 1;
            if iterations > self.settings.max_loop_iterations {
                return Err(self.iteration_limit(activity));
            }
            if self.run_sequence(&activity.children).await? == ActivityOutcome::Halted {
                return Ok(ActivityOutcome::Halted);
            }
            if self.condition_holds(activity).await? {
                return Ok(ActivityOutcome::Completed);
            }
        }
    }

    async fn loop_bound(
        &self,
        activity: &Activity,
        bound: Option<&LoopBound>,
        field: &str,
    ) -> Result<i64, ActivityError> {
        match bound {
            Some(LoopBound::Fixed(value)) => Ok(*value),
            Some(LoopBound::Expression(text)) => {
                let value = {
                    let instance = self.instance.read().await;
                    evaluate_expression(text, &instance.variables)?
                };
                value
                    .as_i64()
                    .ok_or_else(|| ExpressionError::NotAnInteger(text.clone()).into())
            }
            None => Err(ActivityError::invalid(
                &activity.id,
                format!("missing {}", field),
            )),
        }
    }

    async fn run_for_each(&self, activity: &Activity) -> ActivityResult {
        let counter = activity
            .counter_variable
            .as_deref()
            .ok_or_else(|| ActivityError::invalid(&activity.id, "missing counterVariable"))?;
        let start = self
            .loop_bound(activity, activity.start_value.as_ref(), "startValue")
            .await?;
        let end = self
            .loop_bound(activity, activity.end_value.as_ref(), "endValue")
            .await?;
        // Inclusive bounds; the whole range is checked against the cap up front.
        let span = i128::from(end) - i128::from(start) + 1;
        if span > self.settings.max_loop_iterations as i128 {
            return Err(self.iteration_limit(activity));
        }

        if activity.parallel {
            let iterations = (start..=end).map(move |index| async move {
                set_path(&mut self.instance.write().await.variables, counter, json!(index))?;
                self.run_flow(&activity.children).await
            });
            let mut outcome = ActivityOutcome::Completed;
            for result in join_all(iterations).await {
                outcome = outcome.merge(result?);
            }
            return Ok(outcome);
        }

        for index in start..=end {
            if self.should_halt().await {
                return Ok(ActivityOutcome::Halted);
            }
            set_path(&mut self.instance.write().await.variables, counter, json!(index))?;
            if self.run_sequence(&activity.children).await? == ActivityOutcome::Halted {
                return Ok(ActivityOutcome::Halted);
            }
        }
        Ok(ActivityOutcome::Completed)
    }

    /// Event selection is simulated: the first declared branch always fires.
    async fn run_pick(&self, activity: &Activity) -> ActivityResult {
        let Some(branch) = activity.event_handlers.first() else {
            return Ok(ActivityOutcome::Completed);
        };
        debug!(activity_id = %activity.id, event = %branch.event, "pick selected event");
        let target = self.lookup(&branch.activity)?;
        self.execute(target).await
    }

    async fn run_invoke(&self, activity: &Activity) -> ActivityResult {
        let partner_link = activity.partner_link.clone().unwrap_or_default();
        let operation = activity.operation.clone().unwrap_or_default();
        info!(
            activity_id = %activity.id,
            partner_link = %partner_link,
            operation = %operation,
            "simulated invoke"
        );

        if let Some(output) = &activity.output_variable {
            let mut instance = self.instance.write().await;
            let input = activity
                .input_variable
                .as_deref()
                .and_then(|path| get_path(&instance.variables, path))
                .cloned()
                .unwrap_or(Value::Null);
            let response = json!({
                "partnerLink": partner_link,
                "operation": operation,
                "simulated": true,
                "input": input,
            });
            set_path(&mut instance.variables, output, response)?;
        }
        Ok(ActivityOutcome::Completed)
    }

    /// Only fills the output variable when nothing was delivered up front.
    async fn run_receive(&self, activity: &Activity) -> ActivityResult {
        let Some(output) = &activity.output_variable else {
            return Ok(ActivityOutcome::Completed);
        };
        let mut instance = self.instance.write().await;
        if is_populated(&instance.variables, output) {
            debug!(activity_id = %activity.id, variable = %output, "receive found delivered message");
            return Ok(ActivityOutcome::Completed);
        }
        let message = json!({
            "partnerLink": activity.partner_link.clone().unwrap_or_default(),
            "operation": activity.operation.clone().unwrap_or_default(),
            "simulated": true,
        });
        set_path(&mut instance.variables, output, message)?;
        Ok(ActivityOutcome::Completed)
    }

    async fn run_reply(&self, activity: &Activity) -> ActivityResult {
        let payload: Value = match &activity.input_variable {
            Some(path) => {
                let instance = self.instance.read().await;
                get_path(&instance.variables, path)
                    .cloned()
                    .unwrap_or(Value::Null)
            }
            None => Value::Null,
        };
        info!(
            activity_id = %activity.id,
            partner_link = activity.partner_link.as_deref().unwrap_or(""),
            operation = activity.operation.as_deref().unwrap_or(""),
            payload = %payload,
            "reply"
        );
        Ok(ActivityOutcome::Completed)
    }

    /// Copies apply in order; a later copy sees earlier writes.
    async fn run_assign(&self, activity: &Activity) -> ActivityResult {
        let mut instance = self.instance.write().await;
        for copy in &activity.copies {
            let value = resolve_copy_source(&copy.from, &instance.variables)?;
            set_path(&mut instance.variables, &copy.to, value)?;
        }
        Ok(ActivityOutcome::Completed)
    }

    async fn run_wait(&self, activity: &Activity) -> ActivityResult {
        let requested = match (&activity.duration, &activity.deadline) {
            (Some(duration), _) => duration
                .to_duration()
                .map_err(|reason| ActivityError::invalid(&activity.id, reason))?,
            (None, Some(deadline)) => (*deadline - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO),
            (None, None) => Duration::ZERO,
        };
        let delay = self.settings.clamp_wait(requested);
        debug!(activity_id = %activity.id, delay_ms = delay.as_millis() as u64, "waiting");
        tokio::time::sleep(delay).await;
        Ok(ActivityOutcome::Completed)
    }

    async fn run_throw(&self, activity: &Activity) -> ActivityResult {
        let name = activity.fault_name.as_deref().unwrap_or(UNHANDLED_FAULT);
        let mut fault = Fault::new(
            name,
            format!("fault {} thrown by {}", name, activity.display_name()),
        );
        if let Some(path) = &activity.fault_variable {
            let instance = self.instance.read().await;
            if let Some(data) = get_path(&instance.variables, path) {
                fault = fault.with_data(data.clone());
            }
        }
        Err(fault.into())
    }

    async fn run_rethrow(&self) -> ActivityResult {
        let current = self.instance.read().await.fault.clone();
        match current {
            Some(fault) => Err(fault.into()),
            None => Err(ActivityError::NoFaultToRethrow),
        }
    }

    async fn run_scope(&self, activity: &Activity) -> ActivityResult {
        let err = match self.run_sequence(&activity.children).await {
            Ok(outcome) => return Ok(outcome),
            Err(err) => err,
        };
        let fault = err.to_fault();
        let Some(handler) = resolve_handler(&activity.fault_handlers, &fault.name) else {
            return Err(err);
        };
        info!(
            scope_id = %activity.id,
            fault = %fault.name,
            handler = %handler.activity,
            "scope caught fault"
        );
        self.run_fault_handler(handler, fault).await
    }

    /// Record and bind the fault, then run the recovery activity. The fault
    /// stays visible to `rethrow` until the handler finishes cleanly.
    async fn run_fault_handler(&self, handler: &FaultHandler, fault: Fault) -> ActivityResult {
        let recovery = self.lookup(&handler.activity)?;
        {
            let mut instance = self.instance.write().await;
            bind_fault(&mut instance.variables, handler, &fault)?;
            instance.fault = Some(fault);
        }
        let outcome = self.execute(recovery).await?;
        self.instance.write().await.fault = None;
        Ok(outcome)
    }
}

fn resolve_copy_source(source: &CopySource, variables: &Variables) -> Result<Value, ActivityError> {
    match source {
        CopySource::Literal { value } => Ok(value.clone()),
        CopySource::Variable { path } => Ok(get_path(variables, path).cloned().unwrap_or(Value::Null)),
        CopySource::Expression { expression } => Ok(evaluate_expression(expression, variables)?),
    }
}
