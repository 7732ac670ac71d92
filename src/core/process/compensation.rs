//! Compensation of completed scopes in reverse completion order.

use crate::core::process::fault::ActivityError;
use crate::core::process::interpreter::ActivityInterpreter;
use crate::core::process::schema::ActivityKind;
use crate::core::process::state::ActivityStatus;
use tracing::info;

/// A completed scope paired with the handler that undoes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationStep {
    pub scope_id: String,
    pub handler_id: String,
}

impl ActivityInterpreter {
    /// Completed scopes that declare a compensation handler, most recently
    /// completed first. `target` narrows the set to scopes whose name or id matches.
    pub async fn compensation_plan(&self, target: Option<&str>) -> Vec<CompensationStep> {
        let instance = self.instance.read().await;
        let mut plan: Vec<CompensationStep> = instance
            .activity_statuses
            .iter()
            .filter(|(_, status)| **status == ActivityStatus::Completed)
            .filter_map(|(id, _)| {
                let scope = self.definition.activity(id)?;
                if scope.kind != ActivityKind::Scope {
                    return None;
                }
                let handler_id = scope.compensation_handler.as_ref()?;
                if let Some(target) = target {
                    if scope.name.as_deref() != Some(target) && scope.id != target {
                        return None;
                    }
                }
                Some(CompensationStep {
                    scope_id: scope.id.clone(),
                    handler_id: handler_id.clone(),
                })
            })
            .collect();
        plan.reverse();
        plan
    }

    /// Run each planned handler and mark its scope compensated. Stops at the
    /// first handler that fails.
    pub async fn compensate_scopes(&self, target: Option<&str>) -> Result<(), ActivityError> {
        for step in self.compensation_plan(target).await {
            let handler = self.lookup(&step.handler_id)?;
            info!(
                scope_id = %step.scope_id,
                handler = %step.handler_id,
                "compensating scope"
            );
            self.execute(handler).await?;
            self.instance
                .write()
                .await
                .set_activity_status(&step.scope_id, ActivityStatus::Compensated);
        }
        Ok(())
    }

    /// Whole-instance compensation: every eligible scope, then the
    /// process-level compensation handler.
    pub async fn compensate_process(&self) -> Result<(), ActivityError> {
        self.compensate_scopes(None).await?;
        if let Some(handler_id) = &self.definition.compensation_handler {
            let handler = self.lookup(handler_id)?;
            info!(
                process_id = %self.definition.id,
                handler = %handler_id,
                "running process compensation handler"
            );
            self.execute(handler).await?;
        }
        Ok(())
    }
}
