#![allow(clippy::result_large_err)] // Façade returns AppError so callers keep the stable code and context.

use crate::core::config::EngineSettings;
use crate::core::error::AppError;
use crate::core::process::fault::{Fault, COMPENSATION_FAULT, MISSING_ROOT_ACTIVITY};
use crate::core::process::interpreter::{ActivityInterpreter, SharedInstance};
use crate::core::process::schema::ProcessDefinition;
use crate::core::process::state::{InstanceStatus, ProcessInstance};
use crate::core::process::variables::Variables;
use crate::core::types::ErrorCategory;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Source of instance ids.
pub trait IdGenerator: Send + Sync {
    fn generate_id(&self) -> String;
}

/// Random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Observer invoked with a snapshot of the instance that reached an outcome.
pub type InstanceCallback = Arc<dyn Fn(&ProcessInstance) -> anyhow::Result<()> + Send + Sync>;

/// Instance state plus the definition it was started from, so compensation
/// still works after the definition is undeployed.
struct InstanceEntry {
    definition: Arc<ProcessDefinition>,
    state: SharedInstance,
}

impl InstanceEntry {
    async fn snapshot(&self) -> ProcessInstance {
        self.state.read().await.clone()
    }
}

/// Definition and instance registries with the lifecycle operations over them.
pub struct ProcessEngine {
    settings: Arc<EngineSettings>,
    id_generator: Arc<dyn IdGenerator>,
    processes: RwLock<HashMap<String, Arc<ProcessDefinition>>>,
    instances: RwLock<IndexMap<String, Arc<InstanceEntry>>>,
    complete_callbacks: RwLock<Vec<InstanceCallback>>,
    faulted_callbacks: RwLock<Vec<InstanceCallback>>,
}

impl Default for ProcessEngine {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

fn illegal_transition(operation: &str, status: InstanceStatus) -> AppError {
    let mut err = AppError::new(
        ErrorCategory::LifecycleError,
        format!("cannot {} instance in status {}", operation, status),
    )
    .with_code("PFX-LIFE-002");
    err.add_context("operation", operation);
    err.add_context("status", status.as_str());
    err
}

fn notify(callbacks: &[InstanceCallback], instance: &ProcessInstance, hook: &str) {
    for callback in callbacks {
        match catch_unwind(AssertUnwindSafe(|| callback(instance))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(
                instance_id = %instance.instance_id,
                hook,
                error = %err,
                "lifecycle callback failed"
            ),
            Err(_) => warn!(
                instance_id = %instance.instance_id,
                hook,
                "lifecycle callback panicked"
            ),
        }
    }
}

impl ProcessEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            id_generator: Arc::new(UuidGenerator),
            processes: RwLock::new(HashMap::new()),
            instances: RwLock::new(IndexMap::new()),
            complete_callbacks: RwLock::new(Vec::new()),
            faulted_callbacks: RwLock::new(Vec::new()),
        }
    }

    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub async fn deploy_process(&self, definition: ProcessDefinition) -> Result<(), AppError> {
        let mut processes = self.processes.write().await;
        if processes.contains_key(&definition.id) {
            let mut err = AppError::new(
                ErrorCategory::DeploymentError,
                format!("process {} is already deployed", definition.id),
            )
            .with_code("PFX-DEPLOY-001");
            err.add_context("process_id", &definition.id);
            return Err(err);
        }
        info!(
            process_id = %definition.id,
            version = %definition.version,
            activities = definition.activities.len(),
            "process deployed"
        );
        processes.insert(definition.id.clone(), Arc::new(definition));
        Ok(())
    }

    pub async fn undeploy_process(&self, process_id: &str) -> Result<(), AppError> {
        match self.processes.write().await.remove(process_id) {
            Some(_) => {
                info!(process_id, "process undeployed");
                Ok(())
            }
            None => Err(Self::not_deployed(process_id)),
        }
    }

    pub async fn get_process(&self, process_id: &str) -> Option<Arc<ProcessDefinition>> {
        self.processes.read().await.get(process_id).cloned()
    }

    fn not_deployed(process_id: &str) -> AppError {
        let mut err = AppError::new(
            ErrorCategory::DeploymentError,
            format!("process {} is not deployed", process_id),
        )
        .with_code("PFX-DEPLOY-002");
        err.add_context("process_id", process_id);
        err
    }

    /// Start and run an instance to its first resting point. Business faults
    /// are recorded on the returned instance, never returned as errors.
    pub async fn start_process(
        &self,
        process_id: &str,
        input: Variables,
        initiated_by: &str,
    ) -> Result<ProcessInstance, AppError> {
        let definition = self
            .get_process(process_id)
            .await
            .ok_or_else(|| Self::not_deployed(process_id))?;
        if !definition.enabled {
            let mut err = AppError::new(
                ErrorCategory::DeploymentError,
                format!("process {} is disabled", process_id),
            )
            .with_code("PFX-START-001");
            err.add_context("process_id", process_id);
            return Err(err);
        }

        let mut variables = Variables::new();
        for declaration in &definition.variables {
            variables.insert(declaration.name.clone(), declaration.default.clone());
        }
        variables.extend(input);

        let instance_id = self.id_generator.generate_id();
        let entry = Arc::new(InstanceEntry {
            definition: Arc::clone(&definition),
            state: Arc::new(RwLock::new(ProcessInstance::new(
                instance_id.clone(),
                process_id,
                variables,
                initiated_by,
            ))),
        });
        self.instances
            .write()
            .await
            .insert(instance_id.clone(), Arc::clone(&entry));
        info!(process_id, instance_id = %instance_id, initiated_by, "process instance started");

        let Some(root) = definition.root_activity() else {
            warn!(
                instance_id = %instance_id,
                root = %definition.root_activity_id,
                "root activity is missing"
            );
            let snapshot = {
                let mut instance = entry.state.write().await;
                instance.fault = Some(Fault::new(
                    MISSING_ROOT_ACTIVITY,
                    format!("root activity {} not found", definition.root_activity_id),
                ));
                instance.finish(InstanceStatus::Faulted);
                instance.clone()
            };
            notify(&self.faulted_callbacks.read().await, &snapshot, "faulted");
            return Ok(snapshot);
        };

        let interpreter = ActivityInterpreter::new(
            Arc::clone(&definition),
            Arc::clone(&entry.state),
            Arc::clone(&self.settings),
        );
        let result = interpreter.run(root).await;

        let (snapshot, outcome) = {
            let mut instance = entry.state.write().await;
            let outcome = match result {
                Ok(_) if instance.status == InstanceStatus::Active => {
                    instance.finish(InstanceStatus::Completed);
                    Some(InstanceStatus::Completed)
                }
                Ok(_) => None,
                Err(_) if instance.status == InstanceStatus::Terminated => None,
                Err(err) => {
                    instance.fault = Some(err.to_fault());
                    instance.finish(InstanceStatus::Faulted);
                    Some(InstanceStatus::Faulted)
                }
            };
            (instance.clone(), outcome)
        };

        match outcome {
            Some(InstanceStatus::Completed) => {
                info!(instance_id = %instance_id, "process instance completed");
                notify(&self.complete_callbacks.read().await, &snapshot, "completed");
            }
            Some(_) => {
                let fault_name = snapshot
                    .fault
                    .as_ref()
                    .map(|fault| fault.name.as_str())
                    .unwrap_or_default();
                warn!(instance_id = %instance_id, fault = fault_name, "process instance faulted");
                notify(&self.faulted_callbacks.read().await, &snapshot, "faulted");
            }
            None => info!(
                instance_id = %instance_id,
                status = %snapshot.status,
                "process instance stopped before completion"
            ),
        }
        Ok(snapshot)
    }

    async fn entry(&self, instance_id: &str) -> Result<Arc<InstanceEntry>, AppError> {
        self.instances
            .read()
            .await
            .get(instance_id)
            .cloned()
            .ok_or_else(|| {
                let mut err = AppError::new(
                    ErrorCategory::LifecycleError,
                    format!("instance {} not found", instance_id),
                )
                .with_code("PFX-LIFE-001");
                err.add_context("instance_id", instance_id);
                err
            })
    }

    /// Checked at the next child boundary; in-flight activities finish.
    pub async fn suspend_instance(&self, instance_id: &str) -> Result<(), AppError> {
        let entry = self.entry(instance_id).await?;
        let mut instance = entry.state.write().await;
        if instance.status != InstanceStatus::Active {
            return Err(illegal_transition("suspend", instance.status));
        }
        instance.status = InstanceStatus::Suspended;
        info!(instance_id, "process instance suspended");
        Ok(())
    }

    /// Flips the status back to active. Activities skipped at a checkpoint
    /// are not replayed.
    pub async fn resume_instance(&self, instance_id: &str) -> Result<(), AppError> {
        let entry = self.entry(instance_id).await?;
        let mut instance = entry.state.write().await;
        if instance.status != InstanceStatus::Suspended {
            return Err(illegal_transition("resume", instance.status));
        }
        instance.status = InstanceStatus::Active;
        info!(instance_id, "process instance resumed");
        Ok(())
    }

    pub async fn terminate_instance(&self, instance_id: &str) -> Result<(), AppError> {
        let entry = self.entry(instance_id).await?;
        let mut instance = entry.state.write().await;
        if instance.status.is_terminal() {
            return Err(illegal_transition("terminate", instance.status));
        }
        instance.finish(InstanceStatus::Terminated);
        info!(instance_id, "process instance terminated");
        Ok(())
    }

    /// Undo completed scopes in reverse order, then the process-level
    /// compensation handler. A failing handler leaves the instance faulted
    /// with `CompensationFault`; that outcome is recorded, not returned.
    pub async fn compensate_instance(&self, instance_id: &str) -> Result<(), AppError> {
        let entry = self.entry(instance_id).await?;
        {
            let mut instance = entry.state.write().await;
            if !matches!(
                instance.status,
                InstanceStatus::Completed | InstanceStatus::Faulted
            ) {
                return Err(illegal_transition("compensate", instance.status));
            }
            instance.status = InstanceStatus::Compensating;
        }
        info!(instance_id, "process instance compensating");

        let interpreter = ActivityInterpreter::new(
            Arc::clone(&entry.definition),
            Arc::clone(&entry.state),
            Arc::clone(&self.settings),
        );
        let result = interpreter.compensate_process().await;

        let mut instance = entry.state.write().await;
        match result {
            Ok(()) => {
                instance.status = InstanceStatus::Compensated;
                info!(instance_id, "process instance compensated");
            }
            Err(err) => {
                let cause = err.to_fault();
                warn!(instance_id, error = %err, "compensation failed");
                instance.fault = Some(
                    Fault::new(COMPENSATION_FAULT, format!("compensation failed: {}", err))
                        .with_data(cause.to_value()),
                );
                instance.finish(InstanceStatus::Faulted);
            }
        }
        Ok(())
    }

    async fn entries(&self) -> Vec<Arc<InstanceEntry>> {
        self.instances.read().await.values().cloned().collect()
    }

    pub async fn get_instance(&self, instance_id: &str) -> Option<ProcessInstance> {
        let entry = self.instances.read().await.get(instance_id).cloned()?;
        Some(entry.snapshot().await)
    }

    /// Instances started from `process_id`, in start order.
    pub async fn get_instances_by_process(&self, process_id: &str) -> Vec<ProcessInstance> {
        let mut found = Vec::new();
        for entry in self.entries().await {
            if entry.definition.id == process_id {
                found.push(entry.snapshot().await);
            }
        }
        found
    }

    pub async fn get_instances_by_status(&self, status: InstanceStatus) -> Vec<ProcessInstance> {
        let mut found = Vec::new();
        for entry in self.entries().await {
            let snapshot = entry.snapshot().await;
            if snapshot.status == status {
                found.push(snapshot);
            }
        }
        found
    }

    pub async fn process_count(&self) -> usize {
        self.processes.read().await.len()
    }

    pub async fn instance_count(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn active_count(&self) -> usize {
        let mut active = 0;
        for entry in self.entries().await {
            if entry.state.read().await.status == InstanceStatus::Active {
                active += 1;
            }
        }
        active
    }

    pub async fn on_complete<F>(&self, callback: F)
    where
        F: Fn(&ProcessInstance) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.complete_callbacks.write().await.push(Arc::new(callback));
    }

    pub async fn on_faulted<F>(&self, callback: F)
    where
        F: Fn(&ProcessInstance) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.faulted_callbacks.write().await.push(Arc::new(callback));
    }
}
