use crate::core::process::fault::Fault;
use crate::core::process::schema::ActivityKind;
use crate::core::process::variables::Variables;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a process instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Active,
    Suspended,
    Completed,
    Faulted,
    Terminated,
    Compensating,
    Compensated,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Active => "active",
            InstanceStatus::Suspended => "suspended",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Faulted => "faulted",
            InstanceStatus::Terminated => "terminated",
            InstanceStatus::Compensating => "compensating",
            InstanceStatus::Compensated => "compensated",
        }
    }

    /// Statuses from which `terminateInstance` is refused.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Completed | InstanceStatus::Faulted | InstanceStatus::Terminated
        )
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-activity execution status recorded on the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Executing,
    Completed,
    Faulted,
    /// Stopped early because the instance was suspended, terminated or exited.
    Interrupted,
    Compensated,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Executing => "executing",
            ActivityStatus::Completed => "completed",
            ActivityStatus::Faulted => "faulted",
            ActivityStatus::Interrupted => "interrupted",
            ActivityStatus::Compensated => "compensated",
        }
    }
}

/// Append-only record of one activity execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLogEntry {
    pub activity_id: String,
    pub activity_name: String,
    pub kind: ActivityKind,
    pub status: ActivityStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Mutable execution state of one running process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInstance {
    pub instance_id: String,
    pub process_id: String,
    pub status: InstanceStatus,
    /// Insertion-ordered: first execution of each activity fixes its position.
    pub activity_statuses: IndexMap<String, ActivityStatus>,
    pub variables: Variables,
    pub execution_log: Vec<ExecutionLogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<Fault>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub initiated_by: String,
}

impl ProcessInstance {
    pub fn new<I, P, W>(instance_id: I, process_id: P, variables: Variables, initiated_by: W) -> Self
    where
        I: Into<String>,
        P: Into<String>,
        W: Into<String>,
    {
        ProcessInstance {
            instance_id: instance_id.into(),
            process_id: process_id.into(),
            status: InstanceStatus::Active,
            activity_statuses: IndexMap::new(),
            variables,
            execution_log: Vec::new(),
            fault: None,
            started_at: Utc::now(),
            completed_at: None,
            initiated_by: initiated_by.into(),
        }
    }

    pub fn activity_status(&self, activity_id: &str) -> Option<ActivityStatus> {
        self.activity_statuses.get(activity_id).copied()
    }

    pub fn set_activity_status(&mut self, activity_id: &str, status: ActivityStatus) {
        match self.activity_statuses.get_mut(activity_id) {
            Some(slot) => *slot = status,
            None => {
                self.activity_statuses.insert(activity_id.to_string(), status);
            }
        }
    }

    /// Move to a final status and stamp the completion time.
    pub fn finish(&mut self, status: InstanceStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    /// Activity ids in log order.
    pub fn logged_activity_ids(&self) -> Vec<&str> {
        self.execution_log
            .iter()
            .map(|entry| entry.activity_id.as_str())
            .collect()
    }
}
