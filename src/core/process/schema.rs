#![allow(clippy::result_large_err)] // Definition loading returns AppError to preserve structured context without boxing.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

fn default_version() -> String {
    "1.0".to_string()
}

fn default_enabled() -> bool {
    true
}

/// Kind tag of an activity node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityKind {
    Sequence,
    Flow,
    If,
    While,
    RepeatUntil,
    ForEach,
    Pick,
    Invoke,
    Receive,
    Reply,
    Assign,
    Wait,
    Throw,
    Rethrow,
    Scope,
    Compensate,
    CompensateScope,
    Empty,
    Exit,
    Validate,
    /// Any tag this engine does not know; fails at execution time.
    #[serde(other)]
    Unsupported,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Sequence => "sequence",
            ActivityKind::Flow => "flow",
            ActivityKind::If => "if",
            ActivityKind::While => "while",
            ActivityKind::RepeatUntil => "repeatUntil",
            ActivityKind::ForEach => "forEach",
            ActivityKind::Pick => "pick",
            ActivityKind::Invoke => "invoke",
            ActivityKind::Receive => "receive",
            ActivityKind::Reply => "reply",
            ActivityKind::Assign => "assign",
            ActivityKind::Wait => "wait",
            ActivityKind::Throw => "throw",
            ActivityKind::Rethrow => "rethrow",
            ActivityKind::Scope => "scope",
            ActivityKind::Compensate => "compensate",
            ActivityKind::CompensateScope => "compensateScope",
            ActivityKind::Empty => "empty",
            ActivityKind::Exit => "exit",
            ActivityKind::Validate => "validate",
            ActivityKind::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scope- or process-level fault handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultHandler {
    /// Exact fault name, or `*` to catch anything.
    pub fault_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault_variable: Option<String>,
    /// Recovery activity id.
    pub activity: String,
}

/// Branch of a `pick` activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventHandler {
    pub event: String,
    pub activity: String,
}

/// Source side of an `assign` copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CopySource {
    Literal { value: Value },
    Variable { path: String },
    Expression { expression: String },
}

/// One copy operation of an `assign` activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyOperation {
    pub from: CopySource,
    /// Destination dotted path.
    pub to: String,
}

/// `forEach` bound: a literal integer or an expression over the variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LoopBound {
    Fixed(i64),
    Expression(String),
}

/// `wait` duration: milliseconds or a humantime string such as `"250ms"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WaitDuration {
    Millis(u64),
    Text(String),
}

impl WaitDuration {
    pub fn to_duration(&self) -> Result<Duration, String> {
        match self {
            WaitDuration::Millis(ms) => Ok(Duration::from_millis(*ms)),
            WaitDuration::Text(text) => humantime::parse_duration(text)
                .map_err(|err| format!("invalid duration '{}': {}", text, err)),
        }
    }
}

/// Node of the activity graph. Which optional fields are meaningful depends on `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub else_activity: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub copies: Vec<CopyOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault_variable: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_handlers: Vec<EventHandler>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fault_handlers: Vec<FaultHandler>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation_handler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_value: Option<LoopBound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_value: Option<LoopBound>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub parallel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<WaitDuration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    /// Scope name targeted by `compensate`/`compensateScope`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl Activity {
    pub fn new<T: Into<String>>(id: T, kind: ActivityKind) -> Self {
        Activity {
            id: id.into(),
            kind,
            name: None,
            children: Vec::new(),
            condition: None,
            else_activity: None,
            copies: Vec::new(),
            fault_name: None,
            fault_variable: None,
            event_handlers: Vec::new(),
            fault_handlers: Vec::new(),
            compensation_handler: None,
            counter_variable: None,
            start_value: None,
            end_value: None,
            parallel: false,
            partner_link: None,
            operation: None,
            input_variable: None,
            output_variable: None,
            duration: None,
            deadline: None,
            target: None,
        }
    }

    pub fn with_name<T: Into<String>>(mut self, name: T) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_children<I, T>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.children = children.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_condition<T: Into<String>>(mut self, condition: T) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Every activity id this node refers to, paired with the field it came from.
    pub fn references(&self) -> Vec<(&'static str, &str)> {
        let mut refs: Vec<(&'static str, &str)> = self
            .children
            .iter()
            .map(|child| ("children", child.as_str()))
            .collect();
        if let Some(else_id) = &self.else_activity {
            refs.push(("elseActivity", else_id));
        }
        if let Some(handler) = &self.compensation_handler {
            refs.push(("compensationHandler", handler));
        }
        refs.extend(
            self.fault_handlers
                .iter()
                .map(|handler| ("faultHandlers", handler.activity.as_str())),
        );
        refs.extend(
            self.event_handlers
                .iter()
                .map(|handler| ("eventHandlers", handler.activity.as_str())),
        );
        refs
    }
}

/// Declared process variable with its initial value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDeclaration {
    pub name: String,
    #[serde(default)]
    pub default: Value,
}

/// Immutable, deployable process definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDefinition {
    pub id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Flat activity arena keyed by id; serialized as a list.
    #[serde(
        deserialize_with = "deserialize_activities",
        serialize_with = "serialize_activities"
    )]
    pub activities: IndexMap<String, Activity>,
    pub root_activity_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fault_handlers: Vec<FaultHandler>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation_handler: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<VariableDeclaration>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn deserialize_activities<'de, D>(deserializer: D) -> Result<IndexMap<String, Activity>, D::Error>
where
    D: Deserializer<'de>,
{
    let list = Vec::<Activity>::deserialize(deserializer)?;
    Ok(list
        .into_iter()
        .map(|activity| (activity.id.clone(), activity))
        .collect())
}

fn serialize_activities<S>(activities: &IndexMap<String, Activity>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_seq(activities.values())
}

/// Reference to an activity id that does not exist in the definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingReference {
    /// Referring activity; `None` for process-level references.
    pub activity_id: Option<String>,
    pub field: &'static str,
    pub target: String,
}

impl fmt::Display for DanglingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.activity_id {
            Some(id) => write!(f, "activity {} {} -> {}", id, self.field, self.target),
            None => write!(f, "process {} -> {}", self.field, self.target),
        }
    }
}

impl ProcessDefinition {
    pub fn new<I, N, R>(id: I, name: N, root_activity_id: R, activities: Vec<Activity>) -> Self
    where
        I: Into<String>,
        N: Into<String>,
        R: Into<String>,
    {
        ProcessDefinition {
            id: id.into(),
            name: name.into(),
            version: default_version(),
            activities: activities
                .into_iter()
                .map(|activity| (activity.id.clone(), activity))
                .collect(),
            root_activity_id: root_activity_id.into(),
            fault_handlers: Vec::new(),
            compensation_handler: None,
            variables: Vec::new(),
            enabled: true,
        }
    }

    pub fn activity(&self, id: &str) -> Option<&Activity> {
        self.activities.get(id)
    }

    pub fn root_activity(&self) -> Option<&Activity> {
        self.activities.get(&self.root_activity_id)
    }

    /// Parse a definition from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self, AppError> {
        serde_yaml::from_str(text).map_err(|err| {
            AppError::new(
                ErrorCategory::DefinitionError,
                format!("failed to parse process definition: {}", err),
            )
            .with_code("PFX-DEF-001")
        })
    }

    /// Parse a definition from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, AppError> {
        serde_json::from_str(text).map_err(|err| {
            AppError::new(
                ErrorCategory::DefinitionError,
                format!("failed to parse process definition: {}", err),
            )
            .with_code("PFX-DEF-001")
        })
    }

    /// Load a definition file; `.json` files are read as JSON, everything else as YAML.
    pub fn load_from_file(path: &Path) -> Result<Self, AppError> {
        let text = fs::read_to_string(path).map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to read {}: {}", path.display(), err),
            )
        })?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let parsed = if is_json {
            Self::from_json_str(&text)
        } else {
            Self::from_yaml_str(&text)
        };
        parsed.map_err(|err| err.with_context(path.display().to_string()))
    }

    /// List references that do not resolve. Deployment never calls this; it
    /// backs the `check` command.
    pub fn dangling_references(&self) -> Vec<DanglingReference> {
        let mut dangling = Vec::new();
        if !self.activities.contains_key(&self.root_activity_id) {
            dangling.push(DanglingReference {
                activity_id: None,
                field: "rootActivityId",
                target: self.root_activity_id.clone(),
            });
        }
        for handler in &self.fault_handlers {
            if !self.activities.contains_key(&handler.activity) {
                dangling.push(DanglingReference {
                    activity_id: None,
                    field: "faultHandlers",
                    target: handler.activity.clone(),
                });
            }
        }
        if let Some(handler) = &self.compensation_handler {
            if !self.activities.contains_key(handler) {
                dangling.push(DanglingReference {
                    activity_id: None,
                    field: "compensationHandler",
                    target: handler.clone(),
                });
            }
        }
        for activity in self.activities.values() {
            for (field, target) in activity.references() {
                if !self.activities.contains_key(target) {
                    dangling.push(DanglingReference {
                        activity_id: Some(activity.id.clone()),
                        field,
                        target: target.to_string(),
                    });
                }
            }
        }
        dangling
    }
}
