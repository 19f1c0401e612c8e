use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString, IntoStaticStr};

use super::serialize_timestamp;

/// Permit state of a task definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, IntoStaticStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    /// The permit is available
    Ready,
    /// The permit is held by a running execution
    Doing,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Outcome of one execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, IntoStaticStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExecutionStatus {
    Todo,
    Success,
    Fail,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, IntoStaticStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TriggerKind {
    Interval,
    Date,
    Cron,
}

impl TriggerKind {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Stored rows fall back to cron for anything that is not `interval` or `date`
    pub fn from_stored(value: &str) -> Self {
        value.parse().unwrap_or(TriggerKind::Cron)
    }
}

/// One row per logical recurring job
#[derive(Debug, Clone, Serialize)]
pub struct TaskDefinition {
    pub id: i32,
    pub task_key: String,
    pub description: String,
    pub execute_func: String,
    /// Raw stored trigger kind; see [`TaskDefinition::trigger`]
    pub trigger_kind: String,
    pub spec: String,
    pub args: String,
    pub is_valid: bool,
    pub status: TaskStatus,
    pub extra: Value,
    #[serde(serialize_with = "serialize_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl TaskDefinition {
    /// Identity of this definition inside the in-process job table
    pub fn job_id(&self) -> String {
        job_id(self.id, &self.task_key)
    }

    pub fn trigger(&self) -> TriggerKind {
        TriggerKind::from_stored(&self.trigger_kind)
    }

    /// Allowed age in seconds of the latest execution, from `extra.delay`
    pub fn delay_secs(&self, default: i64) -> i64 {
        match self.extra.get("delay") {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }
}

pub fn job_id(id: i32, task_key: &str) -> String {
    format!("{}_{}", id, task_key)
}

/// Append-only audit row per attempted run
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub id: i32,
    pub task_id: i32,
    pub status: ExecutionStatus,
    pub extra: Value,
    pub trace_id: String,
    #[serde(serialize_with = "serialize_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl ExecutionRecord {
    /// Whether someone has already dealt with an overdue alarm for this run
    pub fn is_acknowledged(&self) -> bool {
        matches!(self.extra.get("deal_alarm"), Some(v) if !v.is_null())
    }
}

/// Shallow-merge the keys of `patch` into `base`.
///
/// A non-object `base` is replaced by an empty object first; a non-object
/// `patch` is ignored.
pub fn merge_extra(base: &mut Value, patch: &Value) {
    let Some(patch) = patch.as_object() else {
        return;
    };
    if !base.is_object() {
        *base = Value::Object(Map::new());
    }
    if let Some(target) = base.as_object_mut() {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Request payload for creating a task definition
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskRequest {
    pub task_key: String,
    #[serde(default)]
    pub description: String,
    pub execute_func: String,
    pub trigger_kind: String,
    pub spec: String,
    #[serde(default)]
    pub args: String,
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default = "default_status")]
    pub status: TaskStatus,
    #[serde(default = "default_extra")]
    pub extra: Value,
}

/// Request payload for updating a task definition
///
/// `task_key` and `execute_func` are fixed once created.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateTaskRequest {
    pub task_id: i32,
    #[serde(default)]
    pub description: String,
    pub trigger_kind: String,
    pub spec: String,
    #[serde(default)]
    pub args: String,
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default = "default_status")]
    pub status: TaskStatus,
    #[serde(default = "default_extra")]
    pub extra: Value,
}

fn default_status() -> TaskStatus {
    TaskStatus::Ready
}

fn default_extra() -> Value {
    Value::Object(Map::new())
}
