//! Job scheduling type definitions

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::SchedulerConfig;
use crate::config::defaults::{DEFAULT_COALESCE, DEFAULT_MAX_INSTANCES, DEFAULT_MISFIRE_GRACE_TIME};
use crate::errors::TriggerError;
use crate::trigger::ScheduleDirective;

/// Mutations of the in-process job table that cannot be applied
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobSchedulingError {
    #[error("a job with id `{0}` is already scheduled")]
    ConflictingId(String),

    #[error("no job with id `{0}`")]
    JobNotFound(String),

    #[error("the scheduler has been shut down")]
    ShuttingDown,
}

/// Why one row of a reconciliation pass could not be applied
#[derive(Error, Debug)]
pub enum ReconcileStepError {
    #[error("unknown handler `{0}`")]
    UnknownHandler(String),

    #[error(transparent)]
    Trigger(#[from] TriggerError),

    #[error(transparent)]
    Scheduling(#[from] JobSchedulingError),
}

/// Firing policy applied to every job of a scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobPolicy {
    /// Concurrent runs of one job id; further firings are skipped
    pub max_instances: usize,
    /// How late a firing may start before it counts as missed
    pub misfire_grace_time: Duration,
    /// Collapse a backlog of due firings into a single run
    pub coalesce: bool,
}

impl Default for JobPolicy {
    fn default() -> Self {
        Self {
            max_instances: DEFAULT_MAX_INSTANCES,
            misfire_grace_time: DEFAULT_MISFIRE_GRACE_TIME,
            coalesce: DEFAULT_COALESCE,
        }
    }
}

impl From<&SchedulerConfig> for JobPolicy {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            max_instances: config.max_instances.max(1),
            misfire_grace_time: config.misfire_grace_time,
            coalesce: config.coalesce,
        }
    }
}

pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Produces one run of a job each time it fires
pub type JobBody = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Snapshot of one entry of the job table
#[derive(Debug, Clone, PartialEq)]
pub struct JobInfo {
    pub id: String,
    pub directive: ScheduleDirective,
    /// `None` once a one-shot job has fired
    pub next_run_time: Option<DateTime<Utc>>,
}
