//! Overdue task monitor
//!
//! Flags valid tasks whose latest execution is older than the task allows and
//! sends one combined alert per pass. Only the instance that wins the dedup
//! key for the current window does any work.

use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::database::repositories::{ExecuteTaskSeaOrmRepository, TaskSeaOrmRepository};
use crate::dedup_cache::DedupCache;
use crate::models::{ExecutionRecord, TIMESTAMP_FORMAT, TaskDefinition};
use crate::notifier::Notifier;
use crate::utils::instance_name;

/// Result of one monitor pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// A peer owns the current window
    Skipped,
    /// Nothing is overdue
    Clean,
    /// `count` tasks were reported in one alert
    Alerted { count: usize, delivered: bool },
}

pub struct OverdueMonitor {
    tasks: TaskSeaOrmRepository,
    executions: ExecuteTaskSeaOrmRepository,
    dedup: Arc<dyn DedupCache>,
    notifier: Arc<dyn Notifier>,
    config: MonitorConfig,
    timezone: Tz,
}

impl OverdueMonitor {
    pub fn new(
        tasks: TaskSeaOrmRepository,
        executions: ExecuteTaskSeaOrmRepository,
        dedup: Arc<dyn DedupCache>,
        notifier: Arc<dyn Notifier>,
        config: MonitorConfig,
        timezone: Tz,
    ) -> Self {
        Self {
            tasks,
            executions,
            dedup,
            notifier,
            config,
            timezone,
        }
    }

    pub async fn run(&self) -> Result<MonitorOutcome> {
        self.run_at(Utc::now()).await
    }

    /// Run one pass as if the current time were `now`
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<MonitorOutcome> {
        let owner = self
            .dedup
            .set_if_absent(&self.config.dedup_key, instance_name(), self.config.dedup_ttl)
            .await?;
        if !owner {
            debug!(dedup_key = %self.config.dedup_key, "monitor window owned by a peer");
            return Ok(MonitorOutcome::Skipped);
        }

        let mut lines = Vec::new();
        for task in self.tasks.list_valid().await? {
            let record = match self.executions.latest_for_task(task.id).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    warn!(task_key = %task.task_key, err = %e, "Failed to load latest execution");
                    continue;
                }
            };

            if let Some(line) = self.overdue_line(&task, &record, now) {
                lines.push(line);
                let stamp = json!({ "alarm_sub_task": record.id });
                if let Err(e) = self.tasks.merge_extra(task.id, &stamp).await {
                    warn!(task_key = %task.task_key, err = %e, "Failed to stamp alarm_sub_task");
                }
            }
        }

        if lines.is_empty() {
            debug!("no overdue tasks");
            return Ok(MonitorOutcome::Clean);
        }

        let count = lines.len();
        let delivered = self
            .notifier
            .notify(&format!("overdue tasks:\n{}", lines.join("\n")))
            .await;
        info!(count, delivered, "overdue tasks reported");
        Ok(MonitorOutcome::Alerted { count, delivered })
    }

    fn overdue_line(
        &self,
        task: &TaskDefinition,
        record: &ExecutionRecord,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let delay = task.delay_secs(self.config.default_delay_secs);
        let elapsed = now.signed_duration_since(record.created_at).num_seconds();
        if elapsed <= delay || record.is_acknowledged() {
            return None;
        }

        let last_run_time = record.created_at.with_timezone(&self.timezone);
        Some(format!(
            "{} — {}s — {}",
            task.task_key,
            delay,
            last_run_time.format(TIMESTAMP_FORMAT)
        ))
    }
}
