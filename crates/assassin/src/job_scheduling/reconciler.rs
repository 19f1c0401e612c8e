//! Reconciliation of task definitions into the job table
//!
//! Each pass walks every stored definition and makes the in-process job
//! table agree with it. A pass never aborts on one bad row: the failure is
//! logged, alerted and the walk continues.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::job_scheduler::JobScheduler;
use super::types::{JobBody, ReconcileStepError};
use crate::database::repositories::TaskSeaOrmRepository;
use crate::execution_lock::ExecutionLock;
use crate::models::TaskDefinition;
use crate::notifier::Notifier;
use crate::task_handlers::{HandlerRegistry, TaskHandler};
use crate::trigger::TriggerCompiler;

/// Counts of what one pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
    pub failed: usize,
    pub unchanged: usize,
}

impl ReconcileReport {
    /// True when the pass did not mutate the job table
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.modified == 0 && self.removed == 0
    }
}

pub struct Reconciler {
    tasks: TaskSeaOrmRepository,
    scheduler: Arc<JobScheduler>,
    compiler: TriggerCompiler,
    handlers: Arc<HandlerRegistry>,
    lock: Arc<ExecutionLock>,
    notifier: Arc<dyn Notifier>,
    /// Last applied spec per job id
    cache: Mutex<HashMap<String, String>>,
}

impl Reconciler {
    pub fn new(
        tasks: TaskSeaOrmRepository,
        scheduler: Arc<JobScheduler>,
        compiler: TriggerCompiler,
        handlers: Arc<HandlerRegistry>,
        lock: Arc<ExecutionLock>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            tasks,
            scheduler,
            compiler,
            handlers,
            lock,
            notifier,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Run one reconciliation pass
    pub async fn sync(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let tasks = match self.tasks.list_all().await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(
                    panic_keyword = "sync_schedule_task_err",
                    err = %e,
                    "Failed to load task definitions"
                );
                return report;
            }
        };

        for task in &tasks {
            // A cleared job table after shutdown is not drift
            if self.scheduler.is_shutdown() {
                debug!("scheduler shut down, reconciliation pass abandoned");
                return report;
            }
            self.sync_one(task, &mut report).await;
        }

        if report.is_noop() && report.failed == 0 {
            debug!(tasks = tasks.len(), "reconciliation pass: no changes");
        } else {
            info!(
                added = report.added,
                modified = report.modified,
                removed = report.removed,
                failed = report.failed,
                unchanged = report.unchanged,
                "reconciliation pass finished"
            );
        }
        report
    }

    async fn sync_one(&self, task: &TaskDefinition, report: &mut ReconcileReport) {
        let job_id = task.job_id();
        let existing = self.scheduler.get_job(&job_id).await.is_some();

        if !task.is_valid {
            self.cache.lock().await.remove(&job_id);
            if !existing {
                report.unchanged += 1;
                return;
            }
            match self.scheduler.remove_job(&job_id).await {
                Ok(()) => {
                    info!(keyword = "remove_job", job_id = %job_id, task_key = %task.task_key);
                    report.removed += 1;
                }
                Err(e) => {
                    error!(panic_keyword = "remove_job_err", job_id = %job_id, err = %e);
                    self.alert(format!("remove job {job_id} failed: {e}")).await;
                    report.failed += 1;
                }
            }
            return;
        }

        if existing {
            let known = self.cache.lock().await.get(&job_id).cloned();
            if known.as_deref() == Some(task.spec.as_str()) {
                report.unchanged += 1;
                return;
            }

            match self.reschedule(task, &job_id).await {
                Ok(()) => {
                    info!(
                        keyword = "modify_job",
                        job_id = %job_id,
                        trigger_kind = %task.trigger_kind,
                        spec = %task.spec,
                        previous_spec = known.as_deref().unwrap_or_default()
                    );
                    report.modified += 1;
                }
                Err(e) => {
                    error!(panic_keyword = "reschedule_job_err", job_id = %job_id, err = %e);
                    self.alert(format!("reschedule job {job_id} failed: {e}")).await;
                    report.failed += 1;
                }
            }
            return;
        }

        match self.register(task, &job_id).await {
            Ok(()) => {
                info!(
                    keyword = "add_job",
                    job_id = %job_id,
                    trigger_kind = %task.trigger_kind,
                    spec = %task.spec,
                    execute_func = %task.execute_func
                );
                report.added += 1;
            }
            Err(e) => {
                error!(panic_keyword = "sync_schedule_task_err", job_id = %job_id, err = %e);
                self.alert(format!("add job {job_id} failed: {e}")).await;
                report.failed += 1;
            }
        }
    }

    async fn reschedule(&self, task: &TaskDefinition, job_id: &str) -> Result<(), ReconcileStepError> {
        let reschedule = self
            .compiler
            .build_reschedule(&task.trigger_kind, &task.spec, job_id)?;
        self.scheduler.apply(reschedule).await?;
        self.cache
            .lock()
            .await
            .insert(job_id.to_string(), task.spec.clone());
        Ok(())
    }

    async fn register(&self, task: &TaskDefinition, job_id: &str) -> Result<(), ReconcileStepError> {
        let handler = self
            .handlers
            .get(&task.execute_func)
            .ok_or_else(|| ReconcileStepError::UnknownHandler(task.execute_func.clone()))?;
        let directive = self
            .compiler
            .build_registration(&task.trigger_kind, &task.spec)?;

        self.scheduler
            .add_job(job_id, directive, self.guarded_body(task, handler))
            .await?;
        self.cache
            .lock()
            .await
            .insert(job_id.to_string(), task.spec.clone());
        Ok(())
    }

    /// Each firing runs the handler behind the execution lock
    fn guarded_body(&self, task: &TaskDefinition, handler: Arc<dyn TaskHandler>) -> JobBody {
        let lock = self.lock.clone();
        let task_key = task.task_key.clone();
        let args = task.args.clone();

        Arc::new(move || {
            let lock = lock.clone();
            let task_key = task_key.clone();
            let args = args.clone();
            let handler = handler.clone();
            Box::pin(async move {
                lock.run_guarded(&task_key, handler, &args).await;
            })
        })
    }

    async fn alert(&self, text: String) {
        self.notifier.notify(&text).await;
    }

    /// Spec last applied for `job_id`, if any
    pub async fn cached_spec(&self, job_id: &str) -> Option<String> {
        self.cache.lock().await.get(job_id).cloned()
    }
}
