//! Exactly-one-running-execution guard
//!
//! The task row is the lock. Acquisition flips it `ready -> doing` and opens
//! an execution record in one transaction; the record id is the token that
//! travels with the attempt. Release flips the row back to `ready` and closes
//! the record in a second transaction, whatever the handler did.
//!
//! A crash between the two transactions leaves the row `doing` until the
//! recovery sweep runs.

use futures::FutureExt;
use serde_json::json;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::repositories::TaskSeaOrmRepository;
use crate::drain::DrainHandle;
use crate::models::ExecutionStatus;
use crate::notifier::Notifier;
use crate::task_handlers::{TaskContext, TaskHandler};
use crate::utils::{instance_name, render_error_chain};

/// What happened to one guarded attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    /// The process is draining; nothing was attempted
    Refused,
    /// Another execution holds the permit, or the task is invalid or unknown
    NotAcquired,
    /// The handler ran and the permit was returned
    Completed { token: i32, status: ExecutionStatus },
    /// The handler ran but returning the permit failed; the row stays `doing`
    ReleaseFailed { token: i32 },
}

#[derive(Clone)]
pub struct ExecutionLock {
    tasks: TaskSeaOrmRepository,
    notifier: Arc<dyn Notifier>,
    drain: DrainHandle,
}

impl ExecutionLock {
    pub fn new(tasks: TaskSeaOrmRepository, notifier: Arc<dyn Notifier>, drain: DrainHandle) -> Self {
        Self {
            tasks,
            notifier,
            drain,
        }
    }

    /// Run `handler` for `task_key` if, and only if, this call wins the permit.
    ///
    /// Never fails: every error is logged, recorded on the execution record,
    /// or escalated to the notifier.
    pub async fn run_guarded(
        &self,
        task_key: &str,
        handler: Arc<dyn TaskHandler>,
        args: &str,
    ) -> GuardOutcome {
        let instance = instance_name();

        if self.drain.is_draining() {
            info!(keyword = "receive_sigterm", instance, task_key, "Draining, execution refused");
            return GuardOutcome::Refused;
        }

        let trace_id = Uuid::new_v4().simple().to_string();

        let permit = match self.tasks.acquire_permit(task_key, &trace_id).await {
            Ok(Some(permit)) => permit,
            Ok(None) => {
                info!(keyword = "get_no_lock", instance, task_key, trace_id = %trace_id);
                return GuardOutcome::NotAcquired;
            }
            Err(e) => {
                warn!(
                    keyword = "get_no_lock",
                    instance,
                    task_key,
                    trace_id = %trace_id,
                    err = %e,
                    "Permit acquisition failed"
                );
                return GuardOutcome::NotAcquired;
            }
        };

        let token = permit.token;
        info!(keyword = "get_lock", instance, task_key, token, trace_id = %trace_id);

        let ctx = TaskContext {
            task_key: task_key.to_string(),
            args: args.to_string(),
            token,
            trace_id: trace_id.clone(),
        };

        let (status, patch) = match AssertUnwindSafe(handler.call(ctx)).catch_unwind().await {
            Ok(Ok(())) => (
                ExecutionStatus::Success,
                json!({ "status": ExecutionStatus::Success.as_str() }),
            ),
            Ok(Err(e)) => {
                let trace = render_error_chain(&e);
                error!(
                    panic_keyword = "execute_task",
                    err_type = "execute_task",
                    instance,
                    task_key,
                    token,
                    trace_id = %trace_id,
                    err = %trace,
                    "Task handler failed"
                );
                (
                    ExecutionStatus::Fail,
                    json!({ "status": ExecutionStatus::Fail.as_str(), "err": trace }),
                )
            }
            Err(panic) => {
                let trace = format!("handler panicked: {}", panic_message(panic.as_ref()));
                error!(
                    panic_keyword = "execute_task",
                    err_type = "execute_task",
                    instance,
                    task_key,
                    token,
                    trace_id = %trace_id,
                    err = %trace,
                    "Task handler panicked"
                );
                (
                    ExecutionStatus::Fail,
                    json!({ "status": ExecutionStatus::Fail.as_str(), "err": trace }),
                )
            }
        };

        match self.tasks.release_permit(task_key, token, status, &patch).await {
            Ok(()) => {
                info!(
                    keyword = "release_lock",
                    instance,
                    task_key,
                    token,
                    trace_id = %trace_id,
                    status = status.as_str()
                );
                GuardOutcome::Completed { token, status }
            }
            Err(e) => {
                error!(
                    panic_keyword = "release_lock_err",
                    instance,
                    task_key,
                    token,
                    trace_id = %trace_id,
                    err = %e,
                    "Failed to release permit"
                );
                self.notifier
                    .notify(&format!(
                        "execute task {task_key}, release permit failed: {e} (token {token}, trace_id {trace_id})"
                    ))
                    .await;
                GuardOutcome::ReleaseFailed { token }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
