//! Reconciliation loop integration tests

mod common;

use chrono::{TimeDelta, Utc};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assassin::{
    config::defaults::{MONITOR_JOB_ID, RECONCILE_JOB_ID},
    models::{ExecutionStatus, TaskStatus, UpdateTaskRequest},
    task_handlers::{HandlerRegistry, TaskContext},
    trigger::{OneShot, ScheduleDirective},
};
use common::*;

fn counting_registry(calls: Arc<AtomicUsize>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register_fn("count", move |_ctx: TaskContext| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });
    registry
}

fn update_for(task: &assassin::models::TaskDefinition) -> UpdateTaskRequest {
    UpdateTaskRequest {
        task_id: task.id,
        description: task.description.clone(),
        trigger_kind: task.trigger_kind.clone(),
        spec: task.spec.clone(),
        args: task.args.clone(),
        is_valid: task.is_valid,
        status: task.status,
        extra: task.extra.clone(),
    }
}

#[tokio::test]
async fn first_pass_registers_an_interval_job() {
    let database = create_test_database().await;
    let task = create_task(&database, "sync", "count", "interval", "10").await;
    let calls = Arc::new(AtomicUsize::new(0));
    let app = test_application(&database, counting_registry(calls), RecordingNotifier::new());

    let before = Utc::now();
    let report = app.reconciler().sync().await;
    assert_eq!(report.added, 1);
    assert_eq!(report.failed, 0);

    let job = app.scheduler().get_job(&task.job_id()).await.unwrap();
    assert_eq!(job.id, "1_sync");
    assert_eq!(job.directive, ScheduleDirective::Every { seconds: 10 });
    let next = job.next_run_time.unwrap();
    assert!(next >= before + TimeDelta::seconds(10));
    assert!(next <= Utc::now() + TimeDelta::seconds(10));
    assert_eq!(app.reconciler().cached_spec("1_sync").await.as_deref(), Some("10"));
}

#[tokio::test]
async fn registered_job_runs_behind_the_lock() {
    let database = create_test_database().await;
    let task = create_task(&database, "kickoff", "count", "date", "now").await;
    let calls = Arc::new(AtomicUsize::new(0));
    let app = test_application(&database, counting_registry(calls.clone()), RecordingNotifier::new());

    app.reconciler().sync().await;

    let executions = execution_repo(&database);
    let task_id = task.id;
    let finished = eventually(Duration::from_secs(5), || {
        let executions = executions.clone();
        async move {
            matches!(
                executions.latest_for_task(task_id).await,
                Ok(Some(record)) if record.status == ExecutionStatus::Success
            )
        }
    })
    .await;
    assert!(finished, "one-shot job did not complete");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let task = task_repo(&database).find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Ready);

    // The fired one-shot stays registered, so the next pass leaves it alone
    let report = app.reconciler().sync().await;
    assert!(report.is_noop());
    let job = app.scheduler().get_job("1_kickoff").await.unwrap();
    assert_eq!(job.directive, ScheduleDirective::Once(OneShot::Immediate));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn second_pass_without_changes_is_a_noop() {
    let database = create_test_database().await;
    create_task(&database, "a", "count", "interval", "60").await;
    create_task(&database, "b", "count", "cron", "*/5 * * * *").await;
    create_task(&database, "c", "count", "date", "2099-01-01 00:00:00").await;
    let app = test_application(
        &database,
        counting_registry(Arc::default()),
        RecordingNotifier::new(),
    );

    let first = app.reconciler().sync().await;
    assert_eq!(first.added, 3);

    let second = app.reconciler().sync().await;
    assert!(second.is_noop());
    assert_eq!(second.unchanged, 3);
    assert_eq!(app.scheduler().job_ids().await, vec!["1_a", "2_b", "3_c"]);
}

#[tokio::test]
async fn spec_change_reschedules_the_live_job() {
    let database = create_test_database().await;
    let task = create_task(&database, "sync", "count", "interval", "60").await;
    let app = test_application(
        &database,
        counting_registry(Arc::default()),
        RecordingNotifier::new(),
    );
    app.reconciler().sync().await;

    let mut update = update_for(&task);
    update.trigger_kind = "cron".to_string();
    update.spec = "30 2 * * 1-5".to_string();
    task_repo(&database).update(update).await.unwrap();

    let report = app.reconciler().sync().await;
    assert_eq!(report.modified, 1);
    assert_eq!(report.added, 0);

    let job = app.scheduler().get_job("1_sync").await.unwrap();
    assert_eq!(job.directive.spec_string(chrono_tz::Tz::UTC), "30 2 * * 1-5");
    assert_eq!(
        app.reconciler().cached_spec("1_sync").await.as_deref(),
        Some("30 2 * * 1-5")
    );
}

#[tokio::test]
async fn invalidated_task_is_removed() {
    let database = create_test_database().await;
    let task = create_task(&database, "sync", "count", "interval", "60").await;
    let app = test_application(
        &database,
        counting_registry(Arc::default()),
        RecordingNotifier::new(),
    );
    app.reconciler().sync().await;

    let mut update = update_for(&task);
    update.is_valid = false;
    task_repo(&database).update(update).await.unwrap();

    let report = app.reconciler().sync().await;
    assert_eq!(report.removed, 1);
    assert!(app.scheduler().get_job("1_sync").await.is_none());
    assert!(app.reconciler().cached_spec("1_sync").await.is_none());

    let report = app.reconciler().sync().await;
    assert!(report.is_noop());
}

#[tokio::test]
async fn pass_after_shutdown_neither_registers_nor_alerts() {
    let database = create_test_database().await;
    create_task(&database, "sync", "count", "interval", "60").await;
    create_task(&database, "report", "count", "interval", "60").await;
    let notifier = RecordingNotifier::new();
    let app = test_application(&database, counting_registry(Arc::default()), notifier.clone());
    assert_eq!(app.reconciler().sync().await.added, 2);

    app.scheduler().shutdown().await;
    let report = app.reconciler().sync().await;

    assert!(report.is_noop());
    assert_eq!(report.failed, 0);
    assert!(notifier.messages().is_empty());
    assert!(app.scheduler().job_ids().await.is_empty());
}

#[tokio::test]
async fn unknown_handler_is_alerted_and_retried() {
    let database = create_test_database().await;
    create_task(&database, "ghost", "not_registered", "interval", "60").await;
    create_task(&database, "sync", "count", "interval", "60").await;
    let notifier = RecordingNotifier::new();
    let app = test_application(&database, counting_registry(Arc::default()), notifier.clone());

    let report = app.reconciler().sync().await;
    assert_eq!(report.added, 1);
    assert_eq!(report.failed, 1);
    assert!(app.scheduler().get_job("1_ghost").await.is_none());
    assert!(app.scheduler().get_job("2_sync").await.is_some());
    assert!(app.reconciler().cached_spec("1_ghost").await.is_none());

    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("add job 1_ghost failed: unknown handler"));

    let report = app.reconciler().sync().await;
    assert_eq!(report.failed, 1);
    assert_eq!(notifier.messages().len(), 2);
}

#[tokio::test]
async fn bad_stored_spec_does_not_block_other_rows() {
    let database = create_test_database().await;
    create_task(&database, "broken", "count", "cron", "every tuesday").await;
    create_task(&database, "weird_kind", "count", "hourly", "0 * * * *").await;
    create_task(&database, "fine", "count", "interval", "5").await;
    let notifier = RecordingNotifier::new();
    let app = test_application(&database, counting_registry(Arc::default()), notifier.clone());

    let report = app.reconciler().sync().await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.added, 2);

    // Unknown stored kinds compile as cron
    let job = app.scheduler().get_job("2_weird_kind").await.unwrap();
    assert!(matches!(job.directive, ScheduleDirective::Cron(_)));

    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("add job 1_broken failed:"));
}

#[tokio::test]
async fn start_registers_the_periodic_jobs() {
    let database = create_test_database().await;
    create_task_with_extra(&database, "nightly", json!({})).await;
    let mut registry = counting_registry(Arc::default());
    registry.register_fn("noop", |_ctx: TaskContext| async move { Ok(()) });
    let app = test_application(&database, registry, RecordingNotifier::new());

    app.start().await.unwrap();

    let ids = app.scheduler().job_ids().await;
    assert!(ids.contains(&"1_nightly".to_string()));
    assert!(ids.contains(&RECONCILE_JOB_ID.to_string()));
    assert!(ids.contains(&MONITOR_JOB_ID.to_string()));

    let reconcile = app.scheduler().get_job(RECONCILE_JOB_ID).await.unwrap();
    assert_eq!(reconcile.directive, ScheduleDirective::Every { seconds: 10 });

    app.scheduler().shutdown().await;
    assert!(app.scheduler().job_ids().await.is_empty());
}
