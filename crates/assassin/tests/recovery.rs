//! Recovery sweep integration tests

mod common;

use std::sync::Arc;
use std::time::Duration;

use assassin::{
    app::Application,
    config::Config,
    dedup_cache::MemoryDedupCache,
    models::TaskStatus,
    services::RecoverySweep,
    task_handlers::{HandlerRegistry, TaskContext},
};
use common::*;

fn noop_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register_fn("noop", |_ctx: TaskContext| async { anyhow::Ok(()) });
    registry
}

#[tokio::test]
async fn sweep_resets_only_valid_orphaned_permits() {
    let database = create_test_database().await;
    let tasks = task_repo(&database);

    create_task(&database, "orphaned", "noop", "interval", "60").await;
    create_task(&database, "idle", "noop", "interval", "60").await;
    let mut retired = task_request("retired", "noop", "interval", "60");
    retired.is_valid = false;
    retired.status = TaskStatus::Doing;
    tasks.create(retired).await.unwrap();

    // A process that dies here never releases the permit
    tasks.acquire_permit("orphaned", "lost").await.unwrap().unwrap();

    let reset = RecoverySweep::new(tasks.clone()).run().await.unwrap();
    assert_eq!(reset, 1);

    let status_of = |key: &'static str| {
        let tasks = tasks.clone();
        async move { tasks.find_by_task_key(key).await.unwrap().unwrap().status }
    };
    assert_eq!(status_of("orphaned").await, TaskStatus::Ready);
    assert_eq!(status_of("idle").await, TaskStatus::Ready);
    assert_eq!(status_of("retired").await, TaskStatus::Doing);

    // The freed permit can be taken again
    assert!(tasks.acquire_permit("orphaned", "again").await.unwrap().is_some());
    assert_eq!(RecoverySweep::new(tasks).run().await.unwrap(), 1);
}

#[tokio::test]
async fn start_recovers_before_the_first_reconciliation_when_enabled() {
    let database = create_test_database().await;
    let tasks = task_repo(&database);
    create_task(&database, "stuck", "noop", "interval", "3600").await;
    tasks.acquire_permit("stuck", "lost").await.unwrap().unwrap();

    let mut config = Config::default();
    config.scheduler.recover_on_startup = true;
    config.monitor.enabled = false;
    let app = Application::assemble(
        config,
        database.clone(),
        noop_registry(),
        RecordingNotifier::new(),
        Arc::new(MemoryDedupCache::new()),
        test_drain(Duration::from_secs(60)),
    )
    .unwrap();

    app.start().await.unwrap();

    let stuck = tasks.find_by_task_key("stuck").await.unwrap().unwrap();
    assert_eq!(stuck.status, TaskStatus::Ready);
    app.scheduler().shutdown().await;
}

#[tokio::test]
async fn start_leaves_permits_alone_by_default() {
    let database = create_test_database().await;
    let tasks = task_repo(&database);
    create_task(&database, "busy", "noop", "interval", "3600").await;
    tasks.acquire_permit("busy", "peer").await.unwrap().unwrap();

    let app = test_application(&database, noop_registry(), RecordingNotifier::new());
    app.start().await.unwrap();

    let busy = tasks.find_by_task_key("busy").await.unwrap().unwrap();
    assert_eq!(busy.status, TaskStatus::Doing);
    app.scheduler().shutdown().await;
}
