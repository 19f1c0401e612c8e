//! Shared harness for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assassin::{
    app::Application,
    config::{Config, DatabaseConfig},
    database::Database,
    database::repositories::{ExecuteTaskSeaOrmRepository, TaskSeaOrmRepository},
    dedup_cache::{DedupCache, MemoryDedupCache},
    drain::DrainController,
    models::{CreateTaskRequest, TaskDefinition, TaskStatus},
    notifier::Notifier,
    task_handlers::HandlerRegistry,
};

/// Fresh migrated in-memory database
pub async fn create_test_database() -> Database {
    let database = Database::new(&DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: None,
    })
    .await
    .expect("Failed to create test database");
    database.migrate().await.expect("Failed to run migrations");
    database
}

/// Fresh migrated SQLite file under `dir`, with a pool of `max_connections`
/// so that concurrent transactions really interleave
pub async fn create_file_database(dir: &std::path::Path, max_connections: u32) -> Database {
    let database = Database::new(&DatabaseConfig {
        url: format!("sqlite://{}/assassin.db", dir.display()),
        max_connections: Some(max_connections),
    })
    .await
    .expect("Failed to create file database");
    database.migrate().await.expect("Failed to run migrations");
    database
}

pub fn task_repo(database: &Database) -> TaskSeaOrmRepository {
    TaskSeaOrmRepository::new(database.connection())
}

pub fn execution_repo(database: &Database) -> ExecuteTaskSeaOrmRepository {
    ExecuteTaskSeaOrmRepository::new(database.connection())
}

/// Notifier that keeps every alert it receives
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, text: &str) -> bool {
        self.messages.lock().unwrap().push(text.to_string());
        true
    }
}

pub fn task_request(task_key: &str, execute_func: &str, trigger_kind: &str, spec: &str) -> CreateTaskRequest {
    CreateTaskRequest {
        task_key: task_key.to_string(),
        description: format!("{task_key} test task"),
        execute_func: execute_func.to_string(),
        trigger_kind: trigger_kind.to_string(),
        spec: spec.to_string(),
        args: String::new(),
        is_valid: true,
        status: TaskStatus::Ready,
        extra: json!({}),
    }
}

pub async fn create_task(
    database: &Database,
    task_key: &str,
    execute_func: &str,
    trigger_kind: &str,
    spec: &str,
) -> TaskDefinition {
    task_repo(database)
        .create(task_request(task_key, execute_func, trigger_kind, spec))
        .await
        .expect("Failed to create task")
}

pub async fn create_task_with_extra(database: &Database, task_key: &str, extra: Value) -> TaskDefinition {
    let mut request = task_request(task_key, "noop", "interval", "3600");
    request.extra = extra;
    task_repo(database)
        .create(request)
        .await
        .expect("Failed to create task")
}

/// Drain controller whose grace expiry does not end the test process
pub fn test_drain(grace: Duration) -> DrainController {
    DrainController::new(grace).with_exit_hook(Arc::new(|_| {}))
}

/// Application over `database` with in-memory dedup and a recording notifier
pub fn test_application(
    database: &Database,
    handlers: HandlerRegistry,
    notifier: Arc<RecordingNotifier>,
) -> Application {
    let dedup: Arc<dyn DedupCache> = Arc::new(MemoryDedupCache::new());
    Application::assemble(
        Config::default(),
        database.clone(),
        handlers,
        notifier,
        dedup,
        test_drain(Duration::from_secs(60)),
    )
    .expect("Failed to assemble application")
}

/// Poll `check` until it holds or `timeout` passes
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
