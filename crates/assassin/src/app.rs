//! Application wiring
//!
//! Builds every component from the configuration and owns their lifecycle:
//! recovery, the first reconciliation pass, registration of the periodic jobs,
//! the admin server and the signal-driven drain.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::config::defaults::{DEFAULT_PAGE_SIZE, MONITOR_JOB_ID, RECONCILE_JOB_ID};
use crate::database::Database;
use crate::database::repositories::{ExecuteTaskSeaOrmRepository, TaskSeaOrmRepository};
use crate::dedup_cache::{self, DedupCache};
use crate::drain::DrainController;
use crate::execution_lock::ExecutionLock;
use crate::job_scheduling::{JobBody, JobPolicy, JobScheduler, Reconciler};
use crate::models::TriggerKind;
use crate::notifier::{self, Notifier};
use crate::services::{OverdueMonitor, RecoverySweep};
use crate::task_handlers::HandlerRegistry;
use crate::trigger::{ScheduleDirective, TriggerCompiler};
use crate::utils::render_error_chain;
use crate::web::{AppState, WebServer};

pub struct Application {
    config: Config,
    database: Database,
    compiler: TriggerCompiler,
    drain: DrainController,
    notifier: Arc<dyn Notifier>,
    lock: Arc<ExecutionLock>,
    scheduler: Arc<JobScheduler>,
    reconciler: Arc<Reconciler>,
    monitor: Arc<OverdueMonitor>,
    recovery: RecoverySweep,
}

impl Application {
    /// Connect to the database, apply migrations and build every component
    pub async fn build(config: Config, handlers: HandlerRegistry) -> Result<Self> {
        let database = Database::new(&config.database).await?;
        database.migrate().await?;
        info!("Database connection established and migrations applied");

        let notifier = notifier::from_config(&config.notifier)?;
        let dedup = dedup_cache::from_config(&config.dedup, &database);
        let drain = DrainController::new(config.drain.grace_period);

        Self::assemble(config, database, handlers, notifier, dedup, drain)
    }

    /// Build from already constructed collaborators
    pub fn assemble(
        config: Config,
        database: Database,
        handlers: HandlerRegistry,
        notifier: Arc<dyn Notifier>,
        dedup: Arc<dyn DedupCache>,
        drain: DrainController,
    ) -> Result<Self> {
        let timezone = config.scheduler.timezone()?;
        let compiler = TriggerCompiler::new(timezone);
        let connection = database.connection();
        let tasks = TaskSeaOrmRepository::new(connection.clone());
        let executions = ExecuteTaskSeaOrmRepository::new(connection);

        let lock = Arc::new(ExecutionLock::new(
            tasks.clone(),
            notifier.clone(),
            drain.handle(),
        ));
        let scheduler = Arc::new(JobScheduler::new(
            JobPolicy::from(&config.scheduler),
            timezone,
            drain.shutdown_token(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            tasks.clone(),
            scheduler.clone(),
            compiler,
            Arc::new(handlers),
            lock.clone(),
            notifier.clone(),
        ));
        let monitor = Arc::new(OverdueMonitor::new(
            tasks.clone(),
            executions,
            dedup,
            notifier.clone(),
            config.monitor.clone(),
            timezone,
        ));
        let recovery = RecoverySweep::new(tasks);

        Ok(Self {
            config,
            database,
            compiler,
            drain,
            notifier,
            lock,
            scheduler,
            reconciler,
            monitor,
            recovery,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn drain(&self) -> &DrainController {
        &self.drain
    }

    pub fn notifier(&self) -> Arc<dyn Notifier> {
        self.notifier.clone()
    }

    pub fn execution_lock(&self) -> Arc<ExecutionLock> {
        self.lock.clone()
    }

    pub fn scheduler(&self) -> Arc<JobScheduler> {
        self.scheduler.clone()
    }

    pub fn reconciler(&self) -> Arc<Reconciler> {
        self.reconciler.clone()
    }

    pub fn monitor(&self) -> Arc<OverdueMonitor> {
        self.monitor.clone()
    }

    pub fn recovery(&self) -> &RecoverySweep {
        &self.recovery
    }

    /// State for the admin router
    pub fn web_state(&self) -> AppState {
        AppState::new(
            self.database.clone(),
            self.compiler,
            self.drain.handle(),
            DEFAULT_PAGE_SIZE,
        )
    }

    /// Recover (when configured), reconcile once and register the periodic jobs
    pub async fn start(&self) -> Result<()> {
        if self.config.scheduler.recover_on_startup {
            let reset = self.recovery.run().await?;
            if reset > 0 {
                warn!(reset, "Reset orphaned permits before the first reconciliation");
            }
        }

        let report = self.reconciler.sync().await;
        info!(
            added = report.added,
            failed = report.failed,
            "Initial reconciliation finished"
        );

        let interval = self.config.scheduler.reconcile_interval.as_secs().max(1);
        self.scheduler
            .add_job(
                RECONCILE_JOB_ID,
                ScheduleDirective::Every { seconds: interval },
                reconcile_body(self.reconciler.clone()),
            )
            .await?;
        info!(keyword = "add_job", job_id = RECONCILE_JOB_ID, interval_secs = interval);

        if self.config.monitor.enabled {
            let directive = self
                .compiler
                .compile(TriggerKind::Cron, &self.config.monitor.schedule)
                .context("Invalid monitor.schedule")?;
            self.scheduler
                .add_job(MONITOR_JOB_ID, directive, monitor_body(self.monitor.clone()))
                .await?;
            info!(
                keyword = "add_job",
                job_id = MONITOR_JOB_ID,
                schedule = %self.config.monitor.schedule
            );
        }

        Ok(())
    }

    /// Run until a termination signal has been received and the grace period
    /// has expired
    pub async fn run(self) -> Result<()> {
        self.start().await?;

        let web_task = if self.config.web.enabled {
            let server = WebServer::new(&self.config.web, self.web_state())?;
            info!("Starting web server on {}:{}", server.host(), server.port());

            let (ready_tx, ready_rx) = oneshot::channel();
            let shutdown = self.drain.shutdown_token();
            let task = tokio::spawn(async move {
                if let Err(e) = server.serve_with_cancellation(ready_tx, shutdown).await {
                    error!("Web server error: {}", e);
                }
            });
            ready_rx
                .await
                .context("Web server exited before reporting readiness")??;
            Some(task)
        } else {
            None
        };

        info!("Scheduler running, waiting for termination signal");
        let exit_timer = self.drain.listen_for_signals().await?;

        self.scheduler.shutdown().await;
        if let Some(task) = web_task {
            let _ = task.await;
        }
        if let Some(timer) = exit_timer {
            timer.await?;
        }
        Ok(())
    }
}

fn reconcile_body(reconciler: Arc<Reconciler>) -> JobBody {
    Arc::new(move || {
        let reconciler = reconciler.clone();
        Box::pin(async move {
            reconciler.sync().await;
        })
    })
}

fn monitor_body(monitor: Arc<OverdueMonitor>) -> JobBody {
    Arc::new(move || {
        let monitor = monitor.clone();
        Box::pin(async move {
            if let Err(e) = monitor.run().await {
                error!(
                    panic_keyword = "program_error",
                    err = %render_error_chain(&e),
                    "Overdue monitor pass failed"
                );
            }
        })
    })
}
