//! In-process job table
//!
//! Every job is driven by its own tokio task that sleeps until the next
//! firing of its [`ScheduleDirective`]. Reschedules reach the driver through
//! a watch channel; removal and shutdown through a cancellation token.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::types::{JobBody, JobInfo, JobPolicy, JobSchedulingError};
use crate::trigger::{RescheduleDirective, ScheduleDirective};

type Update = (ScheduleDirective, Option<DateTime<Utc>>);

struct JobEntry {
    generation: u64,
    directive: ScheduleDirective,
    next_run_time: Option<DateTime<Utc>>,
    updates: watch::Sender<Update>,
    cancel: CancellationToken,
}

type JobTable = Arc<Mutex<HashMap<String, JobEntry>>>;

/// Owns the job table of one process
pub struct JobScheduler {
    jobs: JobTable,
    policy: JobPolicy,
    timezone: Tz,
    shutdown: CancellationToken,
    generation: AtomicU64,
}

impl JobScheduler {
    /// Create a scheduler whose jobs stop when `shutdown` is cancelled
    pub fn new(policy: JobPolicy, timezone: Tz, shutdown: CancellationToken) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            policy,
            timezone,
            shutdown,
            generation: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> JobPolicy {
        self.policy
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Register `body` under `id` and start firing it on `directive`
    pub async fn add_job(
        &self,
        id: &str,
        directive: ScheduleDirective,
        body: JobBody,
    ) -> Result<(), JobSchedulingError> {
        if self.is_shutdown() {
            return Err(JobSchedulingError::ShuttingDown);
        }

        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(id) {
            return Err(JobSchedulingError::ConflictingId(id.to_string()));
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let next_run_time = directive.first_fire_time(Utc::now(), self.timezone);
        let (updates, receiver) = watch::channel((directive.clone(), next_run_time));
        let cancel = self.shutdown.child_token();

        jobs.insert(
            id.to_string(),
            JobEntry {
                generation,
                directive: directive.clone(),
                next_run_time,
                updates,
                cancel: cancel.clone(),
            },
        );
        drop(jobs);

        let driver = JobDriver {
            id: id.to_string(),
            generation,
            body,
            policy: self.policy,
            timezone: self.timezone,
            jobs: self.jobs.clone(),
            cancel,
            running: Arc::new(AtomicUsize::new(0)),
        };
        tokio::spawn(driver.run(receiver, directive, next_run_time));

        debug!(job_id = id, next_run_time = ?next_run_time, "job added");
        Ok(())
    }

    /// Replace the trigger of a live job; the next firing is computed from now
    pub async fn reschedule_job(
        &self,
        id: &str,
        directive: ScheduleDirective,
    ) -> Result<(), JobSchedulingError> {
        let mut jobs = self.jobs.lock().await;
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| JobSchedulingError::JobNotFound(id.to_string()))?;

        let next_run_time = directive.first_fire_time(Utc::now(), self.timezone);
        entry.directive = directive.clone();
        entry.next_run_time = next_run_time;
        entry.updates.send_replace((directive, next_run_time));

        debug!(job_id = id, next_run_time = ?next_run_time, "job rescheduled");
        Ok(())
    }

    pub async fn apply(&self, reschedule: RescheduleDirective) -> Result<(), JobSchedulingError> {
        self.reschedule_job(&reschedule.job_id, reschedule.directive)
            .await
    }

    /// Stop firing `id`; runs already in flight are left to finish
    pub async fn remove_job(&self, id: &str) -> Result<(), JobSchedulingError> {
        let entry = self
            .jobs
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| JobSchedulingError::JobNotFound(id.to_string()))?;
        entry.cancel.cancel();

        debug!(job_id = id, "job removed");
        Ok(())
    }

    pub async fn get_job(&self, id: &str) -> Option<JobInfo> {
        self.jobs.lock().await.get(id).map(|entry| JobInfo {
            id: id.to_string(),
            directive: entry.directive.clone(),
            next_run_time: entry.next_run_time,
        })
    }

    /// Ids of every job in the table, sorted
    pub async fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stop every driver and refuse further registrations
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.jobs.lock().await.clear();
        debug!("job scheduler shut down");
    }
}

struct JobDriver {
    id: String,
    generation: u64,
    body: JobBody,
    policy: JobPolicy,
    timezone: Tz,
    jobs: JobTable,
    cancel: CancellationToken,
    running: Arc<AtomicUsize>,
}

impl JobDriver {
    async fn run(
        self,
        mut updates: watch::Receiver<Update>,
        mut directive: ScheduleDirective,
        mut next: Option<DateTime<Utc>>,
    ) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    (directive, next) = updates.borrow_and_update().clone();
                    self.publish(next).await;
                    continue;
                }
                _ = wait_until(next) => {}
            }

            let Some(due) = next else {
                continue;
            };
            next = self.fire(&directive, due, Utc::now());
            self.publish(next).await;
        }

        debug!(job_id = %self.id, "job driver stopped");
    }

    /// Start the run owed for `due` and return the firing after it
    fn fire(
        &self,
        directive: &ScheduleDirective,
        due: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let mut run_time = due;
        let mut following = directive.next_fire_after(due, self.timezone);
        if self.policy.coalesce {
            while let Some(candidate) = following.filter(|at| *at <= now) {
                run_time = candidate;
                following = directive.next_fire_after(candidate, self.timezone);
            }
        }

        let lateness = (now - run_time).to_std().unwrap_or(Duration::ZERO);
        if lateness > self.policy.misfire_grace_time {
            warn!(
                panic_keyword = "program_error",
                job_id = %self.id,
                run_time = %run_time,
                "Run time of job was missed by {:?}",
                lateness
            );
        } else {
            self.start_run();
        }

        following
    }

    fn start_run(&self) {
        if self.running.load(Ordering::SeqCst) >= self.policy.max_instances {
            warn!(
                panic_keyword = "program_error",
                job_id = %self.id,
                max_instances = self.policy.max_instances,
                "Execution of job skipped: reached maximum of running instances"
            );
            return;
        }

        self.running.fetch_add(1, Ordering::SeqCst);
        let guard = RunningGuard(self.running.clone());
        let run = (self.body)();
        tokio::spawn(async move {
            let _guard = guard;
            run.await;
        });
    }

    async fn publish(&self, next: Option<DateTime<Utc>>) {
        let mut jobs = self.jobs.lock().await;
        if let Some(entry) = jobs.get_mut(&self.id) {
            if entry.generation == self.generation {
                entry.next_run_time = next;
            }
        }
    }
}

struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn wait_until(at: Option<DateTime<Utc>>) {
    match at {
        Some(at) => {
            let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(delay).await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::OneShot;
    use chrono::TimeDelta;
    use tokio::sync::{Notify, mpsc};

    fn counting_body(count: Arc<AtomicUsize>, hold: Arc<Notify>) -> JobBody {
        Arc::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
            let hold = hold.clone();
            Box::pin(async move { hold.notified().await })
        })
    }

    fn driver(policy: JobPolicy, body: JobBody) -> JobDriver {
        JobDriver {
            id: "1_test".to_string(),
            generation: 0,
            body,
            policy,
            timezone: Tz::UTC,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn noop_body() -> JobBody {
        Arc::new(|| Box::pin(async {}))
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let scheduler = JobScheduler::new(JobPolicy::default(), Tz::UTC, CancellationToken::new());
        let directive = ScheduleDirective::Every { seconds: 3600 };

        scheduler.add_job("1_a", directive.clone(), noop_body()).await.unwrap();
        let err = scheduler.add_job("1_a", directive, noop_body()).await.unwrap_err();
        assert_eq!(err, JobSchedulingError::ConflictingId("1_a".to_string()));
    }

    #[tokio::test]
    async fn unknown_ids_are_reported() {
        let scheduler = JobScheduler::new(JobPolicy::default(), Tz::UTC, CancellationToken::new());

        assert_eq!(
            scheduler.remove_job("9_x").await.unwrap_err(),
            JobSchedulingError::JobNotFound("9_x".to_string())
        );
        assert_eq!(
            scheduler
                .reschedule_job("9_x", ScheduleDirective::Every { seconds: 5 })
                .await
                .unwrap_err(),
            JobSchedulingError::JobNotFound("9_x".to_string())
        );
        assert!(scheduler.get_job("9_x").await.is_none());
    }

    #[tokio::test]
    async fn immediate_one_shot_fires_once_and_stays_registered() {
        let scheduler = JobScheduler::new(JobPolicy::default(), Tz::UTC, CancellationToken::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let body: JobBody = Arc::new(move || {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(());
            })
        });

        scheduler
            .add_job("3_once", ScheduleDirective::Once(OneShot::Immediate), body)
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("one-shot did not fire")
            .unwrap();

        let mut info = scheduler.get_job("3_once").await.unwrap();
        for _ in 0..50 {
            if info.next_run_time.is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            info = scheduler.get_job("3_once").await.unwrap();
        }
        assert_eq!(info.next_run_time, None);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reschedule_replaces_directive() {
        let scheduler = JobScheduler::new(JobPolicy::default(), Tz::UTC, CancellationToken::new());
        scheduler
            .add_job("2_every", ScheduleDirective::Every { seconds: 3600 }, noop_body())
            .await
            .unwrap();

        scheduler
            .apply(RescheduleDirective {
                job_id: "2_every".to_string(),
                directive: ScheduleDirective::Every { seconds: 7200 },
            })
            .await
            .unwrap();

        let info = scheduler.get_job("2_every").await.unwrap();
        assert_eq!(info.directive, ScheduleDirective::Every { seconds: 7200 });
        let next = info.next_run_time.unwrap();
        assert!(next > Utc::now() + TimeDelta::seconds(3600));
    }

    #[tokio::test]
    async fn removed_and_shut_down_jobs_leave_the_table() {
        let scheduler = JobScheduler::new(JobPolicy::default(), Tz::UTC, CancellationToken::new());
        for id in ["1_a", "2_b"] {
            scheduler
                .add_job(id, ScheduleDirective::Every { seconds: 60 }, noop_body())
                .await
                .unwrap();
        }

        scheduler.remove_job("1_a").await.unwrap();
        assert_eq!(scheduler.job_ids().await, vec!["2_b".to_string()]);

        scheduler.shutdown().await;
        assert!(scheduler.job_ids().await.is_empty());
        assert_eq!(
            scheduler
                .add_job("3_c", ScheduleDirective::Every { seconds: 60 }, noop_body())
                .await
                .unwrap_err(),
            JobSchedulingError::ShuttingDown
        );
    }

    #[tokio::test]
    async fn backlog_is_coalesced_into_one_run() {
        let count = Arc::new(AtomicUsize::new(0));
        let hold = Arc::new(Notify::new());
        let driver = driver(JobPolicy::default(), counting_body(count.clone(), hold));
        let now = Utc::now();
        let directive = ScheduleDirective::Every { seconds: 60 };

        let next = driver.fire(&directive, now - TimeDelta::seconds(300), now);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(next, Some(now + TimeDelta::seconds(60)));
    }

    #[tokio::test]
    async fn firing_past_grace_is_skipped() {
        let count = Arc::new(AtomicUsize::new(0));
        let hold = Arc::new(Notify::new());
        let driver = driver(JobPolicy::default(), counting_body(count.clone(), hold));
        let now = Utc::now();
        let due = now - TimeDelta::seconds(120);

        let next = driver.fire(&ScheduleDirective::Once(OneShot::At(due)), due, now);

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(next, None);
    }

    #[tokio::test]
    async fn running_instance_limit_skips_firings() {
        let count = Arc::new(AtomicUsize::new(0));
        let hold = Arc::new(Notify::new());
        let driver = driver(JobPolicy::default(), counting_body(count.clone(), hold.clone()));
        let directive = ScheduleDirective::Every { seconds: 10 };
        let now = Utc::now();

        driver.fire(&directive, now, now);
        driver.fire(&directive, now, now);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(driver.running.load(Ordering::SeqCst), 1);

        hold.notify_one();
        for _ in 0..50 {
            if driver.running.load(Ordering::SeqCst) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        driver.fire(&directive, now, now);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
