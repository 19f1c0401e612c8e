/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
use std::time::Duration;

// Database defaults
pub const DEFAULT_DATABASE_URL: &str = "sqlite://./assassin.db";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

// Web server defaults
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_PAGE_SIZE: u64 = 20;

// Scheduler defaults
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MISFIRE_GRACE_TIME: Duration = Duration::from_secs(60);
pub const DEFAULT_COALESCE: bool = true;
pub const DEFAULT_MAX_INSTANCES: usize = 1;
pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_RECOVER_ON_STARTUP: bool = false;

// Overdue monitor defaults
pub const DEFAULT_MONITOR_SCHEDULE: &str = "* * * * *";
pub const DEFAULT_MONITOR_DEDUP_KEY: &str = "assassin:overdue_monitor";
pub const DEFAULT_MONITOR_DEDUP_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_TASK_DELAY_SECS: i64 = 3600;

// Drain defaults
pub const DEFAULT_DRAIN_GRACE_PERIOD: Duration = Duration::from_secs(10);

// Notifier defaults
pub const DEFAULT_NOTIFIER_TIMEOUT: Duration = Duration::from_secs(5);

// Reserved scheduler job ids
pub const RECONCILE_JOB_ID: &str = "sync_task_all";
pub const MONITOR_JOB_ID: &str = "overdue_monitor";
