use anyhow::{Context, Result};
use chrono_tz::Tz;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

pub mod defaults;
pub mod duration_serde;

use defaults::*;
use duration_serde::duration;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "ASSASSIN_";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub drain: DrainConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often task definitions are reconciled into the job table
    #[serde(default = "default_reconcile_interval", with = "duration")]
    pub reconcile_interval: Duration,
    /// Late firings within this window still run
    #[serde(default = "default_misfire_grace_time", with = "duration")]
    pub misfire_grace_time: Duration,
    #[serde(default = "default_coalesce")]
    pub coalesce: bool,
    #[serde(default = "default_max_instances")]
    pub max_instances: usize,
    /// IANA timezone used for cron cadences and naive date specs
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_recover_on_startup")]
    pub recover_on_startup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Crontab cadence of the overdue check
    #[serde(default = "default_monitor_schedule")]
    pub schedule: String,
    #[serde(default = "default_monitor_dedup_key")]
    pub dedup_key: String,
    #[serde(default = "default_monitor_dedup_ttl", with = "duration")]
    pub dedup_ttl: Duration,
    /// Allowed age of the latest execution when a task sets no `extra.delay`
    #[serde(default = "default_task_delay_secs")]
    pub default_delay_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainConfig {
    #[serde(default = "default_drain_grace_period", with = "duration")]
    pub grace_period: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Robot webhook endpoint; alerts are only logged when unset
    pub webhook_url: Option<String>,
    pub access_token: Option<String>,
    #[serde(default = "default_notifier_timeout", with = "duration")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DedupBackend {
    #[default]
    Database,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DedupConfig {
    #[serde(default)]
    pub backend: DedupBackend,
}

fn default_true() -> bool {
    true
}

fn default_database_url() -> String {
    DEFAULT_DATABASE_URL.to_string()
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_reconcile_interval() -> Duration {
    DEFAULT_RECONCILE_INTERVAL
}

fn default_misfire_grace_time() -> Duration {
    DEFAULT_MISFIRE_GRACE_TIME
}

fn default_coalesce() -> bool {
    DEFAULT_COALESCE
}

fn default_max_instances() -> usize {
    DEFAULT_MAX_INSTANCES
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_recover_on_startup() -> bool {
    DEFAULT_RECOVER_ON_STARTUP
}

fn default_monitor_schedule() -> String {
    DEFAULT_MONITOR_SCHEDULE.to_string()
}

fn default_monitor_dedup_key() -> String {
    DEFAULT_MONITOR_DEDUP_KEY.to_string()
}

fn default_monitor_dedup_ttl() -> Duration {
    DEFAULT_MONITOR_DEDUP_TTL
}

fn default_task_delay_secs() -> i64 {
    DEFAULT_TASK_DELAY_SECS
}

fn default_drain_grace_period() -> Duration {
    DEFAULT_DRAIN_GRACE_PERIOD
}

fn default_notifier_timeout() -> Duration {
    DEFAULT_NOTIFIER_TIMEOUT
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: Some(DEFAULT_MAX_CONNECTIONS),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: default_reconcile_interval(),
            misfire_grace_time: default_misfire_grace_time(),
            coalesce: default_coalesce(),
            max_instances: default_max_instances(),
            timezone: default_timezone(),
            recover_on_startup: default_recover_on_startup(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: default_monitor_schedule(),
            dedup_key: default_monitor_dedup_key(),
            dedup_ttl: default_monitor_dedup_ttl(),
            default_delay_secs: default_task_delay_secs(),
        }
    }
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            grace_period: default_drain_grace_period(),
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            access_token: None,
            timeout: default_notifier_timeout(),
        }
    }
}

impl SchedulerConfig {
    /// Resolve the configured timezone name
    pub fn timezone(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Invalid scheduler timezone '{}': {}", self.timezone, e))
    }
}

impl Config {
    /// Load configuration from a TOML file, writing the defaults there first
    /// when it does not exist. `ASSASSIN_*` environment variables override
    /// file values, with `__` separating sections (`ASSASSIN_DATABASE__URL`).
    pub fn load_from_file(config_file: &str) -> Result<Self> {
        if !std::path::Path::new(config_file).exists() {
            let contents = toml::to_string_pretty(&Self::default())?;
            std::fs::write(config_file, contents)
                .with_context(|| format!("Failed to write default config file: {config_file}"))?;
            info!("Created default config file: {}", config_file);
        }

        let config: Config = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to load configuration from {config_file}"))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would only fail later at runtime
    pub fn validate(&self) -> Result<()> {
        self.scheduler.timezone()?;
        if self.scheduler.max_instances == 0 {
            anyhow::bail!("scheduler.max_instances must be at least 1");
        }
        if self.scheduler.reconcile_interval.is_zero() {
            anyhow::bail!("scheduler.reconcile_interval must be greater than zero");
        }
        Ok(())
    }
}
