use anyhow::Result;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

pub mod defaults;
pub mod duration_serde;

use defaults::*;
use duration_serde::duration;

use crate::errors::{AppError, AppResult};
use crate::job_scheduling::ScheduleConfig;
use crate::ordering::OrderingConfig;

/// Prefix for environment overrides, e.g. `STREAM_HEALTH_PROBING__PROBE_TIMEOUT=45s`
pub const ENV_PREFIX: &str = "STREAM_HEALTH_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub probing: ProbingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub ordering: OrderingConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    pub max_connections: Option<u32>,
}

/// Connection settings for the remote channel manager API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_remote_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    #[serde(default = "default_request_timeout", with = "duration")]
    pub request_timeout: Duration,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbingConfig {
    #[serde(default = "default_ffprobe_command")]
    pub ffprobe_command: String,
    #[serde(default = "default_ffmpeg_command")]
    pub ffmpeg_command: String,
    /// Hard deadline for a single probe subprocess
    #[serde(default = "default_probe_timeout", with = "duration")]
    pub probe_timeout: Duration,
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,
    #[serde(default)]
    pub black_screen_detection: bool,
    /// Seconds of video sampled for black screen detection
    #[serde(default = "default_black_screen_sample_duration")]
    pub black_screen_sample_duration: u64,
    /// Refresh active M3U accounts before scheduled probe runs
    #[serde(default = "default_true")]
    pub refresh_accounts_before_probe: bool,
}

impl ProbingConfig {
    pub fn effective_max_concurrent_probes(&self) -> usize {
        self.max_concurrent_probes
            .clamp(MIN_CONCURRENT_PROBES, MAX_CONCURRENT_PROBES)
    }

    pub fn effective_black_screen_sample_secs(&self) -> u64 {
        self.black_screen_sample_duration
            .clamp(MIN_BLACK_SCREEN_SAMPLE_SECS, MAX_BLACK_SCREEN_SAMPLE_SECS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the scheduler looks for due tasks
    #[serde(default = "default_check_interval", with = "duration")]
    pub check_interval: Duration,
    /// How long shutdown waits for running tasks
    #[serde(default = "default_shutdown_grace", with = "duration")]
    pub shutdown_grace: Duration,
    #[serde(default = "default_task_schedules")]
    pub tasks: BTreeMap<String, TaskScheduleEntry>,
}

/// Schedule and task-specific settings for one registered task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskScheduleEntry {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub schedule: ScheduleConfig,
    /// Free-form settings handed to the task's `update_config`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

/// Completion heuristics for remote source refreshes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_poll_interval", with = "duration")]
    pub poll_interval: Duration,
    #[serde(default = "default_max_wait", with = "duration")]
    pub max_wait: Duration,
    /// With no timestamp change, a refresh is assumed done after this long
    #[serde(default = "default_assume_complete_after", with = "duration")]
    pub assume_complete_after: Duration,
}

fn default_true() -> bool {
    true
}
fn default_database_url() -> String {
    DEFAULT_DATABASE_URL.to_string()
}
fn default_remote_base_url() -> String {
    DEFAULT_REMOTE_BASE_URL.to_string()
}
fn default_request_timeout() -> Duration {
    Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
}
fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}
fn default_ffprobe_command() -> String {
    DEFAULT_FFPROBE_COMMAND.to_string()
}
fn default_ffmpeg_command() -> String {
    DEFAULT_FFMPEG_COMMAND.to_string()
}
fn default_probe_timeout() -> Duration {
    Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS)
}
fn default_max_concurrent_probes() -> usize {
    DEFAULT_MAX_CONCURRENT_PROBES
}
fn default_black_screen_sample_duration() -> u64 {
    DEFAULT_BLACK_SCREEN_SAMPLE_SECS
}
fn default_check_interval() -> Duration {
    Duration::from_secs(DEFAULT_SCHEDULER_CHECK_INTERVAL_SECS)
}
fn default_shutdown_grace() -> Duration {
    Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS)
}
fn default_poll_interval() -> Duration {
    Duration::from_secs(POLL_INTERVAL_SECONDS)
}
fn default_max_wait() -> Duration {
    Duration::from_secs(MAX_WAIT_SECONDS)
}
fn default_assume_complete_after() -> Duration {
    Duration::from_secs(ASSUME_COMPLETE_AFTER_SECONDS)
}

fn default_task_schedules() -> BTreeMap<String, TaskScheduleEntry> {
    let daily = |time: &str| ScheduleConfig::Daily {
        time: time.to_string(),
    };
    BTreeMap::from([
        (
            "stream_probe".to_string(),
            TaskScheduleEntry {
                enabled: true,
                schedule: daily("03:00"),
                config: None,
            },
        ),
        (
            "reprobe_failed".to_string(),
            TaskScheduleEntry {
                enabled: true,
                schedule: ScheduleConfig::Interval {
                    interval_seconds: 3600,
                },
                config: None,
            },
        ),
        (
            "struck_stream_cleanup".to_string(),
            TaskScheduleEntry {
                enabled: true,
                schedule: daily("04:30"),
                config: Some(serde_json::json!({
                    "failure_threshold": DEFAULT_STRUCK_FAILURE_THRESHOLD
                })),
            },
        ),
        (
            "epg_refresh".to_string(),
            TaskScheduleEntry {
                enabled: true,
                schedule: ScheduleConfig::Manual,
                config: None,
            },
        ),
    ])
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: Some(DEFAULT_MAX_CONNECTIONS),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_remote_base_url(),
            api_token: None,
            request_timeout: default_request_timeout(),
            page_size: default_page_size(),
        }
    }
}

impl Default for ProbingConfig {
    fn default() -> Self {
        Self {
            ffprobe_command: default_ffprobe_command(),
            ffmpeg_command: default_ffmpeg_command(),
            probe_timeout: default_probe_timeout(),
            max_concurrent_probes: default_max_concurrent_probes(),
            black_screen_detection: false,
            black_screen_sample_duration: default_black_screen_sample_duration(),
            refresh_accounts_before_probe: true,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            shutdown_grace: default_shutdown_grace(),
            tasks: default_task_schedules(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            max_wait: default_max_wait(),
            assume_complete_after: default_assume_complete_after(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file layered with `STREAM_HEALTH_` env overrides
    ///
    /// A default file is written when `config_file` does not exist yet.
    pub fn load_from_file(config_file: &str) -> Result<Self> {
        if !std::path::Path::new(config_file).exists() {
            let contents = toml::to_string_pretty(&Self::default())?;
            std::fs::write(config_file, contents)?;
            info!("Created default config file: {}", config_file);
        }

        let config: Config = Figment::new()
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the service misbehave at runtime
    pub fn validate(&self) -> AppResult<()> {
        if self.probing.probe_timeout.is_zero() {
            return Err(AppError::configuration(
                "probing.probe_timeout must be greater than zero",
            ));
        }
        if self.scheduler.check_interval.is_zero() {
            return Err(AppError::configuration(
                "scheduler.check_interval must be greater than zero",
            ));
        }
        if self.refresh.poll_interval.is_zero() {
            return Err(AppError::configuration(
                "refresh.poll_interval must be greater than zero",
            ));
        }
        if self.remote.page_size == 0 {
            return Err(AppError::configuration(
                "remote.page_size must be greater than zero",
            ));
        }
        for (task_id, entry) in &self.scheduler.tasks {
            entry
                .schedule
                .validate()
                .map_err(|e| AppError::configuration(format!("scheduler.tasks.{task_id}: {e}")))?;
        }
        Ok(())
    }
}
