//! Task scheduling type definitions

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::cron_helper;

/// Fixed error codes carried by [`TaskResult::error`]
pub mod error_codes {
    pub const CANCELLED: &str = "CANCELLED";
    pub const NO_PROBER: &str = "NO_PROBER";
    pub const PROBE_ALREADY_RUNNING: &str = "PROBE_ALREADY_RUNNING";
    pub const INVALID_CONFIG: &str = "INVALID_CONFIG";
    pub const FETCH_FAILED: &str = "FETCH_FAILED";
    pub const ALL_FAILED: &str = "ALL_FAILED";
    pub const TASK_PANICKED: &str = "TASK_PANICKED";
}

/// When a task fires on its own
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "schedule_type", rename_all = "snake_case")]
pub enum ScheduleConfig {
    /// Only runs when triggered
    Manual,
    /// Every `interval_seconds` after the previous run
    Interval { interval_seconds: u64 },
    /// Once a day at "HH:MM" UTC
    Daily { time: String },
    /// Five, six or seven field cron expression
    Cron { expression: String },
}

impl ScheduleConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ScheduleConfig::Manual => Ok(()),
            ScheduleConfig::Interval { interval_seconds } => {
                if *interval_seconds == 0 {
                    Err("interval_seconds must be greater than zero".to_string())
                } else {
                    Ok(())
                }
            }
            ScheduleConfig::Daily { time } => parse_daily_time(time).map(|_| ()),
            ScheduleConfig::Cron { expression } => {
                cron_helper::parse_cron_expression(expression).map(|_| ())
            }
        }
    }

    /// First fire time after `base`; `None` for manual or unusable schedules
    pub fn next_run(&self, base: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ScheduleConfig::Manual => None,
            ScheduleConfig::Interval { interval_seconds } => {
                if *interval_seconds == 0 {
                    return None;
                }
                let seconds = i64::try_from(*interval_seconds).ok()?;
                base.checked_add_signed(ChronoDuration::try_seconds(seconds)?)
            }
            ScheduleConfig::Daily { time } => {
                let at = parse_daily_time(time).ok()?;
                let candidate = base.date_naive().and_time(at).and_utc();
                if candidate > base {
                    Some(candidate)
                } else {
                    candidate.checked_add_signed(ChronoDuration::days(1))
                }
            }
            ScheduleConfig::Cron { expression } => {
                cron_helper::next_scheduled_time_after(expression, base)
                    .ok()
                    .flatten()
            }
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, ScheduleConfig::Manual)
    }
}

fn parse_daily_time(time: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(time.trim(), "%H:%M")
        .map_err(|e| format!("Invalid daily time '{time}' (expected HH:MM): {e}"))
}

/// Lifecycle of a registered task
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskState {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// A finished execution whose result has not been collected yet
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// Live progress of a running task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub total: usize,
    pub current: usize,
    pub status: String,
    pub current_item: Option<String>,
    pub success_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
}

impl TaskProgress {
    pub fn processed(&self) -> usize {
        self.success_count + self.failed_count + self.skipped_count
    }
}

/// Absolute overwrite of selected progress fields
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub total: Option<usize>,
    pub current: Option<usize>,
    pub status: Option<String>,
    pub current_item: Option<Option<String>>,
}

impl ProgressUpdate {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Self::default()
        }
    }

    pub fn with_total(mut self, total: usize) -> Self {
        self.total = Some(total);
        self
    }

    pub fn with_current(mut self, current: usize) -> Self {
        self.current = Some(current);
        self
    }

    pub fn with_item(mut self, item: impl Into<String>) -> Self {
        self.current_item = Some(Some(item.into()));
        self
    }

    pub fn without_item(mut self) -> Self {
        self.current_item = Some(None);
        self
    }
}

/// Immutable record of one `execute()` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total_items: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl TaskResult {
    /// A precondition failed before any work was done
    pub fn fatal(
        task_id: impl Into<String>,
        started_at: DateTime<Utc>,
        code: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            message: message.into(),
            error: Some(code.to_string()),
            started_at,
            completed_at: Utc::now(),
            total_items: 0,
            success_count: 0,
            failed_count: 0,
            skipped_count: 0,
            details: serde_json::Map::new(),
        }
    }

    /// Result carrying the counters accumulated in `progress`
    ///
    /// Success follows the partial-success rule: something succeeded, or
    /// there was nothing to do. A run where every item failed gets
    /// `ALL_FAILED`.
    pub fn from_progress(
        task_id: impl Into<String>,
        started_at: DateTime<Utc>,
        progress: &TaskProgress,
        message: impl Into<String>,
    ) -> Self {
        let nothing_to_do = progress.success_count == 0 && progress.failed_count == 0;
        let success = progress.success_count > 0 || nothing_to_do;
        Self {
            task_id: task_id.into(),
            success,
            message: message.into(),
            error: (!success).then(|| error_codes::ALL_FAILED.to_string()),
            started_at,
            completed_at: Utc::now(),
            total_items: progress.total,
            success_count: progress.success_count,
            failed_count: progress.failed_count,
            skipped_count: progress.skipped_count,
            details: serde_json::Map::new(),
        }
    }

    /// Cancelled run; counts reflect what finished before the flag was seen
    pub fn cancelled(
        task_id: impl Into<String>,
        started_at: DateTime<Utc>,
        progress: &TaskProgress,
        message: impl Into<String>,
    ) -> Self {
        let mut result = Self::from_progress(task_id, started_at, progress, message);
        result.success = false;
        result.error = Some(error_codes::CANCELLED.to_string());
        result
    }

    pub fn with_detail(mut self, key: &str, value: serde_json::Value) -> Self {
        self.details.insert(key.to_string(), value);
        self
    }

    /// Per-item failures listed under `details.errors`
    pub fn with_errors(self, errors: Vec<String>) -> Self {
        if errors.is_empty() {
            return self;
        }
        self.with_detail("errors", serde_json::json!(errors))
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.as_deref() == Some(error_codes::CANCELLED)
    }

    /// Terminal state implied by this result
    pub fn final_state(&self) -> TaskState {
        if self.is_cancelled() {
            TaskState::Cancelled
        } else if self.success {
            TaskState::Completed
        } else {
            TaskState::Failed
        }
    }
}

/// Broadcast when an execution finishes, for notification dispatch
#[derive(Debug, Clone, Serialize)]
pub struct TaskCompletion {
    pub task_id: String,
    pub state: TaskState,
    pub result: TaskResult,
}

/// Point-in-time view of one registered task
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub name: String,
    pub description: String,
    pub state: TaskState,
    pub enabled: bool,
    pub schedule: ScheduleConfig,
    pub registered_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub progress: Option<TaskProgress>,
    pub last_result: Option<TaskResult>,
}

/// Errors that can occur in the task scheduling system
#[derive(Debug, thiserror::Error)]
pub enum JobSchedulingError {
    #[error("Task '{task_id}' is not registered")]
    UnknownTask { task_id: String },

    #[error("Task '{task_id}' is already registered")]
    AlreadyRegistered { task_id: String },

    #[error("Task '{task_id}' is already running")]
    AlreadyRunning { task_id: String },

    #[error("Task '{task_id}' is not running")]
    NotRunning { task_id: String },

    #[error("Invalid schedule for task '{task_id}': {message}")]
    InvalidSchedule { task_id: String, message: String },

    #[error("Invalid configuration for task '{task_id}': {message}")]
    InvalidConfig { task_id: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_schedule_config_serde_shape() {
        let schedule: ScheduleConfig = serde_json::from_value(serde_json::json!({
            "schedule_type": "interval",
            "interval_seconds": 600
        }))
        .unwrap();
        assert_eq!(
            schedule,
            ScheduleConfig::Interval {
                interval_seconds: 600
            }
        );

        let manual = serde_json::to_value(ScheduleConfig::Manual).unwrap();
        assert_eq!(manual, serde_json::json!({ "schedule_type": "manual" }));
    }

    #[test]
    fn test_next_run_per_schedule_type() {
        assert_eq!(ScheduleConfig::Manual.next_run(at(1, 0)), None);

        let interval = ScheduleConfig::Interval {
            interval_seconds: 1800,
        };
        assert_eq!(interval.next_run(at(1, 0)), Some(at(1, 30)));

        let daily = ScheduleConfig::Daily {
            time: "03:00".to_string(),
        };
        assert_eq!(daily.next_run(at(2, 0)), Some(at(3, 0)));
        assert_eq!(
            daily.next_run(at(3, 0)),
            Some(Utc.with_ymd_and_hms(2025, 6, 2, 3, 0, 0).unwrap())
        );

        let cron = ScheduleConfig::Cron {
            expression: "30 4 * * *".to_string(),
        };
        assert_eq!(cron.next_run(at(4, 0)), Some(at(4, 30)));
    }

    #[test]
    fn test_schedule_validation() {
        assert!(ScheduleConfig::Interval { interval_seconds: 0 }.validate().is_err());
        assert!(
            ScheduleConfig::Daily {
                time: "7pm".to_string()
            }
            .validate()
            .is_err()
        );
        assert!(
            ScheduleConfig::Cron {
                expression: "every day".to_string()
            }
            .validate()
            .is_err()
        );
        assert!(
            ScheduleConfig::Daily {
                time: "23:59".to_string()
            }
            .validate()
            .is_ok()
        );
    }

    #[test]
    fn test_partial_success_rule() {
        let started = Utc::now();
        let mixed = TaskProgress {
            total: 3,
            current: 3,
            success_count: 1,
            failed_count: 2,
            ..TaskProgress::default()
        };
        let result = TaskResult::from_progress("t", started, &mixed, "done");
        assert!(result.success);
        assert_eq!(result.error, None);
        assert_eq!(result.final_state(), TaskState::Completed);

        let all_failed = TaskProgress {
            total: 2,
            failed_count: 2,
            ..TaskProgress::default()
        };
        let result = TaskResult::from_progress("t", started, &all_failed, "done");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(error_codes::ALL_FAILED));
        assert_eq!(result.final_state(), TaskState::Failed);

        let empty = TaskProgress::default();
        assert!(TaskResult::from_progress("t", started, &empty, "nothing").success);

        let result = TaskResult::cancelled("t", started, &mixed, "stopped");
        assert!(!result.success);
        assert_eq!(result.final_state(), TaskState::Cancelled);
        assert_eq!(result.success_count, 1);
    }

    #[test]
    fn test_errors_land_in_details() {
        let result = TaskResult::from_progress("t", Utc::now(), &TaskProgress::default(), "ok")
            .with_errors(vec!["source 3: timeout".to_string()]);
        assert_eq!(
            result.details["errors"],
            serde_json::json!(["source 3: timeout"])
        );
    }
}
