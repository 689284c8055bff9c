//! Task scheduler service
//!
//! Keeps the registered tasks with their schedule and lifecycle state, fires
//! the ones that are due on every check tick, and runs manual triggers. Each
//! execution runs on its own tokio task; a panicking task is turned into a
//! failed result instead of taking the scheduler down.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, broadcast};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::task::ScheduledTask;
use super::types::{
    JobSchedulingError, ScheduleConfig, TaskCompletion, TaskResult, TaskState, TaskStatus,
    error_codes,
};
use crate::config::SchedulerConfig;
use crate::observability::AppObservability;

const COMPLETION_CHANNEL_CAPACITY: usize = 64;

struct TaskEntry {
    task: Arc<dyn ScheduledTask>,
    schedule: ScheduleConfig,
    enabled: bool,
    state: TaskState,
    registered_at: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
    last_result: Option<TaskResult>,
}

impl TaskEntry {
    /// Interval schedules count from the last run, or from registration
    fn next_run(&self) -> Option<DateTime<Utc>> {
        if !self.enabled {
            return None;
        }
        self.schedule
            .next_run(self.last_run.unwrap_or(self.registered_at))
    }
}

pub struct TaskScheduler {
    tasks: RwLock<BTreeMap<String, TaskEntry>>,
    completions: broadcast::Sender<TaskCompletion>,
    tracker: TaskTracker,
    observability: AppObservability,
    check_interval: Duration,
    shutdown_grace: Duration,
}

impl TaskScheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        let (completions, _) = broadcast::channel(COMPLETION_CHANNEL_CAPACITY);
        Self {
            tasks: RwLock::new(BTreeMap::new()),
            completions,
            tracker: TaskTracker::new(),
            observability: AppObservability::default(),
            check_interval: config.check_interval,
            shutdown_grace: config.shutdown_grace,
        }
    }

    pub fn with_observability(mut self, observability: AppObservability) -> Self {
        self.observability = observability;
        self
    }

    /// Register a task under its own id, replacing nothing
    pub async fn register(
        &self,
        task: Arc<dyn ScheduledTask>,
        schedule: ScheduleConfig,
        enabled: bool,
    ) -> Result<(), JobSchedulingError> {
        let task_id = task.task_id().to_string();
        schedule
            .validate()
            .map_err(|message| JobSchedulingError::InvalidSchedule {
                task_id: task_id.clone(),
                message,
            })?;

        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task_id) {
            return Err(JobSchedulingError::AlreadyRegistered { task_id });
        }
        debug!(task_id = %task_id, ?schedule, enabled, "Registered task");
        tasks.insert(
            task_id,
            TaskEntry {
                task,
                schedule,
                enabled,
                state: TaskState::Idle,
                registered_at: Utc::now(),
                last_run: None,
                last_result: None,
            },
        );
        Ok(())
    }

    /// Register tasks with the schedule and settings found in `config`
    ///
    /// Tasks without a configured entry are registered as manual. Task
    /// settings are applied through `update_config` and must validate.
    pub async fn register_all(
        &self,
        tasks: Vec<Arc<dyn ScheduledTask>>,
        config: &SchedulerConfig,
    ) -> Result<(), JobSchedulingError> {
        for task in tasks {
            let task_id = task.task_id().to_string();
            let (schedule, enabled) = match config.tasks.get(&task_id) {
                Some(entry) => {
                    if let Some(settings) = &entry.config {
                        task.update_config(settings.clone()).await.map_err(|message| {
                            JobSchedulingError::InvalidConfig {
                                task_id: task_id.clone(),
                                message,
                            }
                        })?;
                    }
                    (entry.schedule.clone(), entry.enabled)
                }
                None => (ScheduleConfig::Manual, true),
            };
            self.register(task, schedule, enabled).await?;
        }
        Ok(())
    }

    /// Fire due tasks until `cancellation_token` is cancelled, then shut down
    pub async fn run(self: Arc<Self>, cancellation_token: CancellationToken) {
        info!(
            check_interval = ?self.check_interval,
            "Starting task scheduler"
        );
        let mut schedule_check = interval(self.check_interval);
        // The first tick completes immediately; nothing is due at startup
        schedule_check.tick().await;

        loop {
            tokio::select! {
                _ = schedule_check.tick() => {
                    self.run_due_tasks(Utc::now()).await;
                }
                _ = cancellation_token.cancelled() => {
                    info!("Task scheduler received cancellation signal, shutting down");
                    break;
                }
            }
        }

        self.shutdown().await;
        info!("Task scheduler stopped");
    }

    /// Trigger every enabled task that is not running and is due at `now`
    pub async fn run_due_tasks(self: &Arc<Self>, now: DateTime<Utc>) -> Vec<String> {
        let due: Vec<String> = {
            let tasks = self.tasks.read().await;
            tasks
                .iter()
                .filter(|(_, entry)| entry.state != TaskState::Running)
                .filter(|(_, entry)| entry.next_run().is_some_and(|next| next <= now))
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut started = Vec::new();
        for task_id in due {
            match self.trigger(&task_id).await {
                Ok(()) => started.push(task_id),
                Err(JobSchedulingError::AlreadyRunning { .. }) => {
                    debug!(task_id = %task_id, "Due task already running, skipping");
                }
                Err(e) => warn!(task_id = %task_id, error = %e, "Failed to start due task"),
            }
        }
        started
    }

    /// Start a task now; rejected when an execution is already in flight
    pub async fn trigger(self: &Arc<Self>, task_id: &str) -> Result<(), JobSchedulingError> {
        let task = {
            let mut tasks = self.tasks.write().await;
            let entry = tasks
                .get_mut(task_id)
                .ok_or_else(|| JobSchedulingError::UnknownTask {
                    task_id: task_id.to_string(),
                })?;
            if entry.state == TaskState::Running {
                return Err(JobSchedulingError::AlreadyRunning {
                    task_id: task_id.to_string(),
                });
            }
            // Cleared before the state flips so a cancel from here on sticks
            entry.task.context().reset_cancel();
            entry.state = TaskState::Running;
            entry.last_run = Some(Utc::now());
            entry.task.clone()
        };

        info!(task_id, "Starting task");
        let scheduler = Arc::clone(self);
        self.tracker
            .spawn(async move { scheduler.execute_task(task).await });
        Ok(())
    }

    async fn execute_task(self: Arc<Self>, task: Arc<dyn ScheduledTask>) {
        let task_id = task.task_id().to_string();
        let started_at = Utc::now();
        let timer = Instant::now();

        let runner = Arc::clone(&task);
        let result = match tokio::spawn(async move { runner.execute().await }).await {
            Ok(result) => result,
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Task execution aborted");
                TaskResult::fatal(
                    task_id.as_str(),
                    started_at,
                    error_codes::TASK_PANICKED,
                    format!("Task execution aborted: {e}"),
                )
            }
        };
        let state = result.final_state();
        let elapsed = timer.elapsed();
        self.observability
            .record_task_run(&task_id, &state.to_string(), elapsed);

        match state {
            TaskState::Completed => info!(
                task_id = %task_id,
                elapsed = ?elapsed,
                message = %result.message,
                "Task completed"
            ),
            TaskState::Cancelled => info!(
                task_id = %task_id,
                elapsed = ?elapsed,
                message = %result.message,
                "Task cancelled"
            ),
            _ => warn!(
                task_id = %task_id,
                elapsed = ?elapsed,
                error = result.error.as_deref().unwrap_or_default(),
                message = %result.message,
                "Task failed"
            ),
        }

        if let Some(entry) = self.tasks.write().await.get_mut(&task_id) {
            entry.state = state;
            entry.last_result = Some(result.clone());
        }

        // No subscribers is not an error
        let _ = self.completions.send(TaskCompletion {
            task_id,
            state,
            result,
        });
    }

    /// Ask a running task to stop at its next item boundary
    pub async fn cancel(&self, task_id: &str) -> Result<(), JobSchedulingError> {
        let task = {
            let tasks = self.tasks.read().await;
            let entry = tasks
                .get(task_id)
                .ok_or_else(|| JobSchedulingError::UnknownTask {
                    task_id: task_id.to_string(),
                })?;
            if entry.state != TaskState::Running {
                return Err(JobSchedulingError::NotRunning {
                    task_id: task_id.to_string(),
                });
            }
            entry.task.clone()
        };
        info!(task_id, "Cancelling task");
        task.cancel().await;
        Ok(())
    }

    pub async fn status(&self, task_id: &str) -> Result<TaskStatus, JobSchedulingError> {
        let tasks = self.tasks.read().await;
        let entry = tasks
            .get(task_id)
            .ok_or_else(|| JobSchedulingError::UnknownTask {
                task_id: task_id.to_string(),
            })?;
        Ok(Self::build_status(task_id, entry).await)
    }

    pub async fn list_status(&self) -> Vec<TaskStatus> {
        let tasks = self.tasks.read().await;
        let mut statuses = Vec::with_capacity(tasks.len());
        for (task_id, entry) in tasks.iter() {
            statuses.push(Self::build_status(task_id, entry).await);
        }
        statuses
    }

    async fn build_status(task_id: &str, entry: &TaskEntry) -> TaskStatus {
        let progress = if entry.state == TaskState::Running {
            Some(entry.task.progress().await)
        } else {
            None
        };
        TaskStatus {
            task_id: task_id.to_string(),
            name: entry.task.name().to_string(),
            description: entry.task.description().to_string(),
            state: entry.state,
            enabled: entry.enabled,
            schedule: entry.schedule.clone(),
            registered_at: entry.registered_at,
            last_run: entry.last_run,
            next_run: entry.next_run(),
            progress,
            last_result: entry.last_result.clone(),
        }
    }

    pub async fn update_schedule(
        &self,
        task_id: &str,
        schedule: ScheduleConfig,
    ) -> Result<(), JobSchedulingError> {
        schedule
            .validate()
            .map_err(|message| JobSchedulingError::InvalidSchedule {
                task_id: task_id.to_string(),
                message,
            })?;
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| JobSchedulingError::UnknownTask {
                task_id: task_id.to_string(),
            })?;
        info!(task_id, ?schedule, "Updated task schedule");
        entry.schedule = schedule;
        Ok(())
    }

    pub async fn set_enabled(&self, task_id: &str, enabled: bool) -> Result<(), JobSchedulingError> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| JobSchedulingError::UnknownTask {
                task_id: task_id.to_string(),
            })?;
        entry.enabled = enabled;
        Ok(())
    }

    /// Merge settings into a task; invalid settings are rejected and not kept
    pub async fn update_task_config(
        &self,
        task_id: &str,
        config: serde_json::Value,
    ) -> Result<(), JobSchedulingError> {
        let task = self.task(task_id).await?;
        let previous = task.get_config().await;
        task.update_config(config)
            .await
            .map_err(|message| JobSchedulingError::InvalidConfig {
                task_id: task_id.to_string(),
                message,
            })?;
        if let Err(message) = task.validate_config().await {
            if let Err(e) = task.update_config(previous).await {
                warn!(task_id, error = %e, "Failed to restore previous task settings");
            }
            return Err(JobSchedulingError::InvalidConfig {
                task_id: task_id.to_string(),
                message,
            });
        }
        Ok(())
    }

    pub async fn task_config(&self, task_id: &str) -> Result<serde_json::Value, JobSchedulingError> {
        Ok(self.task(task_id).await?.get_config().await)
    }

    /// Collect a finished result and return the task to idle
    ///
    /// `None` while the task is running or when there is nothing to collect.
    pub async fn take_result(&self, task_id: &str) -> Result<Option<TaskResult>, JobSchedulingError> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| JobSchedulingError::UnknownTask {
                task_id: task_id.to_string(),
            })?;
        if !entry.state.is_finished() {
            return Ok(None);
        }
        entry.state = TaskState::Idle;
        Ok(entry.last_result.clone())
    }

    /// Notifications for every finished execution
    pub fn subscribe(&self) -> broadcast::Receiver<TaskCompletion> {
        self.completions.subscribe()
    }

    async fn task(&self, task_id: &str) -> Result<Arc<dyn ScheduledTask>, JobSchedulingError> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .map(|entry| entry.task.clone())
            .ok_or_else(|| JobSchedulingError::UnknownTask {
                task_id: task_id.to_string(),
            })
    }

    /// Cancel running tasks and wait up to the grace period for them to end
    pub async fn shutdown(&self) {
        let running: Vec<Arc<dyn ScheduledTask>> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|entry| entry.state == TaskState::Running)
            .map(|entry| entry.task.clone())
            .collect();
        for task in &running {
            info!(task_id = task.task_id(), "Cancelling running task for shutdown");
            task.cancel().await;
        }

        self.tracker.close();
        if tokio::time::timeout(self.shutdown_grace, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                grace = ?self.shutdown_grace,
                "Tasks still running after shutdown grace period"
            );
        }
    }
}
